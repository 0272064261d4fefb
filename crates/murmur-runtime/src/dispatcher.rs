//! Dispatcher - the single-threaded gossip core
//!
//! The dispatcher owns the message log, the route table and every neighbor
//! session. It performs no I/O: datagrams and timer ticks are pushed in,
//! and outgoing envelopes, name-resolution requests and application events
//! are queued for the driver to drain. Each call runs to completion, so one
//! datagram's neighbor creation, route learning, recording, propagation and
//! reply are never interleaved with another's.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use murmur_core::{MurmurError, MurmurResult, Origin, Rumor, SeqNo, StatusVector};
use murmur_state::{MessageLog, RouteTable, RouteUpdate};
use murmur_wire::{
    canonical_addr, check_relayable, check_status_capacity, AddressedPayload, Envelope,
};

use crate::{NeighborSession, NeighborSpec, NodeConfig, NodeEvent, RelayPolicy, StatusReaction};

#[derive(Clone, Debug, Default)]
pub struct DispatcherStats {
    pub datagrams_in: u64,
    pub datagrams_out: u64,
    pub dropped: u64,
    pub rumors_new: u64,
    pub rumors_duplicate: u64,
    pub status_sent: u64,
    pub retransmit_timeouts: u64,
    pub anti_entropy_ticks: u64,
    pub route_broadcasts: u64,
    pub payloads_delivered: u64,
    pub payloads_relayed: u64,
}

/// Gossip protocol core
pub struct Dispatcher {
    config: NodeConfig,
    policy: RelayPolicy,
    log: MessageLog,
    routes: RouteTable,
    /// Neighbor addresses in the order they became known
    neighbors: Vec<SocketAddr>,
    sessions: HashMap<SocketAddr, NeighborSession>,
    local_addr: Option<SocketAddr>,
    /// Concrete addresses peers reach us on when bound to a wildcard
    self_addrs: HashSet<SocketAddr>,
    next_seq: SeqNo,
    rng: StdRng,
    pending_resolutions: Vec<(String, u16)>,
    resolutions: VecDeque<(String, u16)>,
    outgoing: VecDeque<(SocketAddr, Envelope)>,
    events: VecDeque<NodeEvent>,
    anti_entropy_at: Instant,
    route_rumor_at: Instant,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(config: NodeConfig, now: Instant) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let route_rumor_at = if config.announce_on_start {
            now
        } else {
            now + config.route_rumor_interval
        };

        Dispatcher {
            policy: RelayPolicy {
                local: config.origin.clone(),
                forward: config.forward,
            },
            log: MessageLog::new(),
            routes: RouteTable::new(),
            neighbors: Vec::new(),
            sessions: HashMap::new(),
            local_addr: None,
            self_addrs: HashSet::new(),
            next_seq: SeqNo::FIRST,
            rng,
            pending_resolutions: Vec::new(),
            resolutions: VecDeque::new(),
            outgoing: VecDeque::new(),
            events: VecDeque::new(),
            anti_entropy_at: now + config.anti_entropy_interval,
            route_rumor_at,
            stats: DispatcherStats::default(),
            config,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.config.origin
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    pub fn status(&self) -> StatusVector {
        self.log.status()
    }

    pub fn neighbors(&self) -> &[SocketAddr] {
        &self.neighbors
    }

    pub fn session(&self, addr: SocketAddr) -> Option<&NeighborSession> {
        self.sessions.get(&canonical_addr(addr))
    }

    /// Address the transport is bound to; datagrams naming it are not
    /// treated as coming from a neighbor
    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(canonical_addr(addr));
    }

    /// Another address that reaches this node, such as the interface
    /// address behind a wildcard bind. A neighbor already known under it
    /// is dropped.
    pub fn add_local_addr(&mut self, addr: SocketAddr) {
        let addr = canonical_addr(addr);
        if !self.self_addrs.insert(addr) {
            return;
        }
        tracing::debug!(%addr, "learned local address");
        if self.sessions.remove(&addr).is_some() {
            self.neighbors.retain(|peer| *peer != addr);
            tracing::info!(peer = %addr, "removed neighbor that is ourselves");
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add a neighbor. Host names are queued for resolution and only become
    /// neighbors once [`Dispatcher::resolved`] reports an address.
    pub fn add_neighbor(&mut self, spec: NeighborSpec) {
        match spec {
            NeighborSpec::Addr(addr) => {
                self.ensure_neighbor(addr);
            }
            NeighborSpec::Host { host, port } => {
                let key = (host, port);
                if !self.pending_resolutions.contains(&key) {
                    tracing::debug!(host = %key.0, port, "resolving neighbor");
                    self.pending_resolutions.push(key.clone());
                    self.resolutions.push_back(key);
                }
            }
        }
    }

    /// Result of a resolution requested through [`Dispatcher::pop_resolution`].
    /// Failures are dropped, never retried.
    pub fn resolved(&mut self, host: &str, port: u16, result: MurmurResult<SocketAddr>) {
        self.pending_resolutions
            .retain(|(h, p)| !(h == host && *p == port));

        match result {
            Ok(addr) => {
                self.ensure_neighbor(addr);
            }
            Err(e) => {
                tracing::warn!(host, port, error = %e, "dropping neighbor that did not resolve");
            }
        }
    }

    /// Create the session for `addr` if it does not exist yet. Returns
    /// `true` if a neighbor was added.
    fn ensure_neighbor(&mut self, addr: SocketAddr) -> bool {
        let addr = canonical_addr(addr);
        if self.is_self(addr) || self.sessions.contains_key(&addr) {
            return false;
        }

        tracing::info!(peer = %addr, "new neighbor");
        self.sessions.insert(addr, NeighborSession::new(addr));
        self.neighbors.push(addr);
        self.events.push_back(NodeEvent::NeighborAdded(addr));
        true
    }

    fn is_self(&self, addr: SocketAddr) -> bool {
        let Some(local) = self.local_addr else {
            return false;
        };
        if self.self_addrs.contains(&addr) {
            return true;
        }
        if local.port() != addr.port() {
            return false;
        }
        local.ip() == addr.ip()
            || (local.ip().is_unspecified() && (addr.ip().is_loopback() || addr.ip().is_unspecified()))
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Handle one datagram. Malformed datagrams are logged and dropped.
    pub fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) {
        self.stats.datagrams_in += 1;
        match Envelope::decode(bytes) {
            Ok(envelope) => self.handle_envelope(envelope, from, now),
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!(peer = %from, error = %e, "dropping malformed datagram");
            }
        }
    }

    /// Handle one decoded envelope
    pub fn handle_envelope(&mut self, envelope: Envelope, from: SocketAddr, now: Instant) {
        let from = canonical_addr(from);
        if self.is_self(from) {
            tracing::trace!(kind = envelope.kind(), "ignoring datagram from self");
            return;
        }
        tracing::trace!(peer = %from, kind = envelope.kind(), "received envelope");

        match envelope {
            Envelope::Rumor(rumor) => self.handle_rumor(rumor, from, now),
            Envelope::Status(status) => self.handle_status(status, from, now),
            Envelope::Addressed(payload) => self.handle_addressed(payload, from),
        }
    }

    fn handle_rumor(&mut self, rumor: Rumor, from: SocketAddr, now: Instant) {
        self.ensure_neighbor(from);

        if let Err(e) = self.admit(&rumor) {
            self.stats.dropped += 1;
            tracing::warn!(
                peer = %from,
                origin = %rumor.origin,
                seq = rumor.seq.value(),
                error = %e,
                "refusing rumor we could not pass on"
            );
            return;
        }

        // A last hop means the sender relayed it; the last hop is worth
        // knowing as a neighbor in its own right. On our own rumors it may
        // be one of our addresses, so it is ignored.
        let own = rumor.origin == self.config.origin;
        let direct = match rumor.last_hop {
            Some(hop) => {
                if !own {
                    self.ensure_neighbor(hop);
                }
                false
            }
            None => true,
        };

        if !own {
            if let RouteUpdate::Added = self.routes.learn(&rumor.origin, rumor.seq, from, direct) {
                self.events.push_back(NodeEvent::RouteAdded {
                    origin: rumor.origin.clone(),
                    next_hop: from,
                });
            }
        }

        // Stored as we would relay it: stamped with the peer it came from
        let rumor = rumor.with_last_hop(Some(from));
        let Some(session) = self.sessions.get(&from) else {
            return;
        };
        let reaction = session.receive_rumor(&mut self.log, rumor.clone(), &self.policy);

        if reaction.is_new {
            self.stats.rumors_new += 1;
            tracing::info!(
                origin = %rumor.origin,
                seq = rumor.seq.value(),
                peer = %from,
                direct,
                route = rumor.is_route(),
                "new rumor"
            );
            self.events.push_back(NodeEvent::NewMessage {
                rumor,
                from: Some(from),
                direct,
            });

            if let Some(onward) = reaction.propagate {
                if let Some(target) = self.random_neighbor(None) {
                    self.send_rumor(target, onward, now);
                }
            }
        } else {
            self.stats.rumors_duplicate += 1;
            tracing::trace!(origin = %rumor.origin, seq = rumor.seq.value(), "duplicate rumor");
        }

        self.send_status(from);
    }

    /// A rumor is taken in only if it can go out again: stamped with a last
    /// hop it must fit a datagram, and a new origin must leave our status
    /// vector encodable.
    fn admit(&self, rumor: &Rumor) -> MurmurResult<()> {
        check_relayable(rumor)?;
        if self.log.origins().any(|origin| *origin == rumor.origin) {
            return Ok(());
        }
        check_status_capacity(
            self.log
                .origins()
                .chain([&self.config.origin, &rumor.origin]),
        )
    }

    fn handle_status(&mut self, status: StatusVector, from: SocketAddr, now: Instant) {
        self.ensure_neighbor(from);
        let Some(session) = self.sessions.get_mut(&from) else {
            return;
        };

        let reaction = session.receive_status(&self.log, &status, &self.policy, &mut self.rng);
        tracing::trace!(peer = %from, ?reaction, "status reconciled");

        match reaction {
            StatusReaction::SendRumor(rumor) => self.send_rumor(from, rumor, now),
            StatusReaction::SendStatus => self.send_status(from),
            StatusReaction::MongerElsewhere => {
                if let Some(target) = self.random_neighbor(Some(from)) {
                    self.send_status(target);
                }
            }
            StatusReaction::Stop => {}
        }
    }

    fn handle_addressed(&mut self, mut payload: AddressedPayload, from: SocketAddr) {
        self.ensure_neighbor(from);

        if payload.dest == self.config.origin {
            self.stats.payloads_delivered += 1;
            tracing::debug!(peer = %from, origin = ?payload.origin, "addressed payload delivered");
            self.events
                .push_back(NodeEvent::PayloadDelivered { payload, from });
            return;
        }

        if !self.config.forward {
            self.stats.dropped += 1;
            tracing::debug!(dest = %payload.dest, "not relaying payload while forwarding is disabled");
            return;
        }

        let result = if payload.take_hop() {
            self.route_payload(payload)
        } else {
            Err(MurmurError::HopLimitExhausted(payload.dest))
        };
        match result {
            Ok(()) => self.stats.payloads_relayed += 1,
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!(error = %e, "dropping addressed payload");
            }
        }
    }

    // ------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------

    /// Originate a chat rumor and start mongering it with one random
    /// neighbor. A body too long to be relayed is refused before it takes a
    /// sequence number.
    pub fn submit_local_message(
        &mut self,
        body: impl Into<String>,
        now: Instant,
    ) -> MurmurResult<Rumor> {
        let body = body.into();
        let widest = Rumor::chat(self.config.origin.clone(), SeqNo::new(u32::MAX), body.as_str());
        check_relayable(&widest)?;

        let seq = self.allocate_seq();
        let rumor = Rumor::chat(self.config.origin.clone(), seq, body);
        self.record_local(&rumor);

        match self.random_neighbor(None) {
            Some(target) => self.send_rumor(target, rumor.clone(), now),
            None => tracing::debug!(seq = seq.value(), "no neighbors yet; rumor waits for anti-entropy"),
        }
        Ok(rumor)
    }

    /// Send a payload towards its destination through the learned next
    /// hop. Returns `false` if no route is known.
    pub fn send_addressed_payload(&mut self, payload: AddressedPayload) -> bool {
        let payload = payload.with_origin(self.config.origin.clone());
        match self.route_payload(payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "abandoning addressed payload");
                false
            }
        }
    }

    /// Send a private chat line to `dest`
    pub fn send_private_chat(&mut self, dest: Origin, text: impl Into<String>) -> bool {
        let payload = AddressedPayload::private_chat(dest, self.config.hop_limit, text);
        self.send_addressed_payload(payload)
    }

    fn route_payload(&mut self, payload: AddressedPayload) -> MurmurResult<()> {
        let next_hop = self
            .routes
            .lookup(payload.dest.as_str())
            .ok_or_else(|| MurmurError::NoRoute(payload.dest.clone()))?;
        tracing::debug!(dest = %payload.dest, next_hop = %next_hop, hops = payload.hop_limit, "routing payload");
        self.queue(next_hop, Envelope::Addressed(payload));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Earliest instant at which [`Dispatcher::poll_timers`] has work
    pub fn next_deadline(&self) -> Instant {
        self.sessions
            .values()
            .filter_map(NeighborSession::deadline)
            .fold(self.anti_entropy_at.min(self.route_rumor_at), Instant::min)
    }

    /// Fire every timer that is due at `now`
    pub fn poll_timers(&mut self, now: Instant) {
        if now >= self.route_rumor_at {
            self.route_rumor_at = now + self.config.route_rumor_interval;
            self.broadcast_route_rumor();
        }

        if now >= self.anti_entropy_at {
            self.anti_entropy_at = now + self.config.anti_entropy_interval;
            self.anti_entropy_tick();
        }

        let due: Vec<SocketAddr> = self
            .neighbors
            .iter()
            .copied()
            .filter(|addr| {
                self.sessions
                    .get(addr)
                    .map_or(false, |s| s.retransmit_due(now))
            })
            .collect();

        for addr in due {
            let Some(session) = self.sessions.get_mut(&addr) else {
                continue;
            };
            self.stats.retransmit_timeouts += 1;
            tracing::debug!(peer = %addr, "retransmit timeout");

            if let Some(rumor) = session.expire(&self.policy, &mut self.rng) {
                if let Some(target) = self.random_neighbor(Some(addr)) {
                    self.send_rumor(target, rumor, now);
                }
            }
        }
    }

    /// Send our status to one random neighbor
    pub fn anti_entropy_tick(&mut self) {
        self.stats.anti_entropy_ticks += 1;
        if let Some(target) = self.random_neighbor(None) {
            tracing::trace!(peer = %target, "anti-entropy");
            self.send_status(target);
        }
    }

    /// Originate a route rumor and send it to every neighbor at once,
    /// without arming retransmit timers
    pub fn broadcast_route_rumor(&mut self) -> Rumor {
        self.stats.route_broadcasts += 1;
        let rumor = Rumor::route(self.config.origin.clone(), self.allocate_seq());
        self.record_local(&rumor);

        tracing::debug!(seq = rumor.seq.value(), neighbors = self.neighbors.len(), "route rumor broadcast");
        for addr in self.neighbors.clone() {
            self.queue(addr, Envelope::Rumor(rumor.clone()));
        }
        rumor
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn send_rumor(&mut self, target: SocketAddr, rumor: Rumor, now: Instant) {
        let Some(session) = self.sessions.get_mut(&target) else {
            return;
        };
        session.rumor_sent(rumor.clone(), now, self.config.retransmit_interval);
        tracing::debug!(peer = %target, origin = %rumor.origin, seq = rumor.seq.value(), "mongering rumor");
        self.queue(target, Envelope::Rumor(rumor));
    }

    fn send_status(&mut self, target: SocketAddr) {
        self.stats.status_sent += 1;
        let status = self.log.status();
        self.queue(target, Envelope::Status(status));
    }

    fn queue(&mut self, dest: SocketAddr, envelope: Envelope) {
        if self.outgoing.len() >= self.config.max_outgoing_buffer {
            self.stats.dropped += 1;
            tracing::warn!(peer = %dest, kind = envelope.kind(), "outgoing queue full");
            return;
        }
        self.outgoing.push_back((dest, envelope));
    }

    fn random_neighbor(&mut self, exclude: Option<SocketAddr>) -> Option<SocketAddr> {
        let candidates: Vec<SocketAddr> = self
            .neighbors
            .iter()
            .copied()
            .filter(|addr| Some(*addr) != exclude)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.gen_range(0..candidates.len())])
    }

    /// Next local sequence number. Our own rumors handed back by peers,
    /// as after a restart, are never reused.
    fn allocate_seq(&mut self) -> SeqNo {
        let held = self
            .log
            .rumors_from(self.config.origin.as_str())
            .last()
            .map(|rumor| rumor.seq.next());
        let seq = held.map_or(self.next_seq, |held| held.max(self.next_seq));
        self.next_seq = seq.next();
        seq
    }

    fn record_local(&mut self, rumor: &Rumor) {
        if !self.log.record(rumor.clone()) {
            tracing::error!(seq = rumor.seq.value(), "local sequence number already in the log");
            return;
        }
        self.events.push_back(NodeEvent::NewMessage {
            rumor: rumor.clone(),
            from: None,
            direct: true,
        });
    }

    // ------------------------------------------------------------------
    // Driver interface
    // ------------------------------------------------------------------

    /// Next envelope to transmit
    pub fn pop_outgoing(&mut self) -> Option<(SocketAddr, Envelope)> {
        let item = self.outgoing.pop_front();
        if item.is_some() {
            self.stats.datagrams_out += 1;
        }
        item
    }

    /// Next host name to resolve
    pub fn pop_resolution(&mut self) -> Option<(String, u16)> {
        self.resolutions.pop_front()
    }

    /// Next event for the application
    pub fn pop_event(&mut self) -> Option<NodeEvent> {
        self.events.pop_front()
    }
}
