//! Virtual-time network of gossip dispatchers
//!
//! Every node is a real [`Dispatcher`]. Outgoing envelopes are encoded,
//! carried over a [`ChaosLink`] per direction and decoded on arrival, so the
//! simulation exercises the same wire path as a UDP deployment.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use murmur_core::{MurmurResult, Origin, Rumor, StatusVector};
use murmur_runtime::{Dispatcher, NeighborSpec, NodeConfig, NodeEvent};

use crate::chaos::{ChaosConfig, ChaosLink, ChaosStats};

const FIRST_PORT: u16 = 10_000;

/// Index of a node in the simulator
pub type NodeIndex = usize;

struct SimNode {
    addr: SocketAddr,
    dispatcher: Dispatcher,
    events: Vec<NodeEvent>,
}

/// Deterministic multi-node simulation
pub struct NetworkSimulator {
    nodes: Vec<SimNode>,
    links: BTreeMap<(SocketAddr, SocketAddr), ChaosLink>,
    default_config: ChaosConfig,
    epoch: Instant,
    elapsed: Duration,
    seed_counter: u64,
    undeliverable: u64,
}

impl NetworkSimulator {
    /// `seed` decides the fate of every packet on every link
    pub fn new(default_config: ChaosConfig, seed: u64) -> Self {
        NetworkSimulator {
            nodes: Vec::new(),
            links: BTreeMap::new(),
            default_config,
            epoch: Instant::now(),
            elapsed: Duration::ZERO,
            seed_counter: seed,
            undeliverable: 0,
        }
    }

    pub fn perfect() -> Self {
        Self::new(ChaosConfig::perfect(), 0)
    }

    /// Add a node. It gets the next loopback port and no neighbors.
    pub fn add_node(&mut self, config: NodeConfig) -> NodeIndex {
        let index = self.nodes.len();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, FIRST_PORT + index as u16));
        let mut dispatcher = Dispatcher::new(config, self.now());
        dispatcher.set_local_addr(addr);

        self.nodes.push(SimNode {
            addr,
            dispatcher,
            events: Vec::new(),
        });
        index
    }

    /// Make `to` a neighbor of `from`. The reverse direction is learned
    /// once `from` first talks to `to`.
    pub fn connect(&mut self, from: NodeIndex, to: NodeIndex) {
        let addr = self.nodes[to].addr;
        self.nodes[from]
            .dispatcher
            .add_neighbor(NeighborSpec::Addr(addr));
        self.collect(from);
    }

    /// Neighbor both ways
    pub fn connect_both(&mut self, a: NodeIndex, b: NodeIndex) {
        self.connect(a, b);
        self.connect(b, a);
    }

    /// Override conditions for the `from -> to` direction
    pub fn set_link_config(&mut self, from: NodeIndex, to: NodeIndex, config: ChaosConfig) {
        let key = (self.nodes[from].addr, self.nodes[to].addr);
        let seed = self.next_seed();
        self.links.insert(key, ChaosLink::new(config, seed));
    }

    /// Originate a chat message at `node`
    pub fn submit(&mut self, node: NodeIndex, body: &str) -> MurmurResult<Rumor> {
        let now = self.now();
        let rumor = self.nodes[node].dispatcher.submit_local_message(body, now)?;
        self.collect(node);
        Ok(rumor)
    }

    /// Broadcast a route rumor from `node` right now
    pub fn announce(&mut self, node: NodeIndex) -> Rumor {
        let rumor = self.nodes[node].dispatcher.broadcast_route_rumor();
        self.collect(node);
        rumor
    }

    /// Send a private chat from `node`; `false` if it has no route
    pub fn private_chat(&mut self, node: NodeIndex, dest: &str, text: &str) -> bool {
        let sent = self.nodes[node]
            .dispatcher
            .send_private_chat(Origin::from(dest), text);
        self.collect(node);
        sent
    }

    /// Advance virtual time by `dt`: deliver due packets, then fire due
    /// timers
    pub fn step(&mut self, dt: Duration) {
        self.elapsed += dt;
        let now = self.now();

        let mut arrivals = Vec::new();
        for (&(from, to), link) in self.links.iter_mut() {
            for data in link.advance_to(self.elapsed) {
                arrivals.push((from, to, data));
            }
        }

        for (from, to, data) in arrivals {
            let Some(index) = self.index_of(to) else {
                continue;
            };
            self.nodes[index].dispatcher.handle_datagram(&data, from, now);
            self.collect(index);
        }

        for index in 0..self.nodes.len() {
            if self.nodes[index].dispatcher.next_deadline() <= now {
                self.nodes[index].dispatcher.poll_timers(now);
                self.collect(index);
            }
        }
    }

    /// Step for `duration` in increments of `dt`
    pub fn run_for(&mut self, duration: Duration, dt: Duration) {
        let end = self.elapsed + duration;
        while self.elapsed < end {
            self.step(dt);
        }
    }

    /// Step until `done` holds or `limit` of virtual time has passed.
    /// Returns whether `done` was reached.
    pub fn run_until<F>(&mut self, limit: Duration, dt: Duration, mut done: F) -> bool
    where
        F: FnMut(&NetworkSimulator) -> bool,
    {
        let end = self.elapsed + limit;
        while self.elapsed < end {
            if done(self) {
                return true;
            }
            self.step(dt);
        }
        done(self)
    }

    /// Every node holds the same status vector
    pub fn converged(&self) -> bool {
        let mut statuses = self.nodes.iter().map(|n| n.dispatcher.status());
        match statuses.next() {
            Some(first) => statuses.all(|s| s == first),
            None => true,
        }
    }

    pub fn status(&self, node: NodeIndex) -> StatusVector {
        self.nodes[node].dispatcher.status()
    }

    pub fn dispatcher(&self, node: NodeIndex) -> &Dispatcher {
        &self.nodes[node].dispatcher
    }

    pub fn addr(&self, node: NodeIndex) -> SocketAddr {
        self.nodes[node].addr
    }

    /// Events emitted by `node` so far
    pub fn events(&self, node: NodeIndex) -> &[NodeEvent] {
        &self.nodes[node].events
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Datagrams addressed to something that is not a simulated node
    pub fn undeliverable(&self) -> u64 {
        self.undeliverable
    }

    pub fn link_stats(&self, from: NodeIndex, to: NodeIndex) -> Option<&ChaosStats> {
        self.links
            .get(&(self.nodes[from].addr, self.nodes[to].addr))
            .map(ChaosLink::stats)
    }

    fn now(&self) -> Instant {
        self.epoch + self.elapsed
    }

    fn next_seed(&mut self) -> u64 {
        let seed = self.seed_counter;
        self.seed_counter = self.seed_counter.wrapping_add(1);
        seed
    }

    fn index_of(&self, addr: SocketAddr) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.addr == addr)
    }

    /// Move a node's queued envelopes onto the links and keep its events
    fn collect(&mut self, index: NodeIndex) {
        let from = self.nodes[index].addr;

        while let Some((dest, envelope)) = self.nodes[index].dispatcher.pop_outgoing() {
            let data = match envelope.encode() {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "simulated node produced an unencodable envelope");
                    continue;
                }
            };
            if self.index_of(dest).is_none() {
                self.undeliverable += 1;
                continue;
            }

            if !self.links.contains_key(&(from, dest)) {
                let seed = self.next_seed();
                let link = ChaosLink::new(self.default_config.clone(), seed);
                self.links.insert((from, dest), link);
            }
            if let Some(link) = self.links.get_mut(&(from, dest)) {
                link.set_time(self.elapsed);
                link.send(data);
            }
        }

        let node = &mut self.nodes[index];
        while let Some(event) = node.dispatcher.pop_event() {
            node.events.push(event);
        }
    }
}
