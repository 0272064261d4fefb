//! Route table - learned next hops
//!
//! Every observed rumor is evidence that its origin can be reached through
//! the peer that delivered it. The table keeps the most recent evidence per
//! origin, preferring a direct delivery when two rumors carry the same
//! sequence number.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use murmur_core::{Origin, SeqNo};

/// Next hop towards one origin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub origin: Origin,
    /// Sequence number of the rumor that produced this entry
    pub seq: SeqNo,
    pub next_hop: SocketAddr,
    /// The rumor came straight from its origin
    pub direct: bool,
}

/// What a `learn` call did to the table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteUpdate {
    /// First route to this origin
    Added,
    /// Existing route superseded
    Replaced,
    /// Existing route kept
    Unchanged,
}

/// Origin -> next hop
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<Origin, RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next hop for `origin`, if any rumor from it has been observed
    pub fn lookup(&self, origin: &str) -> Option<SocketAddr> {
        self.routes.get(origin).map(|entry| entry.next_hop)
    }

    pub fn entry(&self, origin: &str) -> Option<&RouteEntry> {
        self.routes.get(origin)
    }

    /// Learn from an observed rumor.
    ///
    /// An existing entry is replaced only by a strictly newer sequence
    /// number, or by the same sequence number delivered directly when the
    /// existing entry was indirect.
    pub fn learn(
        &mut self,
        origin: &Origin,
        seq: SeqNo,
        observed_from: SocketAddr,
        direct: bool,
    ) -> RouteUpdate {
        let candidate = RouteEntry {
            origin: origin.clone(),
            seq,
            next_hop: observed_from,
            direct,
        };

        match self.routes.get_mut(origin.as_str()) {
            None => {
                tracing::info!(origin = %origin, next_hop = %observed_from, direct, "new route");
                self.routes.insert(origin.clone(), candidate);
                RouteUpdate::Added
            }
            Some(existing) => {
                let newer = seq > existing.seq;
                let better_tie = seq == existing.seq && direct && !existing.direct;
                if !(newer || better_tie) {
                    return RouteUpdate::Unchanged;
                }
                if existing.next_hop != observed_from {
                    tracing::debug!(
                        origin = %origin,
                        from = %existing.next_hop,
                        to = %observed_from,
                        seq = seq.value(),
                        direct,
                        "route changed"
                    );
                }
                *existing = candidate;
                RouteUpdate::Replaced
            }
        }
    }

    /// Origins with a known next hop, in order
    pub fn origins(&self) -> impl Iterator<Item = &Origin> {
        self.routes.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
