//! Rumor definitions
//!
//! A rumor is an immutable fact about the network, identified by the pair
//! (origin, sequence number). Rumors without a body are route rumors: they
//! only advertise that their origin is reachable.

use std::net::SocketAddr;

use crate::{Origin, SeqNo};

/// Identity of a rumor
pub type RumorId = (Origin, SeqNo);

/// A single originator-sequenced fact
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rumor {
    /// Peer that created the rumor
    pub origin: Origin,
    /// Position in the origin's sequence
    pub seq: SeqNo,
    /// Chat text; `None` for route rumors
    pub body: Option<String>,
    /// Peer this rumor was relayed from, if it did not come straight from
    /// its origin
    pub last_hop: Option<SocketAddr>,
}

impl Rumor {
    /// Create a chat rumor
    pub fn chat(origin: Origin, seq: SeqNo, body: impl Into<String>) -> Self {
        Rumor {
            origin,
            seq,
            body: Some(body.into()),
            last_hop: None,
        }
    }

    /// Create a bodyless route rumor
    pub fn route(origin: Origin, seq: SeqNo) -> Self {
        Rumor {
            origin,
            seq,
            body: None,
            last_hop: None,
        }
    }

    pub fn with_last_hop(mut self, last_hop: Option<SocketAddr>) -> Self {
        self.last_hop = last_hop;
        self
    }

    #[inline]
    pub fn is_route(&self) -> bool {
        self.body.is_none()
    }

    pub fn id(&self) -> RumorId {
        (self.origin.clone(), self.seq)
    }
}
