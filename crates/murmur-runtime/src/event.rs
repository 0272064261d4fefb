//! Events delivered to the application layer

use std::net::SocketAddr;

use murmur_core::{Origin, Rumor};
use murmur_wire::AddressedPayload;

/// Something the display surface or an external subsystem should hear about
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    /// A rumor entered the message log for the first time. `from` is `None`
    /// for rumors this node originated.
    NewMessage {
        rumor: Rumor,
        from: Option<SocketAddr>,
        direct: bool,
    },
    /// An origin became reachable
    RouteAdded { origin: Origin, next_hop: SocketAddr },
    /// A neighbor session was created
    NeighborAdded(SocketAddr),
    /// An addressed payload for this node arrived
    PayloadDelivered {
        payload: AddressedPayload,
        from: SocketAddr,
    },
}

impl NodeEvent {
    /// Chat text to render, for chat rumors only
    pub fn chat(&self) -> Option<(&Origin, &str)> {
        match self {
            NodeEvent::NewMessage { rumor, .. } => {
                rumor.body.as_deref().map(|body| (&rumor.origin, body))
            }
            _ => None,
        }
    }
}
