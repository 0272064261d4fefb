//! Error types for murmur

use thiserror::Error;

use crate::Origin;

/// Core murmur errors
#[derive(Error, Debug)]
pub enum MurmurError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Unknown envelope: no Dest, Want or Origin field")]
    UnknownEnvelope,

    #[error("Invalid sequence number {0}: sequence numbers start at 1")]
    InvalidSequence(u32),

    #[error("Datagram too large: {size} > {max}")]
    DatagramTooLarge { size: usize, max: usize },

    // Routing errors
    #[error("No route to origin {0}")]
    NoRoute(Origin),

    #[error("Hop limit exhausted for destination {0}")]
    HopLimitExhausted(Origin),

    // Membership errors
    #[error("Failed to resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    #[error("Invalid neighbor address: {0}")]
    InvalidNeighbor(String),

    // Transport errors
    #[error("No usable UDP port in range {first}-{last}")]
    NoUsablePort { first: u16, last: u16 },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Node has shut down")]
    NodeClosed,
}

/// Result type for murmur operations
pub type MurmurResult<T> = Result<T, MurmurError>;
