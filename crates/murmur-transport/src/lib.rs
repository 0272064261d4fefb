//! murmur Transport Layer - UDP datagrams between neighbors
//!
//! This crate provides:
//! - UDP transport carrying one envelope per datagram
//! - The per-user candidate port range tried at bind time
//! - Asynchronous resolution of symbolic neighbor names

pub mod udp;
pub mod ports;
pub mod resolve;

pub use udp::*;
pub use ports::PortRange;
pub use resolve::resolve_neighbor;
