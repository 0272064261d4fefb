//! murmur Test Harness - Deterministic multi-node simulation
//!
//! This crate provides:
//! - Lossy, jittery, duplicating links with seeded randomness
//! - A virtual-time simulator that drives real dispatchers over encoded
//!   datagrams, so convergence can be checked without sockets or sleeps

pub mod chaos;
pub mod simulator;

pub use chaos::*;
pub use simulator::*;
