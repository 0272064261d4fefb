//! murmur Core - Fundamental gossip types
//!
//! This crate defines the types shared by every murmur component:
//! - Identifiers (Origin, SeqNo)
//! - Rumors, the unit of epidemic dissemination
//! - Status vectors, the per-origin "next needed" summary
//! - The protocol error taxonomy

pub mod id;
pub mod rumor;
pub mod status;
pub mod error;

pub use id::*;
pub use rumor::*;
pub use status::*;
pub use error::*;
