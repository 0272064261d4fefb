//! murmur Wire Protocol - Datagram envelope format
//!
//! Every datagram carries exactly one envelope, encoded as a single JSON
//! map. The map's keys decide its kind:
//! - `Dest` present: addressed payload (point-to-point, hop limited)
//! - `Want` present: status vector
//! - `Origin` present: rumor (chat or route)
//!
//! The encoding is symmetric: what a node sends it can also decode.

pub mod envelope;
pub mod payload;

pub use envelope::*;
pub use payload::*;
