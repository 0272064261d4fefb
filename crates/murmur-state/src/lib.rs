//! murmur State - What this node has seen and how to reach its authors
//!
//! - [`MessageLog`]: append-only record of every accepted rumor, with the
//!   status summary and status-vs-status diff that anti-entropy runs on
//! - [`RouteTable`]: next hop per origin, learned from rumor traffic

pub mod log;
pub mod route;

pub use log::*;
pub use route::*;
