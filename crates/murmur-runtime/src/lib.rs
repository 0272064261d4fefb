//! murmur Runtime - Gossip node orchestration
//!
//! Every inbound datagram and timer fire is handled to completion by the
//! [`Dispatcher`] before the next one is looked at:
//! 1. Decode and classify the envelope (rumor, status, addressed payload)
//! 2. Create the sender's neighbor session if it is new
//! 3. Learn a route from rumors
//! 4. Record the rumor in the message log
//! 5. Propagate new rumors / reconcile status with the neighbor session
//! 6. Queue replies for transmission
//!
//! [`Node`] owns the UDP socket and feeds the dispatcher from a tokio
//! event loop.

pub mod config;
pub mod event;
pub mod neighbor;
pub mod session;
pub mod dispatcher;
pub mod node;
pub mod telemetry;

pub use config::*;
pub use event::*;
pub use neighbor::*;
pub use session::*;
pub use dispatcher::*;
pub use node::*;
