//! Per-neighbor rumor-mongering state machine
//!
//! A session is either idle or awaiting a status reply for the last rumor
//! sent to its neighbor. The session decides what to do next; the
//! dispatcher picks the neighbors and performs the sends.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use murmur_core::{Origin, Rumor, StatusVector};
use murmur_state::{DiffOutcome, MessageLog};

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No acknowledgment pending
    Idle,
    /// A rumor was sent; the retransmit timer is running
    AwaitingStatus,
}

/// Which rumors this node is willing to pass on
#[derive(Clone, Debug)]
pub struct RelayPolicy {
    pub local: Origin,
    pub forward: bool,
}

impl RelayPolicy {
    /// Route rumors and our own rumors always travel; other peers' chat
    /// only when forwarding is enabled.
    pub fn permits(&self, rumor: &Rumor) -> bool {
        rumor.is_route() || self.forward || rumor.origin == self.local
    }
}

/// What to do after a status arrived from this session's neighbor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusReaction {
    /// Send this rumor back to the same neighbor and re-arm its timer
    SendRumor(Rumor),
    /// Reply with our own status so the neighbor catches us up
    SendStatus,
    /// Both sides agree; continue with a status to a different neighbor
    MongerElsewhere,
    /// Stop mongering
    Stop,
}

/// Outcome of a rumor arriving from this session's neighbor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RumorReaction {
    pub is_new: bool,
    /// Rumor to pass on to one random neighbor
    pub propagate: Option<Rumor>,
}

/// Mongering state for one neighbor address
#[derive(Debug)]
pub struct NeighborSession {
    addr: SocketAddr,
    last_sent: Option<Rumor>,
    retransmit_at: Option<Instant>,
}

impl NeighborSession {
    pub fn new(addr: SocketAddr) -> Self {
        NeighborSession {
            addr,
            last_sent: None,
            retransmit_at: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> SessionState {
        if self.retransmit_at.is_some() {
            SessionState::AwaitingStatus
        } else {
            SessionState::Idle
        }
    }

    pub fn last_sent(&self) -> Option<&Rumor> {
        self.last_sent.as_ref()
    }

    /// When the retransmit timer fires, if it is running
    pub fn deadline(&self) -> Option<Instant> {
        self.retransmit_at
    }

    /// Bookkeeping for a rumor sent to this neighbor: remember it and
    /// (re)start the single-shot retransmit timer
    pub fn rumor_sent(&mut self, rumor: Rumor, now: Instant, interval: Duration) {
        self.last_sent = Some(rumor);
        self.retransmit_at = Some(now + interval);
    }

    /// A rumor arrived from this neighbor. The caller always answers with
    /// its status afterwards, new rumor or not.
    pub fn receive_rumor(
        &self,
        log: &mut MessageLog,
        rumor: Rumor,
        policy: &RelayPolicy,
    ) -> RumorReaction {
        let propagate = policy.permits(&rumor).then(|| rumor.clone());
        if log.record(rumor) {
            RumorReaction {
                is_new: true,
                propagate,
            }
        } else {
            RumorReaction {
                is_new: false,
                propagate: None,
            }
        }
    }

    /// A status arrived from this neighbor. Any pending timer is cancelled
    /// first, whichever rumor the status answers.
    pub fn receive_status<R: Rng>(
        &mut self,
        log: &MessageLog,
        remote: &StatusVector,
        policy: &RelayPolicy,
        rng: &mut R,
    ) -> StatusReaction {
        self.retransmit_at = None;

        // Rumors we would not relay are left for other paths to deliver
        match log.diff_with(remote, |rumor| policy.permits(rumor)) {
            DiffOutcome::LocalHasExtra(rumor) => StatusReaction::SendRumor(rumor),
            DiffOutcome::RemoteHasExtra => StatusReaction::SendStatus,
            DiffOutcome::Equal => {
                if rng.gen_bool(0.5) {
                    StatusReaction::MongerElsewhere
                } else {
                    StatusReaction::Stop
                }
            }
        }
    }

    pub fn retransmit_due(&self, now: Instant) -> bool {
        self.retransmit_at.map_or(false, |at| now >= at)
    }

    /// The retransmit timer fired. Returns to idle and, on heads, hands back
    /// the last rumor for a resend to a different neighbor.
    pub fn expire<R: Rng>(&mut self, policy: &RelayPolicy, rng: &mut R) -> Option<Rumor> {
        self.retransmit_at.take()?;
        let resend = rng.gen_bool(0.5);
        let rumor = self.last_sent.as_ref()?;
        (resend && policy.permits(rumor)).then(|| rumor.clone())
    }
}
