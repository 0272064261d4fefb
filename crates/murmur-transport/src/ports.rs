//! Candidate port range
//!
//! Each local user gets a small, deterministic block of UDP ports in the
//! 32768-49151 range. Several instances run by the same user on one host
//! land on neighboring ports of that block and can find each other without
//! any configuration.

use std::net::{Ipv4Addr, SocketAddr};

/// First port of the shared block
pub const PORT_BLOCK_START: u16 = 32768;

/// Number of per-user slots in the block
pub const PORT_BLOCK_SLOTS: u16 = 4096;

/// Ports per user
pub const PORTS_PER_USER: u16 = 4;

/// Contiguous range of candidate ports, tried in order at bind time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    first: u16,
    len: u16,
}

impl PortRange {
    /// Returns `None` for an empty range or one running past port 65535
    pub fn new(first: u16, len: u16) -> Option<Self> {
        if len == 0 {
            return None;
        }
        first.checked_add(len - 1)?;
        Some(PortRange { first, len })
    }

    /// Range derived from the current user's login name
    pub fn for_current_user() -> Self {
        let user = ["USER", "USERNAME", "LOGNAME"]
            .iter()
            .find_map(|key| std::env::var(key).ok())
            .unwrap_or_default();
        Self::for_user(&user)
    }

    /// Range derived from a user name
    pub fn for_user(user: &str) -> Self {
        let digest = user
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let slot = (digest % PORT_BLOCK_SLOTS as u32) as u16;
        PortRange {
            first: PORT_BLOCK_START + slot * PORTS_PER_USER,
            len: PORTS_PER_USER,
        }
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn last(&self) -> u16 {
        self.first + (self.len - 1)
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last()).contains(&port)
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.first..=self.last()
    }

    /// Loopback addresses of every port in the range except `bound`
    pub fn loopback_peers(&self, bound: u16) -> Vec<SocketAddr> {
        self.ports()
            .filter(|port| *port != bound)
            .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .collect()
    }
}
