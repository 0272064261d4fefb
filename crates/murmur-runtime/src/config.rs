//! Node configuration

use std::time::Duration;

use murmur_core::{MurmurError, MurmurResult, Origin};
use murmur_wire::{DEFAULT_HOP_LIMIT, MAX_ORIGIN_LEN};

/// murmur node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Name this node signs its rumors with
    pub origin: Origin,
    /// Wait for a status reply before the retransmit coin flip
    pub retransmit_interval: Duration,
    /// Period of the unsolicited status exchange
    pub anti_entropy_interval: Duration,
    /// Period of the route rumor broadcast
    pub route_rumor_interval: Duration,
    /// Broadcast a route rumor as soon as the node starts
    pub announce_on_start: bool,
    /// Relay other peers' chat rumors and addressed payloads
    pub forward: bool,
    /// Hop limit stamped on locally originated addressed payloads
    pub hop_limit: u32,
    /// Seed for every coin flip and neighbor pick; entropy when `None`
    pub rng_seed: Option<u64>,
    /// Maximum queued outgoing datagrams
    pub max_outgoing_buffer: usize,
    /// Capacity of the event channel handed to the application
    pub event_buffer: usize,
    /// Capacity of the socket receive channel
    pub recv_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            origin: default_origin(),
            retransmit_interval: Duration::from_secs(2),
            anti_entropy_interval: Duration::from_secs(10),
            route_rumor_interval: Duration::from_secs(60),
            announce_on_start: true,
            forward: true,
            hop_limit: DEFAULT_HOP_LIMIT,
            rng_seed: None,
            max_outgoing_buffer: 4096,
            event_buffer: 256,
            recv_buffer: 1024,
        }
    }
}

impl NodeConfig {
    pub fn with_origin(mut self, origin: impl Into<Origin>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_forwarding(mut self, forward: bool) -> Self {
        self.forward = forward;
        self
    }

    pub fn with_retransmit_interval(mut self, interval: Duration) -> Self {
        self.retransmit_interval = interval;
        self
    }

    pub fn with_anti_entropy_interval(mut self, interval: Duration) -> Self {
        self.anti_entropy_interval = interval;
        self
    }

    pub fn with_route_rumor_interval(mut self, interval: Duration) -> Self {
        self.route_rumor_interval = interval;
        self
    }

    pub fn with_announce_on_start(mut self, announce: bool) -> Self {
        self.announce_on_start = announce;
        self
    }

    /// Reject an origin peers would refuse to decode
    pub fn validate(&self) -> MurmurResult<()> {
        let len = self.origin.as_str().len();
        if len == 0 || len > MAX_ORIGIN_LEN {
            return Err(MurmurError::InvalidConfig(format!(
                "origin must be 1 to {MAX_ORIGIN_LEN} bytes, got {len}"
            )));
        }
        Ok(())
    }
}

/// `<host>-<random>` so that several nodes on one machine stay distinct
fn default_origin() -> Origin {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "murmur".to_string());
    Origin::new(format!("{}-{:05}", host, rand::random::<u16>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.retransmit_interval, Duration::from_secs(2));
        assert_eq!(config.anti_entropy_interval, Duration::from_secs(10));
        assert_eq!(config.route_rumor_interval, Duration::from_secs(60));
        assert!(config.forward);
        assert!(!config.origin.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = NodeConfig::default()
            .with_origin("alice")
            .with_seed(7)
            .with_forwarding(false);
        assert_eq!(config.origin.as_str(), "alice");
        assert_eq!(config.rng_seed, Some(7));
        assert!(!config.forward);
    }

    #[test]
    fn test_validate_origin_length() {
        assert!(NodeConfig::default().validate().is_ok());
        assert!(NodeConfig::default().with_origin("").validate().is_err());
        let long = "a".repeat(MAX_ORIGIN_LEN + 1);
        assert!(matches!(
            NodeConfig::default().with_origin(long).validate(),
            Err(MurmurError::InvalidConfig(_))
        ));
    }
}
