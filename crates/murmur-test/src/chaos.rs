//! Unreliable link model
//!
//! Simulates the conditions UDP gossip has to survive:
//! - Latency with uniform jitter (and the reordering it implies)
//! - Packet loss
//! - Duplication

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link conditions
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Fixed one-way latency
    pub base_latency: Duration,
    /// Upper bound of the uniform jitter added to the base latency
    pub jitter: Duration,
    /// Packet loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Duplicate probability
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            jitter: Duration::from_millis(20),
            loss_rate: 0.01,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Fixed latency, nothing lost
    pub fn perfect() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(10),
            jitter: Duration::ZERO,
            loss_rate: 0.0,
            duplicate_prob: 0.0,
        }
    }

    /// Default conditions with the given loss rate
    pub fn lossy(loss_rate: f64) -> Self {
        ChaosConfig {
            loss_rate,
            ..Self::default()
        }
    }

    /// Every packet lost
    pub fn severed() -> Self {
        ChaosConfig {
            loss_rate: 1.0,
            ..Self::perfect()
        }
    }
}

#[derive(Clone, Debug)]
struct InFlight {
    data: Vec<u8>,
    deliver_at: Duration,
    sent_at: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub packets_duplicated: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.packets_delivered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.packets_delivered as f64
        }
    }
}

/// One direction of a simulated link
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: Vec<InFlight>,
    current_time: Duration,
    stats: ChaosStats,
}

impl ChaosLink {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosLink {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            current_time: Duration::ZERO,
            stats: ChaosStats::default(),
        }
    }

    /// Put a datagram on the wire at the link's current time
    pub fn send(&mut self, data: Vec<u8>) {
        self.stats.packets_sent += 1;

        if self.rng.gen::<f64>() < self.config.loss_rate {
            self.stats.packets_lost += 1;
            return;
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            self.stats.packets_duplicated += 1;
            let copy = self.schedule(data.clone());
            self.in_flight.push(copy);
        }
        let packet = self.schedule(data);
        self.in_flight.push(packet);
    }

    fn schedule(&mut self, data: Vec<u8>) -> InFlight {
        let jitter = if self.config.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.rng.gen_range(Duration::ZERO..=self.config.jitter)
        };
        InFlight {
            data,
            deliver_at: self.current_time + self.config.base_latency + jitter,
            sent_at: self.current_time,
        }
    }

    /// Move the link clock forward without delivering anything
    pub fn set_time(&mut self, now: Duration) {
        self.current_time = self.current_time.max(now);
    }

    /// Advance to `now` and return everything due, earliest first
    pub fn advance_to(&mut self, now: Duration) -> Vec<Vec<u8>> {
        self.set_time(now);

        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|p| p.deliver_at <= self.current_time);
        self.in_flight = pending;
        due.sort_by_key(|p| p.deliver_at);

        due.into_iter()
            .map(|packet| {
                let latency = (packet.deliver_at - packet.sent_at).as_millis() as u64;
                self.stats.packets_delivered += 1;
                self.stats.total_latency_ms += latency;
                self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency);
                packet.data
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }
}
