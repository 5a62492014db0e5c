//! Protocol configuration
//!
//! Statically typed, serde-loadable settings for one engine instance:
//! - Soft-state lifetimes (neighbors, routes, seen requests)
//! - Periodic timers (hello, probe, purge)
//! - Discovery retry policy and local repair timeout
//! - Cross-layer metric weights and link-quality smoothing
//! - Forwarding queue weights and aging bound
//!
//! Durations are carried in milliseconds so config files stay human-editable.

use crate::metric::MetricWeights;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Well-known control port
pub const DEFAULT_CONTROL_PORT: u16 = 654;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors raised by [`ProtocolConfig::validate`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid interval: {0} must be > 0")]
    ZeroInterval(&'static str),

    #[error("Invalid metric weights: all weights must be finite and >= 0")]
    InvalidWeights,

    #[error("Invalid link quality smoothing factor: must be within [0, 1], got {0}")]
    InvalidSmoothing(f64),

    #[error("Invalid failure sample: must be within [0, 1], got {0}")]
    InvalidFailureSample(f64),

    #[error("Invalid discovery attempts: must be >= 1")]
    ZeroDiscoveryAttempts,

    #[error("Invalid capacity: {0} must be > 0")]
    ZeroCapacity(&'static str),

    #[error("Invalid hop limit: must be 1-255, got {0}")]
    InvalidHopLimit(u16),

    #[error("Invalid queue weights: every class needs a weight >= 1")]
    InvalidQueueWeights,
}

// ============================================================================
// PROTOCOL CONFIG
// ============================================================================

/// Settings for one routing engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// UDP port control messages are exchanged on
    pub control_port: u16,

    /// Hello broadcast interval
    pub hello_interval_ms: u64,

    /// Validity window of a neighbor entry after its last sighting
    pub neighbor_timeout_ms: u64,

    /// Validity window of a route after install or refresh
    pub route_timeout_ms: u64,

    /// Link probe interval
    pub probe_interval_ms: u64,

    /// Soft-state purge interval
    pub purge_interval_ms: u64,

    /// Enable tiered fast local repair (disabled = always rediscover)
    pub fast_local_repair: bool,

    /// Weights of the composite metric
    pub metric_weights: MetricWeights,

    /// EWMA factor for link quality: `new = α·sample + (1-α)·old`
    pub link_quality_alpha: f64,

    /// Quality sample recorded on a failed transmission
    pub failure_sample: f64,

    /// Probe round trip considered perfect
    pub probe_rtt_target_ms: u64,

    /// Fixed delay between discovery attempts
    pub discovery_retry_interval_ms: u64,

    /// Total discovery attempts before a destination is unreachable
    pub discovery_max_attempts: u32,

    /// Wait for a neighbor answer to a local repair query
    pub local_repair_timeout_ms: u64,

    /// Let intermediate nodes answer requests from a fresh route
    pub intermediate_replies: bool,

    /// Treat same-subnet destinations as one hop away
    pub subnet_direct_routes: bool,

    /// Requests stop being relayed once this many hops have been taken
    pub max_hop_count: u16,

    /// Alternate paths retained per destination
    pub max_backup_paths: usize,

    /// How long a (origin, request id) pair is remembered
    pub seen_request_lifetime_ms: u64,

    /// Upper bound on remembered (origin, request id) pairs
    pub seen_request_capacity: usize,

    /// Service weights for High / Medium / Normal traffic
    pub queue_weights: [u32; 3],

    /// Packets per traffic class before the scheduler rejects input
    pub queue_capacity: usize,

    /// Head-of-line wait after which a packet is served regardless of class
    pub max_queue_wait_ms: u64,

    /// Seed of the engine-owned PRNG (entropy when unset)
    pub rng_seed: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            hello_interval_ms: 1_000,
            neighbor_timeout_ms: 3_000,
            route_timeout_ms: 30_000,
            probe_interval_ms: 5_000,
            purge_interval_ms: 1_000,
            fast_local_repair: true,
            metric_weights: MetricWeights::default(),
            link_quality_alpha: 0.5,
            failure_sample: 0.0,
            probe_rtt_target_ms: 10,
            discovery_retry_interval_ms: 1_000,
            discovery_max_attempts: 3,
            local_repair_timeout_ms: 200,
            intermediate_replies: true,
            subnet_direct_routes: false,
            max_hop_count: 16,
            max_backup_paths: 3,
            seen_request_lifetime_ms: 10_000,
            seen_request_capacity: 4_096,
            queue_weights: [4, 2, 1],
            queue_capacity: 256,
            max_queue_wait_ms: 500,
            rng_seed: None,
        }
    }
}

impl ProtocolConfig {
    /// Validate ranges of every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("hello_interval_ms", self.hello_interval_ms),
            ("neighbor_timeout_ms", self.neighbor_timeout_ms),
            ("route_timeout_ms", self.route_timeout_ms),
            ("probe_interval_ms", self.probe_interval_ms),
            ("purge_interval_ms", self.purge_interval_ms),
            ("probe_rtt_target_ms", self.probe_rtt_target_ms),
            ("discovery_retry_interval_ms", self.discovery_retry_interval_ms),
            ("local_repair_timeout_ms", self.local_repair_timeout_ms),
            ("seen_request_lifetime_ms", self.seen_request_lifetime_ms),
            ("max_queue_wait_ms", self.max_queue_wait_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::ZeroInterval(name));
        }

        if !self.metric_weights.is_valid() {
            return Err(ConfigError::InvalidWeights);
        }

        if !(0.0..=1.0).contains(&self.link_quality_alpha) {
            return Err(ConfigError::InvalidSmoothing(self.link_quality_alpha));
        }

        if !(0.0..=1.0).contains(&self.failure_sample) {
            return Err(ConfigError::InvalidFailureSample(self.failure_sample));
        }

        if self.discovery_max_attempts == 0 {
            return Err(ConfigError::ZeroDiscoveryAttempts);
        }

        if self.max_hop_count == 0 || self.max_hop_count > u8::MAX as u16 {
            return Err(ConfigError::InvalidHopLimit(self.max_hop_count));
        }

        if self.seen_request_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("seen_request_capacity"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_capacity"));
        }

        if self.queue_weights.iter().any(|w| *w == 0) {
            return Err(ConfigError::InvalidQueueWeights);
        }

        Ok(())
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    pub fn neighbor_timeout(&self) -> Duration {
        Duration::from_millis(self.neighbor_timeout_ms)
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }

    pub fn probe_rtt_target(&self) -> Duration {
        Duration::from_millis(self.probe_rtt_target_ms)
    }

    pub fn discovery_retry_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_retry_interval_ms)
    }

    pub fn local_repair_timeout(&self) -> Duration {
        Duration::from_millis(self.local_repair_timeout_ms)
    }

    pub fn seen_request_lifetime(&self) -> Duration {
        Duration::from_millis(self.seen_request_lifetime_ms)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_millis(self.max_queue_wait_ms)
    }
}

// ============================================================================
// TESTS
// ============================================================================
