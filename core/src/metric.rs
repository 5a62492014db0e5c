//! Cross-layer route metric
//!
//! A single ranking scalar built from four layers of observation:
//! - Link layer: delivery quality of the link (0.0 = dead, 1.0 = perfect)
//! - Queue: how long packets wait before leaving the node (seconds)
//! - Mobility: how fast the link geometry is changing (relative speed, m/s)
//! - Network: hop count of the path
//!
//! Snapshots are immutable; an update always replaces the whole value.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Guard against division by zero in the inverse terms
pub const METRIC_EPSILON: f64 = 1e-3;

/// Weights applied to each term of the composite metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub link_quality: f64,
    pub delay: f64,
    pub mobility: f64,
    pub hop_count: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            link_quality: 0.3,
            delay: 0.25,
            mobility: 0.25,
            hop_count: 0.2,
        }
    }
}

impl MetricWeights {
    /// All weights finite and non-negative
    pub fn is_valid(&self) -> bool {
        [self.link_quality, self.delay, self.mobility, self.hop_count]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Snapshot of the cross-layer state of a link or a path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossLayerMetric {
    /// Delivery quality in [0, 1]
    pub link_quality: f64,
    /// Queuing delay in seconds
    pub queuing_delay: f64,
    /// Mobility estimate (relative speed, m/s)
    pub mobility: f64,
    /// Hops to the destination
    pub hop_count: u32,
    /// When the snapshot was taken (time since engine start)
    pub timestamp: Duration,
}

impl Default for CrossLayerMetric {
    fn default() -> Self {
        Self {
            link_quality: 0.0,
            queuing_delay: 0.0,
            mobility: 0.0,
            hop_count: 0,
            timestamp: Duration::ZERO,
        }
    }
}

impl CrossLayerMetric {
    /// Build a snapshot, clamping every input into its valid range
    pub fn new(
        link_quality: f64,
        queuing_delay: f64,
        mobility: f64,
        hop_count: u32,
        timestamp: Duration,
    ) -> Self {
        Self {
            link_quality: sanitize(link_quality).min(1.0),
            queuing_delay: sanitize(queuing_delay),
            mobility: sanitize(mobility),
            hop_count,
            timestamp,
        }
    }

    /// Composite score: `w1·lq + w2/(delay+ε) + w3/(mobility+ε) + w4/(hops+1)`.
    /// Higher is better.
    pub fn composite(&self, weights: &MetricWeights) -> f64 {
        weights.link_quality * self.link_quality
            + weights.delay / (self.queuing_delay + METRIC_EPSILON)
            + weights.mobility / (self.mobility + METRIC_EPSILON)
            + weights.hop_count / (self.hop_count as f64 + 1.0)
    }

    /// Fold this (upstream path) metric with the link it just crossed.
    ///
    /// Link quality is the bottleneck, delay accumulates, mobility is the worst
    /// seen along the path and the hop count grows by one.
    pub fn extend_over(&self, link: &CrossLayerMetric, now: Duration) -> Self {
        Self::new(
            self.link_quality.min(link.link_quality),
            self.queuing_delay + link.queuing_delay,
            self.mobility.max(link.mobility),
            self.hop_count.saturating_add(1),
            now,
        )
    }

    /// Copy of the snapshot with a different hop count
    pub fn with_hop_count(&self, hop_count: u32) -> Self {
        Self { hop_count, ..*self }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(lq: f64, delay: f64, mobility: f64, hops: u32) -> CrossLayerMetric {
        CrossLayerMetric::new(lq, delay, mobility, hops, Duration::ZERO)
    }

    #[test]
    fn test_better_inputs_score_higher() {
        let w = MetricWeights::default();
        let worse = metric(0.8, 0.005, 0.2, 2);
        let better = metric(0.9, 0.002, 0.1, 1);
        assert!(better.composite(&w) > worse.composite(&w));
    }

    #[test]
    fn test_composite_matches_formula() {
        let w = MetricWeights::default();
        let m = metric(0.5, 0.1, 1.0, 3);
        let expected = 0.3 * 0.5 + 0.25 / 0.101 + 0.25 / 1.001 + 0.2 / 4.0;
        assert!((m.composite(&w) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_inputs_do_not_divide_by_zero() {
        let m = metric(0.0, 0.0, 0.0, 0);
        assert!(m.composite(&MetricWeights::default()).is_finite());
    }

    #[test]
    fn test_new_clamps_out_of_range_values() {
        let m = metric(1.7, -3.0, f64::NAN, 1);
        assert_eq!(m.link_quality, 1.0);
        assert_eq!(m.queuing_delay, 0.0);
        assert_eq!(m.mobility, 0.0);
    }

    #[test]
    fn test_extend_over_aggregates_path() {
        let path = metric(0.9, 0.010, 0.5, 1);
        let link = metric(0.6, 0.002, 2.0, 1);
        let folded = path.extend_over(&link, Duration::from_secs(4));

        assert_eq!(folded.link_quality, 0.6);
        assert!((folded.queuing_delay - 0.012).abs() < 1e-12);
        assert_eq!(folded.mobility, 2.0);
        assert_eq!(folded.hop_count, 2);
        assert_eq!(folded.timestamp, Duration::from_secs(4));
    }

    #[test]
    fn test_weights_validation() {
        assert!(MetricWeights::default().is_valid());
        let mut w = MetricWeights::default();
        w.delay = -0.1;
        assert!(!w.is_valid());
        w.delay = f64::INFINITY;
        assert!(!w.is_valid());
    }
}
