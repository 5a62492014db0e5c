//! Neighbor table: one-hop soft state
//!
//! Every recognized control message from a sender is a sighting. A sighting
//! creates or refreshes the sender's entry and extends its validity window;
//! the purge pass deletes entries nobody has heard from in time and reports
//! them so routes through them can be invalidated.
//!
//! Link quality is smoothed with an exponentially weighted moving average:
//! `new = α·sample + (1-α)·old`. The first sighting adopts the sample as-is.

use crate::metric::CrossLayerMetric;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// One observation of a neighbor's link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSample {
    /// Delivery quality sample in [0, 1]
    pub quality: f64,
    /// Queuing delay advertised by the neighbor (keeps the previous value when `None`)
    pub queuing_delay: Option<f64>,
    /// Mobility toward the neighbor (keeps the previous value when `None`)
    pub mobility: Option<f64>,
}

impl LinkSample {
    /// Sample carrying only a quality value
    pub fn quality(quality: f64) -> Self {
        Self {
            quality,
            queuing_delay: None,
            mobility: None,
        }
    }
}

/// A one-hop neighbor
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborEntry {
    pub address: Ipv4Addr,
    pub last_seen: Duration,
    /// Smoothed link quality in [0, 1]
    pub link_quality: f64,
    pub interface: u32,
    /// One-hop metric snapshot toward this neighbor
    pub metric: CrossLayerMetric,
    pub valid_until: Duration,
}

impl NeighborEntry {
    pub fn is_expired(&self, now: Duration) -> bool {
        now > self.valid_until
    }
}

/// Outcome of [`NeighborTable::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    New,
    Refreshed,
}

/// Per-node table of one-hop neighbors
#[derive(Debug, Clone)]
pub struct NeighborTable {
    neighbors: HashMap<Ipv4Addr, NeighborEntry>,
    /// Validity window granted by each sighting
    validity: Duration,
    /// EWMA smoothing factor
    alpha: f64,
}

impl NeighborTable {
    pub fn new(validity: Duration, alpha: f64) -> Self {
        Self {
            neighbors: HashMap::new(),
            validity,
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Create or refresh a neighbor entry from a sighting
    pub fn observe(
        &mut self,
        address: Ipv4Addr,
        interface: u32,
        sample: LinkSample,
        now: Duration,
    ) -> Sighting {
        let quality = sample.quality.clamp(0.0, 1.0);

        if let Some(entry) = self.neighbors.get_mut(&address) {
            entry.link_quality = self.alpha * quality + (1.0 - self.alpha) * entry.link_quality;
            entry.last_seen = now;
            entry.interface = interface;
            entry.valid_until = now + self.validity;
            entry.metric = CrossLayerMetric::new(
                entry.link_quality,
                sample.queuing_delay.unwrap_or(entry.metric.queuing_delay),
                sample.mobility.unwrap_or(entry.metric.mobility),
                1,
                now,
            );
            return Sighting::Refreshed;
        }

        self.neighbors.insert(
            address,
            NeighborEntry {
                address,
                last_seen: now,
                link_quality: quality,
                interface,
                metric: CrossLayerMetric::new(
                    quality,
                    sample.queuing_delay.unwrap_or(0.0),
                    sample.mobility.unwrap_or(0.0),
                    1,
                    now,
                ),
                valid_until: now + self.validity,
            },
        );
        Sighting::New
    }

    /// Fold a quality sample into an existing entry without extending its validity.
    ///
    /// Used for failure evidence: a link that keeps failing must still age out.
    pub fn record_quality(&mut self, address: Ipv4Addr, sample: f64, now: Duration) -> bool {
        let alpha = self.alpha;
        match self.neighbors.get_mut(&address) {
            Some(entry) => {
                entry.link_quality =
                    alpha * sample.clamp(0.0, 1.0) + (1.0 - alpha) * entry.link_quality;
                entry.metric = CrossLayerMetric::new(
                    entry.link_quality,
                    entry.metric.queuing_delay,
                    entry.metric.mobility,
                    1,
                    now,
                );
                true
            }
            None => false,
        }
    }

    /// Live entry for a neighbor (expired entries are treated as absent)
    pub fn lookup(&self, address: Ipv4Addr, now: Duration) -> Option<&NeighborEntry> {
        self.neighbors
            .get(&address)
            .filter(|entry| !entry.is_expired(now))
    }

    pub fn is_neighbor(&self, address: Ipv4Addr, now: Duration) -> bool {
        self.lookup(address, now).is_some()
    }

    /// Live neighbor addresses in ascending order
    pub fn live_addresses(&self, now: Duration) -> Vec<Ipv4Addr> {
        let mut addresses: Vec<Ipv4Addr> = self
            .neighbors
            .values()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.address)
            .collect();
        addresses.sort();
        addresses
    }

    /// Delete expired entries, returning the lost neighbors
    pub fn purge_expired(&mut self, now: Duration) -> Vec<Ipv4Addr> {
        let mut lost: Vec<Ipv4Addr> = self
            .neighbors
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.address)
            .collect();
        lost.sort();

        for address in &lost {
            self.neighbors.remove(address);
        }
        lost
    }

    /// Drop every neighbor learned on an interface
    pub fn remove_interface(&mut self, interface: u32) -> Vec<Ipv4Addr> {
        let mut removed: Vec<Ipv4Addr> = self
            .neighbors
            .values()
            .filter(|entry| entry.interface == interface)
            .map(|entry| entry.address)
            .collect();
        removed.sort();

        for address in &removed {
            self.neighbors.remove(address);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn clear(&mut self) {
        self.neighbors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 1, 1, n)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_first_sighting_creates_entry() {
        let mut table = NeighborTable::new(secs(3), 0.5);
        let sighting = table.observe(addr(2), 1, LinkSample::quality(0.8), secs(10));

        assert_eq!(sighting, Sighting::New);
        let entry = table.lookup(addr(2), secs(10)).unwrap();
        assert_eq!(entry.link_quality, 0.8);
        assert_eq!(entry.interface, 1);
        assert_eq!(entry.valid_until, secs(13));
        assert_eq!(entry.metric.hop_count, 1);
    }

    #[test]
    fn test_ewma_smooths_quality() {
        let mut table = NeighborTable::new(secs(3), 0.25);
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(0));
        table.observe(addr(2), 1, LinkSample::quality(0.0), secs(1));

        let entry = table.lookup(addr(2), secs(1)).unwrap();
        assert!((entry.link_quality - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_alpha_one_overwrites() {
        let mut table = NeighborTable::new(secs(3), 1.0);
        table.observe(addr(2), 1, LinkSample::quality(0.9), secs(0));
        table.observe(addr(2), 1, LinkSample::quality(0.2), secs(1));
        assert_eq!(table.lookup(addr(2), secs(1)).unwrap().link_quality, 0.2);
    }

    #[test]
    fn test_validity_window_boundaries() {
        let mut table = NeighborTable::new(secs(30), 0.5);
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(100));

        assert!(table.is_neighbor(addr(2), secs(129)));
        assert!(table.is_neighbor(addr(2), secs(130)));
        assert!(!table.is_neighbor(addr(2), secs(131)));
    }

    #[test]
    fn test_repeated_hello_keeps_single_entry() {
        let mut table = NeighborTable::new(secs(3), 0.5);
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(5));
        let sighting = table.observe(addr(2), 1, LinkSample::quality(1.0), secs(6));

        assert_eq!(sighting, Sighting::Refreshed);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(addr(2), secs(6)).unwrap().last_seen, secs(6));
    }

    #[test]
    fn test_record_quality_does_not_extend_validity() {
        let mut table = NeighborTable::new(secs(3), 0.5);
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(0));
        assert!(table.record_quality(addr(2), 0.0, secs(2)));

        let entry = table.lookup(addr(2), secs(2)).unwrap();
        assert_eq!(entry.link_quality, 0.5);
        assert_eq!(entry.valid_until, secs(3));
        assert!(!table.record_quality(addr(9), 0.0, secs(2)));
    }

    #[test]
    fn test_advertised_fields_kept_when_absent() {
        let mut table = NeighborTable::new(secs(3), 0.5);
        let sample = LinkSample {
            quality: 1.0,
            queuing_delay: Some(0.02),
            mobility: Some(3.0),
        };
        table.observe(addr(2), 1, sample, secs(0));
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(1));

        let metric = table.lookup(addr(2), secs(1)).unwrap().metric;
        assert_eq!(metric.queuing_delay, 0.02);
        assert_eq!(metric.mobility, 3.0);
    }

    #[test]
    fn test_purge_removes_only_expired() {
        let mut table = NeighborTable::new(secs(3), 0.5);
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(0));
        table.observe(addr(3), 1, LinkSample::quality(1.0), secs(5));

        let lost = table.purge_expired(secs(6));
        assert_eq!(lost, vec![addr(2)]);
        assert!(table.is_neighbor(addr(3), secs(6)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_interface() {
        let mut table = NeighborTable::new(secs(3), 0.5);
        table.observe(addr(2), 1, LinkSample::quality(1.0), secs(0));
        table.observe(addr(3), 2, LinkSample::quality(1.0), secs(0));

        assert_eq!(table.remove_interface(2), vec![addr(3)]);
        assert_eq!(table.live_addresses(secs(0)), vec![addr(2)]);
    }
}
