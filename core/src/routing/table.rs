//! Route table: destination → best next hop, plus alternates
//!
//! Key properties:
//! - **Versioned**: a higher destination sequence number always wins, older ones are ignored
//! - **Ranked**: at equal freshness the higher composite metric wins, then fewer hops
//! - **Redundant**: losing candidates are kept as backup paths for instant failover
//! - **Expiring**: an entry past its validity window is invisible to lookups
//!
//! Sequence numbers are compared with wrapping arithmetic so the counter can roll over.

use crate::metric::{CrossLayerMetric, MetricWeights};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, trace};

/// `true` when sequence number `a` is strictly newer than `b`
pub fn seq_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// An alternate path kept behind the primary
#[derive(Debug, Clone, PartialEq)]
pub struct BackupPath {
    pub next_hop: Ipv4Addr,
    pub interface: u32,
    pub hop_count: u32,
    pub sequence_number: u32,
    pub metric: CrossLayerMetric,
    pub valid_until: Duration,
}

impl BackupPath {
    pub fn is_expired(&self, now: Duration) -> bool {
        now > self.valid_until
    }
}

/// A route to one destination
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    /// Gateway handed to the forwarding plane (the next hop)
    pub gateway: Ipv4Addr,
    pub interface: u32,
    pub hop_count: u32,
    /// Destination sequence number this route was learned with
    pub sequence_number: u32,
    pub valid_until: Duration,
    pub is_primary: bool,
    pub metric: CrossLayerMetric,
    /// Alternates, best first
    pub backup_paths: Vec<BackupPath>,
    /// Neighbors that forward traffic for this destination through us
    pub precursors: BTreeSet<Ipv4Addr>,
    pub last_used: Option<Duration>,
}

impl RouteEntry {
    pub fn new(
        destination: Ipv4Addr,
        next_hop: Ipv4Addr,
        interface: u32,
        hop_count: u32,
        sequence_number: u32,
        metric: CrossLayerMetric,
        valid_until: Duration,
    ) -> Self {
        Self {
            destination,
            next_hop,
            gateway: next_hop,
            interface,
            hop_count,
            sequence_number,
            valid_until,
            is_primary: true,
            metric,
            backup_paths: Vec::new(),
            precursors: BTreeSet::new(),
            last_used: None,
        }
    }

    pub fn is_expired(&self, now: Duration) -> bool {
        now > self.valid_until
    }

    pub fn backup_next_hops(&self) -> Vec<Ipv4Addr> {
        self.backup_paths.iter().map(|b| b.next_hop).collect()
    }

    fn as_backup(&self) -> BackupPath {
        BackupPath {
            next_hop: self.next_hop,
            interface: self.interface,
            hop_count: self.hop_count,
            sequence_number: self.sequence_number,
            metric: self.metric,
            valid_until: self.valid_until,
        }
    }

    fn adopt(&mut self, path: &BackupPath) {
        self.next_hop = path.next_hop;
        self.gateway = path.next_hop;
        self.interface = path.interface;
        self.hop_count = path.hop_count;
        self.sequence_number = path.sequence_number;
        self.metric = path.metric;
        self.valid_until = path.valid_until;
    }
}

/// Result of [`RouteTable::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No live route existed; the candidate is now primary
    Inserted,
    /// The candidate replaced the primary, which became a backup
    Replaced { previous: Ipv4Addr },
    /// Same next hop as the primary; fields and lifetime refreshed
    Refreshed,
    /// The candidate lost the ranking and is kept as a new alternate
    BackupAdded,
    /// The candidate updated an alternate already on file
    BackupRefreshed,
    /// Stale or unusable candidate; table unchanged
    Ignored,
}

/// Result of [`RouteTable::mark_unreachable`]
#[derive(Debug, Clone, PartialEq)]
pub enum Unreachable {
    /// A backup took over as primary
    Promoted { next_hop: Ipv4Addr },
    /// No alternate survived; the entry is gone
    Removed(RouteEntry),
    /// The primary does not use that next hop (backups through it were dropped)
    NotAffected,
    /// No entry for the destination
    Absent,
}

/// One row of a table snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSummary {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub interface: u32,
    pub hop_count: u32,
    pub sequence_number: u32,
    pub composite: f64,
    pub remaining: Duration,
    pub backups: usize,
}

/// Per-node route table
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: BTreeMap<Ipv4Addr, RouteEntry>,
    weights: MetricWeights,
    max_backups: usize,
    /// Own addresses; never used as destination or next hop
    local_addresses: BTreeSet<Ipv4Addr>,
}

impl RouteTable {
    pub fn new(weights: MetricWeights, max_backups: usize) -> Self {
        Self {
            routes: BTreeMap::new(),
            weights,
            max_backups,
            local_addresses: BTreeSet::new(),
        }
    }

    pub fn set_local_addresses<I: IntoIterator<Item = Ipv4Addr>>(&mut self, addresses: I) {
        self.local_addresses = addresses.into_iter().collect();
    }

    /// Live route for a destination; an expired entry is dropped on the spot
    pub fn lookup(&mut self, destination: Ipv4Addr, now: Duration) -> Option<&RouteEntry> {
        let expired = self.routes.get(&destination)?.is_expired(now);
        if expired {
            trace!("Route to {} expired, dropping", destination);
            self.routes.remove(&destination);
            return None;
        }
        self.routes.get(&destination)
    }

    /// Entry regardless of expiry
    pub fn get(&self, destination: Ipv4Addr) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    /// Install or update a route
    pub fn upsert(&mut self, candidate: RouteEntry, now: Duration) -> UpsertOutcome {
        if self.local_addresses.contains(&candidate.destination)
            || self.local_addresses.contains(&candidate.next_hop)
        {
            trace!(
                "Ignoring route to {} via {}: local address",
                candidate.destination,
                candidate.next_hop
            );
            return UpsertOutcome::Ignored;
        }

        let weights = self.weights;
        let max_backups = self.max_backups;

        let live = self
            .routes
            .get(&candidate.destination)
            .map(|entry| !entry.is_expired(now));

        if live != Some(true) {
            // Precursors survive a re-install so upstream neighbors still hear about breaks
            let precursors = self
                .routes
                .remove(&candidate.destination)
                .map(|expired| expired.precursors)
                .unwrap_or_default();
            let mut fresh = candidate;
            fresh.precursors.extend(precursors);
            fresh.backup_paths.clear();
            debug!(
                "New route to {} via {} ({} hops)",
                fresh.destination, fresh.next_hop, fresh.hop_count
            );
            self.routes.insert(fresh.destination, fresh);
            return UpsertOutcome::Inserted;
        }

        let Some(existing) = self.routes.get_mut(&candidate.destination) else {
            return UpsertOutcome::Ignored;
        };

        if existing.next_hop == candidate.next_hop {
            if seq_newer(existing.sequence_number, candidate.sequence_number) {
                trace!(
                    "Stale route to {} (seq {} < {})",
                    candidate.destination,
                    candidate.sequence_number,
                    existing.sequence_number
                );
                return UpsertOutcome::Ignored;
            }
            existing.interface = candidate.interface;
            existing.hop_count = candidate.hop_count;
            existing.sequence_number = candidate.sequence_number;
            existing.metric = candidate.metric;
            existing.valid_until = existing.valid_until.max(candidate.valid_until);
            return UpsertOutcome::Refreshed;
        }

        if compare_paths(
            &weights,
            (candidate.sequence_number, &candidate.metric, candidate.hop_count),
            (existing.sequence_number, &existing.metric, existing.hop_count),
        ) == Ordering::Greater
        {
            let demoted = existing.as_backup();
            let previous = demoted.next_hop;
            existing
                .backup_paths
                .retain(|b| b.next_hop != candidate.next_hop);
            existing.adopt(&BackupPath {
                next_hop: candidate.next_hop,
                interface: candidate.interface,
                hop_count: candidate.hop_count,
                sequence_number: candidate.sequence_number,
                metric: candidate.metric,
                valid_until: candidate.valid_until,
            });
            insert_backup(&mut existing.backup_paths, demoted, &weights, max_backups);
            debug!(
                "Route to {} switched from {} to {}",
                existing.destination, previous, existing.next_hop
            );
            return UpsertOutcome::Replaced { previous };
        }

        let known = existing
            .backup_paths
            .iter()
            .find(|b| b.next_hop == candidate.next_hop)
            .map(|b| b.sequence_number);
        if known.is_some_and(|seq| seq_newer(seq, candidate.sequence_number)) {
            return UpsertOutcome::Ignored;
        }
        insert_backup(
            &mut existing.backup_paths,
            candidate.as_backup(),
            &weights,
            max_backups,
        );
        if known.is_some() {
            UpsertOutcome::BackupRefreshed
        } else {
            UpsertOutcome::BackupAdded
        }
    }

    /// Invalidate the path to `destination` through `via`.
    ///
    /// A primary through `via` is replaced by the best surviving backup, or the
    /// entry is removed when none survives.
    pub fn mark_unreachable(
        &mut self,
        destination: Ipv4Addr,
        via: Ipv4Addr,
        now: Duration,
    ) -> Unreachable {
        let Some(entry) = self.routes.get_mut(&destination) else {
            return Unreachable::Absent;
        };

        if entry.next_hop != via {
            entry.backup_paths.retain(|b| b.next_hop != via);
            return Unreachable::NotAffected;
        }

        entry
            .backup_paths
            .retain(|b| b.next_hop != via && !b.is_expired(now));

        if entry.backup_paths.is_empty() {
            debug!("Route to {} via {} removed", destination, via);
            return match self.routes.remove(&destination) {
                Some(removed) => Unreachable::Removed(removed),
                None => Unreachable::Absent,
            };
        }

        let promoted = entry.backup_paths.remove(0);
        entry.adopt(&promoted);
        debug!(
            "Route to {} failed over from {} to {}",
            destination, via, promoted.next_hop
        );
        Unreachable::Promoted {
            next_hop: promoted.next_hop,
        }
    }

    /// Drop an entry outright
    pub fn remove(&mut self, destination: Ipv4Addr) -> Option<RouteEntry> {
        self.routes.remove(&destination)
    }

    /// Destinations whose primary goes through `next_hop`
    pub fn routes_via(&self, next_hop: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.routes
            .values()
            .filter(|entry| entry.next_hop == next_hop)
            .map(|entry| entry.destination)
            .collect()
    }

    /// Drop alternates through `next_hop` from every entry
    pub fn drop_backups_via(&mut self, next_hop: Ipv4Addr) {
        for entry in self.routes.values_mut() {
            entry.backup_paths.retain(|b| b.next_hop != next_hop);
        }
    }

    /// Mark a route as used and extend its lifetime
    pub fn touch(&mut self, destination: Ipv4Addr, now: Duration, lifetime: Duration) -> bool {
        match self.routes.get_mut(&destination) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_used = Some(now);
                entry.valid_until = entry.valid_until.max(now + lifetime);
                true
            }
            _ => false,
        }
    }

    pub fn add_precursor(&mut self, destination: Ipv4Addr, precursor: Ipv4Addr) {
        if self.local_addresses.contains(&precursor) {
            return;
        }
        if let Some(entry) = self.routes.get_mut(&destination) {
            if entry.next_hop != precursor {
                entry.precursors.insert(precursor);
            }
        }
    }

    /// Delete expired entries and expired alternates, returning removed destinations
    pub fn purge_expired(&mut self, now: Duration) -> Vec<Ipv4Addr> {
        let expired: Vec<Ipv4Addr> = self
            .routes
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.destination)
            .collect();

        for destination in &expired {
            self.routes.remove(destination);
        }
        for entry in self.routes.values_mut() {
            entry.backup_paths.retain(|b| !b.is_expired(now));
        }

        if !expired.is_empty() {
            debug!("Purged {} expired routes", expired.len());
        }
        expired
    }

    /// Drop routes and alternates learned on an interface
    pub fn remove_interface(&mut self, interface: u32) {
        self.routes.retain(|_, entry| entry.interface != interface);
        for entry in self.routes.values_mut() {
            entry.backup_paths.retain(|b| b.interface != interface);
        }
    }

    /// Live rows in destination order
    pub fn snapshot(&self, now: Duration) -> Vec<RouteSummary> {
        self.routes
            .values()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| RouteSummary {
                destination: entry.destination,
                next_hop: entry.next_hop,
                interface: entry.interface,
                hop_count: entry.hop_count,
                sequence_number: entry.sequence_number,
                composite: entry.metric.composite(&self.weights),
                remaining: entry.valid_until.saturating_sub(now),
                backups: entry.backup_paths.len(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

/// Rank two paths: freshness, then composite score, then hop count
fn compare_paths(
    weights: &MetricWeights,
    a: (u32, &CrossLayerMetric, u32),
    b: (u32, &CrossLayerMetric, u32),
) -> Ordering {
    if a.0 != b.0 {
        return if seq_newer(a.0, b.0) {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }

    let score_a = a.1.composite(weights);
    let score_b = b.1.composite(weights);
    match score_a.partial_cmp(&score_b) {
        Some(Ordering::Equal) | None => b.2.cmp(&a.2),
        Some(order) => order,
    }
}

fn insert_backup(
    backups: &mut Vec<BackupPath>,
    backup: BackupPath,
    weights: &MetricWeights,
    max: usize,
) {
    backups.retain(|b| b.next_hop != backup.next_hop);
    backups.push(backup);
    backups.sort_by(|x, y| {
        compare_paths(
            weights,
            (y.sequence_number, &y.metric, y.hop_count),
            (x.sequence_number, &x.metric, x.hop_count),
        )
    });
    backups.truncate(max);
}

/// Printable routing table for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTableDump {
    pub node: Option<Ipv4Addr>,
    pub time: Duration,
    pub rows: Vec<RouteSummary>,
}

impl fmt::Display for RoutingTableDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => writeln!(
                f,
                "Node: {}, Time: {:.3}s, Routing table",
                node,
                self.time.as_secs_f64()
            )?,
            None => writeln!(
                f,
                "Node: <no address>, Time: {:.3}s, Routing table",
                self.time.as_secs_f64()
            )?,
        }
        writeln!(
            f,
            "{:<16} {:<16} {:>5} {:>5} {:>10} {:>10} {:>7}",
            "Destination", "Next Hop", "Iface", "Hops", "Metric", "Expiry(s)", "Backups"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<16} {:<16} {:>5} {:>5} {:>10.3} {:>10.3} {:>7}",
                row.destination,
                row.next_hop,
                row.interface,
                row.hop_count,
                row.composite,
                row.remaining.as_secs_f64(),
                row.backups
            )?;
        }
        Ok(())
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

    fn route(dest: u8, via: u8, hops: u32, seq: u32, lq: f64, valid_until: u64) -> RouteEntry {
        let metric = CrossLayerMetric::new(lq, 0.002, 0.1, hops, Duration::ZERO);
        RouteEntry::new(addr(dest), addr(via), 1, hops, seq, metric, secs(valid_until))
    }

    fn table() -> RouteTable {
        RouteTable::new(MetricWeights::default(), 3)
    }

    #[test]
    fn test_seq_newer_wraps() {
        assert!(seq_newer(5, 4));
        assert!(!seq_newer(4, 5));
        assert!(!seq_newer(7, 7));
        assert!(seq_newer(2, u32::MAX - 1));
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut t = table();
        assert_eq!(t.upsert(route(9, 2, 2, 1, 0.9, 30), secs(0)), UpsertOutcome::Inserted);

        let entry = t.lookup(addr(9), secs(1)).unwrap();
        assert_eq!(entry.next_hop, addr(2));
        assert_eq!(entry.gateway, addr(2));
        assert!(entry.is_primary);
    }

    #[test]
    fn test_lookup_drops_expired_entry() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 1, 0.9, 30), secs(0));

        assert!(t.lookup(addr(9), secs(30)).is_some());
        assert!(t.lookup(addr(9), secs(31)).is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn test_newer_sequence_wins_despite_worse_metric() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 1.0, 30), secs(0));
        let outcome = t.upsert(route(9, 3, 5, 11, 0.2, 30), secs(0));

        assert_eq!(outcome, UpsertOutcome::Replaced { previous: addr(2) });
        let entry = t.get(addr(9)).unwrap();
        assert_eq!(entry.next_hop, addr(3));
        assert_eq!(entry.backup_next_hops(), vec![addr(2)]);
    }

    #[test]
    fn test_stale_sequence_same_hop_ignored() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        assert_eq!(
            t.upsert(route(9, 2, 1, 9, 1.0, 60), secs(0)),
            UpsertOutcome::Ignored
        );
        assert_eq!(t.get(addr(9)).unwrap().sequence_number, 10);
    }

    #[test]
    fn test_same_hop_refresh_extends_lifetime() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        assert_eq!(
            t.upsert(route(9, 2, 2, 10, 0.8, 45), secs(5)),
            UpsertOutcome::Refreshed
        );

        let entry = t.get(addr(9)).unwrap();
        assert_eq!(entry.valid_until, secs(45));
        assert_eq!(entry.metric.link_quality, 0.8);
    }

    #[test]
    fn test_equal_seq_better_metric_replaces() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.5, 30), secs(0));
        let outcome = t.upsert(route(9, 3, 2, 10, 0.9, 30), secs(0));
        assert_eq!(outcome, UpsertOutcome::Replaced { previous: addr(2) });
    }

    #[test]
    fn test_equal_seq_worse_metric_becomes_backup() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        assert_eq!(
            t.upsert(route(9, 3, 2, 10, 0.5, 30), secs(0)),
            UpsertOutcome::BackupAdded
        );

        let entry = t.get(addr(9)).unwrap();
        assert_eq!(entry.next_hop, addr(2));
        assert_eq!(entry.backup_next_hops(), vec![addr(3)]);
    }

    #[test]
    fn test_exact_tie_keeps_incumbent() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        assert_eq!(
            t.upsert(route(9, 3, 2, 10, 0.9, 30), secs(0)),
            UpsertOutcome::BackupAdded
        );
        assert_eq!(t.get(addr(9)).unwrap().next_hop, addr(2));
        assert_eq!(
            t.upsert(route(9, 3, 2, 10, 0.9, 40), secs(1)),
            UpsertOutcome::BackupRefreshed
        );
        assert_eq!(t.get(addr(9)).unwrap().backup_paths.len(), 1);
    }

    #[test]
    fn test_backups_capped_and_ranked() {
        let mut t = table();
        t.upsert(route(9, 2, 1, 10, 1.0, 30), secs(0));
        t.upsert(route(9, 3, 2, 10, 0.4, 30), secs(0));
        t.upsert(route(9, 4, 2, 10, 0.8, 30), secs(0));
        t.upsert(route(9, 5, 2, 10, 0.6, 30), secs(0));
        t.upsert(route(9, 6, 2, 10, 0.2, 30), secs(0));

        let entry = t.get(addr(9)).unwrap();
        assert_eq!(entry.backup_next_hops(), vec![addr(4), addr(5), addr(3)]);
    }

    #[test]
    fn test_local_addresses_rejected() {
        let mut t = table();
        t.set_local_addresses([addr(1)]);
        assert_eq!(t.upsert(route(1, 2, 1, 1, 1.0, 30), secs(0)), UpsertOutcome::Ignored);
        assert_eq!(t.upsert(route(9, 1, 1, 1, 1.0, 30), secs(0)), UpsertOutcome::Ignored);
        assert!(t.is_empty());
    }

    #[test]
    fn test_mark_unreachable_promotes_backup() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        t.upsert(route(9, 3, 3, 10, 0.5, 30), secs(0));

        assert_eq!(
            t.mark_unreachable(addr(9), addr(2), secs(1)),
            Unreachable::Promoted { next_hop: addr(3) }
        );
        let entry = t.lookup(addr(9), secs(1)).unwrap();
        assert_eq!(entry.next_hop, addr(3));
        assert_eq!(entry.hop_count, 3);
        assert!(entry.backup_paths.is_empty());
    }

    #[test]
    fn test_mark_unreachable_skips_expired_backup() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        t.upsert(route(9, 3, 3, 10, 0.5, 5), secs(0));

        assert!(matches!(
            t.mark_unreachable(addr(9), addr(2), secs(10)),
            Unreachable::Removed(_)
        ));
        assert!(t.get(addr(9)).is_none());
    }

    #[test]
    fn test_mark_unreachable_without_backup_removes() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        t.add_precursor(addr(9), addr(7));

        match t.mark_unreachable(addr(9), addr(2), secs(1)) {
            Unreachable::Removed(entry) => {
                assert_eq!(entry.precursors.into_iter().collect::<Vec<_>>(), vec![addr(7)]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(t.lookup(addr(9), secs(1)).is_none());
    }

    #[test]
    fn test_mark_unreachable_other_hop() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 10, 0.9, 30), secs(0));
        t.upsert(route(9, 3, 3, 10, 0.5, 30), secs(0));

        assert_eq!(
            t.mark_unreachable(addr(9), addr(3), secs(1)),
            Unreachable::NotAffected
        );
        let entry = t.get(addr(9)).unwrap();
        assert_eq!(entry.next_hop, addr(2));
        assert!(entry.backup_paths.is_empty());
        assert_eq!(
            t.mark_unreachable(addr(8), addr(3), secs(1)),
            Unreachable::Absent
        );
    }

    #[test]
    fn test_purge_expired() {
        let mut t = table();
        t.upsert(route(8, 2, 1, 1, 0.9, 10), secs(0));
        t.upsert(route(9, 2, 1, 1, 0.9, 30), secs(0));

        assert_eq!(t.purge_expired(secs(20)), vec![addr(8)]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_touch_extends_and_records_use() {
        let mut t = table();
        t.upsert(route(9, 2, 1, 1, 0.9, 10), secs(0));
        assert!(t.touch(addr(9), secs(8), secs(30)));

        let entry = t.get(addr(9)).unwrap();
        assert_eq!(entry.valid_until, secs(38));
        assert_eq!(entry.last_used, Some(secs(8)));
        assert!(!t.touch(addr(5), secs(8), secs(30)));
    }

    #[test]
    fn test_routes_via_and_interface_removal() {
        let mut t = table();
        t.upsert(route(8, 2, 1, 1, 0.9, 30), secs(0));
        t.upsert(route(9, 2, 2, 1, 0.9, 30), secs(0));
        t.upsert(route(7, 3, 1, 1, 0.9, 30), secs(0));

        assert_eq!(t.routes_via(addr(2)), vec![addr(8), addr(9)]);
        t.remove_interface(1);
        assert!(t.is_empty());
    }

    #[test]
    fn test_dump_lists_rows() {
        let mut t = table();
        t.upsert(route(9, 2, 2, 1, 0.9, 30), secs(0));
        let dump = RoutingTableDump {
            node: Some(addr(1)),
            time: secs(5),
            rows: t.snapshot(secs(5)),
        };
        let text = dump.to_string();
        assert!(text.starts_with("Node: 10.1.1.1, Time: 5.000s"));
        assert!(text.contains("10.1.1.9"));
        assert!(text.contains("25.000"));
    }
}
