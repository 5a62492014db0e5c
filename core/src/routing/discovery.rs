//! On-demand route discovery bookkeeping
//!
//! Tracks in-flight discoveries (one per destination), destinations that
//! recently exhausted their attempts, and the (origin, request id) pairs
//! already processed so flooded requests are handled once per node.

use crate::timer::TimerId;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::trace;

/// Discovery state of one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Discovering,
    Found,
    Unreachable,
}

/// An in-flight discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDiscovery {
    pub destination: Ipv4Addr,
    /// Id of the most recent request broadcast
    pub request_id: u32,
    /// Broadcasts left after the current one
    pub attempts_remaining: u32,
    pub timer: TimerId,
    pub started_at: Duration,
}

/// Bounded memory of processed requests.
///
/// Entries live for a fixed lifetime; when the capacity is reached the
/// oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct SeenRequests {
    entries: HashMap<(Ipv4Addr, u32), Duration>,
    order: VecDeque<((Ipv4Addr, u32), Duration)>,
    lifetime: Duration,
    capacity: usize,
}

impl SeenRequests {
    pub fn new(lifetime: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            lifetime,
            capacity: capacity.max(1),
        }
    }

    /// Record a pair, returning `false` if it was already seen
    pub fn check_and_record(&mut self, origin: Ipv4Addr, request_id: u32, now: Duration) -> bool {
        self.purge_expired(now);

        let key = (origin, request_id);
        if self.entries.contains_key(&key) {
            return false;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some((old, at)) => {
                    if self.entries.get(&old) == Some(&at) {
                        self.entries.remove(&old);
                    }
                }
                None => break,
            }
        }

        self.entries.insert(key, now);
        self.order.push_back((key, now));
        true
    }

    pub fn contains(&self, origin: Ipv4Addr, request_id: u32) -> bool {
        self.entries.contains_key(&(origin, request_id))
    }

    /// Forget pairs older than the lifetime
    pub fn purge_expired(&mut self, now: Duration) -> usize {
        let mut removed = 0;
        while let Some((key, at)) = self.order.front().copied() {
            if now.saturating_sub(at) <= self.lifetime {
                break;
            }
            self.order.pop_front();
            if self.entries.get(&key) == Some(&at) {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Per-node discovery state
#[derive(Debug, Clone)]
pub struct DiscoveryTable {
    pending: HashMap<Ipv4Addr, PendingDiscovery>,
    /// Destinations whose discovery failed, with the failure time
    unreachable: HashMap<Ipv4Addr, Duration>,
    /// Processed requests
    pub seen: SeenRequests,
}

impl DiscoveryTable {
    pub fn new(seen_lifetime: Duration, seen_capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            unreachable: HashMap::new(),
            seen: SeenRequests::new(seen_lifetime, seen_capacity),
        }
    }

    pub fn begin(&mut self, pending: PendingDiscovery) {
        self.unreachable.remove(&pending.destination);
        self.pending.insert(pending.destination, pending);
    }

    pub fn pending(&self, destination: Ipv4Addr) -> Option<&PendingDiscovery> {
        self.pending.get(&destination)
    }

    pub fn pending_mut(&mut self, destination: Ipv4Addr) -> Option<&mut PendingDiscovery> {
        self.pending.get_mut(&destination)
    }

    pub fn is_pending(&self, destination: Ipv4Addr) -> bool {
        self.pending.contains_key(&destination)
    }

    /// Discovery succeeded
    pub fn complete(&mut self, destination: Ipv4Addr) -> Option<PendingDiscovery> {
        self.unreachable.remove(&destination);
        self.pending.remove(&destination)
    }

    /// Discovery exhausted its attempts
    pub fn fail(&mut self, destination: Ipv4Addr, now: Duration) -> Option<PendingDiscovery> {
        self.unreachable.insert(destination, now);
        self.pending.remove(&destination)
    }

    /// Failure time if the destination failed within `hold_down`
    pub fn recently_failed(
        &self,
        destination: Ipv4Addr,
        now: Duration,
        hold_down: Duration,
    ) -> Option<Duration> {
        self.unreachable
            .get(&destination)
            .copied()
            .filter(|at| now.saturating_sub(*at) < hold_down)
    }

    pub fn clear_unreachable(&mut self, destination: Ipv4Addr) {
        self.unreachable.remove(&destination);
    }

    pub fn state(&self, destination: Ipv4Addr, has_route: bool) -> DiscoveryState {
        if self.pending.contains_key(&destination) {
            DiscoveryState::Discovering
        } else if has_route {
            DiscoveryState::Found
        } else if self.unreachable.contains_key(&destination) {
            DiscoveryState::Unreachable
        } else {
            DiscoveryState::Idle
        }
    }

    /// Age out seen requests and old unreachable marks
    pub fn purge_expired(&mut self, now: Duration, unreachable_hold: Duration) {
        let removed = self.seen.purge_expired(now);
        if removed > 0 {
            trace!("Forgot {} seen requests", removed);
        }
        self.unreachable
            .retain(|_, at| now.saturating_sub(*at) <= unreachable_hold);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.unreachable.clear();
        self.seen.clear();
    }
}
