//! Fast local repair bookkeeping
//!
//! Escalation order when forwarding to a next hop fails:
//! 1. Backup switch: promote the best live alternate, no messages
//! 2. Local repair: ask one-hop neighbors for a path, bounded wait
//! 3. Global discovery: full rediscovery plus a Route Error to the sources

use crate::timer::TimerId;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Repair tier that handled a forwarding failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairTier {
    BackupSwitch,
    LocalRepair,
    GlobalDiscovery,
}

impl fmt::Display for RepairTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairTier::BackupSwitch => write!(f, "backup-switch"),
            RepairTier::LocalRepair => write!(f, "local-repair"),
            RepairTier::GlobalDiscovery => write!(f, "global-discovery"),
        }
    }
}

/// A local repair waiting for neighbor answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRepair {
    pub destination: Ipv4Addr,
    pub repair_id: u32,
    pub failed_next_hop: Ipv4Addr,
    /// Last known destination sequence number
    pub sequence_number: u32,
    /// Traffic sources to notify if the repair fails
    pub sources: BTreeSet<Ipv4Addr>,
    /// Upstream neighbors that used the failed route
    pub precursors: BTreeSet<Ipv4Addr>,
    pub timer: TimerId,
    pub started_at: Duration,
}

/// Local repairs in flight, one per destination
#[derive(Debug, Clone, Default)]
pub struct RepairTable {
    pending: HashMap<Ipv4Addr, PendingRepair>,
}

impl RepairTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, repair: PendingRepair) {
        self.pending.insert(repair.destination, repair);
    }

    pub fn get(&self, destination: Ipv4Addr) -> Option<&PendingRepair> {
        self.pending.get(&destination)
    }

    pub fn is_pending(&self, destination: Ipv4Addr) -> bool {
        self.pending.contains_key(&destination)
    }

    /// Another failing flow joined an in-flight repair
    pub fn add_source(&mut self, destination: Ipv4Addr, source: Ipv4Addr) {
        if let Some(repair) = self.pending.get_mut(&destination) {
            repair.sources.insert(source);
        }
    }

    /// Remove the repair (answered or timed out)
    pub fn take(&mut self, destination: Ipv4Addr) -> Option<PendingRepair> {
        self.pending.remove(&destination)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
