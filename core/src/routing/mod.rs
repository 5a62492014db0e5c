//! Reactive multi-hop routing state
//!
//! - Neighbor table: one-hop soft state fed by every recognized control message
//! - Route table: best next hop per destination, ranked by freshness then metric, with backups
//! - Discovery: in-flight requests, retry bookkeeping and flood suppression
//! - Repair: local repair attempts waiting on neighbor answers

pub mod discovery;
pub mod neighbor;
pub mod repair;
pub mod table;

pub use discovery::{DiscoveryState, DiscoveryTable, PendingDiscovery, SeenRequests};
pub use neighbor::{LinkSample, NeighborEntry, NeighborTable, Sighting};
pub use repair::{PendingRepair, RepairTable, RepairTier};
pub use table::{
    seq_newer, BackupPath, RouteEntry, RouteSummary, RouteTable, RoutingTableDump, Unreachable,
    UpsertOutcome,
};
