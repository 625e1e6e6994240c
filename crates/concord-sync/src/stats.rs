//! Synchronizer counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated lock-free from the acceptance path
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Snapshots that replaced the current one
    pub accepted_total: AtomicU64,
    /// Snapshots dropped by validation or conflict resolution
    pub rejected_total: AtomicU64,
    /// Candidates identical to the current snapshot
    pub unchanged_total: AtomicU64,
    /// Conflicts detected (accepted or not)
    pub conflicts_total: AtomicU64,
    /// Channel sends that failed
    pub broadcast_failures_total: AtomicU64,
    /// Store writes or removals that failed after retries
    pub store_failures_total: AtomicU64,
    /// Store entries that could not be parsed and were deleted
    pub malformed_entries_total: AtomicU64,
}

impl SyncStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            accepted_total: self.accepted_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            unchanged_total: self.unchanged_total.load(Ordering::Relaxed),
            conflicts_total: self.conflicts_total.load(Ordering::Relaxed),
            broadcast_failures_total: self.broadcast_failures_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
            malformed_entries_total: self.malformed_entries_total.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`SyncStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatsSnapshot {
    /// Snapshots that replaced the current one
    pub accepted_total: u64,
    /// Snapshots dropped by validation or conflict resolution
    pub rejected_total: u64,
    /// Candidates identical to the current snapshot
    pub unchanged_total: u64,
    /// Conflicts detected (accepted or not)
    pub conflicts_total: u64,
    /// Channel sends that failed
    pub broadcast_failures_total: u64,
    /// Store writes or removals that failed after retries
    pub store_failures_total: u64,
    /// Store entries that could not be parsed and were deleted
    pub malformed_entries_total: u64,
}
