//! Concord Sync - State Synchronizer
//!
//! Keeps one [`concord_core::AuthSnapshot`] consistent across every live
//! execution context of an origin. Propagation uses two paths:
//!
//! - the context channel, for low-latency fan-out to running contexts
//! - the durable store, which newly started contexts read on boot and
//!   which a periodic poll re-reads as a safety net
//!
//! Every candidate snapshot, whatever its source, goes through the same
//! acceptance path: structural validation, then [`resolve_conflict`].

#![forbid(unsafe_code)]

/// Pure conflict resolution between two snapshots
pub mod conflict;

/// Store-domain recovery pattern
pub mod recovery;

/// Synchronizer counters
pub mod stats;

/// The synchronizer service
pub mod synchronizer;

pub use conflict::{resolve_conflict, Decision};
pub use recovery::StoreQuotaRecovery;
pub use stats::{SyncStats, SyncStatsSnapshot};
pub use synchronizer::{PublishOutcome, SnapshotObserver, StateSynchronizer};
