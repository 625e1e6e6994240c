//! Last-writer-wins conflict resolution
//!
//! Two snapshots conflict when they name different subjects, disagree on
//! whether anyone is signed in, or have version counters further apart than
//! the configured gap. A conflict is settled by mutation timestamp; a tie
//! keeps the current snapshot. Without a conflict the higher (or equal)
//! version is accepted.
//!
//! A version-gap conflict never moves the version backwards: the incoming
//! side must also carry the higher version, so accepted versions for one
//! subject stay monotonic no matter how skewed the clocks are.

use concord_core::{AuthSnapshot, ConflictKind, ConflictResolution};

/// Outcome of comparing an incoming snapshot against the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the incoming snapshot replaces the current one
    pub accepted: bool,
    /// Conflict category, if the snapshots conflicted
    pub conflict: Option<ConflictKind>,
}

impl Decision {
    /// How the conflict (if any) was settled
    pub fn resolution(&self) -> Option<ConflictResolution> {
        self.conflict.map(|_| {
            if self.accepted {
                ConflictResolution::AcceptedIncoming
            } else {
                ConflictResolution::KeptCurrent
            }
        })
    }
}

/// Classify the conflict between `current` and `incoming`, if any
pub fn classify_conflict(
    current: &AuthSnapshot,
    incoming: &AuthSnapshot,
    max_version_gap: u64,
) -> Option<ConflictKind> {
    if current.is_authenticated != incoming.is_authenticated {
        Some(ConflictKind::AuthenticationChanged)
    } else if current.subject_id != incoming.subject_id {
        Some(ConflictKind::SubjectChanged)
    } else if current.version.abs_diff(incoming.version) > max_version_gap {
        Some(ConflictKind::VersionGap)
    } else {
        None
    }
}

/// Decide whether `incoming` replaces `current`
pub fn resolve_conflict(
    current: &AuthSnapshot,
    incoming: &AuthSnapshot,
    max_version_gap: u64,
) -> Decision {
    let conflict = classify_conflict(current, incoming, max_version_gap);
    let accepted = match conflict {
        None => incoming.version >= current.version,
        Some(ConflictKind::VersionGap) => {
            incoming.version > current.version
                && incoming.updated_at_epoch_ms > current.updated_at_epoch_ms
        }
        Some(_) => incoming.updated_at_epoch_ms > current.updated_at_epoch_ms,
    };
    Decision { accepted, conflict }
}
