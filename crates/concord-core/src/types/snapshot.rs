//! Authentication snapshot - the unit of synchronized truth
//!
//! A snapshot is either fully valid or rejected. Nothing downstream of
//! [`AuthSnapshot::validate`] ever holds a partially valid snapshot.

use serde::{Deserialize, Serialize};

/// Serializable "am I signed in, as whom, until when" record
///
/// The persisted layout is the camelCase JSON form of this struct stored under
/// a single durable-store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    /// Whether a principal is signed in
    pub is_authenticated: bool,
    /// Identity of the signed-in principal, `None` iff not authenticated
    pub subject_id: Option<String>,
    /// Email of the signed-in principal, `None` iff not authenticated
    pub subject_email: Option<String>,
    /// Credential expiry in epoch milliseconds
    pub credential_expiry_epoch_ms: Option<i64>,
    /// Whether auxiliary profile data has been fetched for this subject
    pub profile_loaded: bool,
    /// Monotonic mutation counter
    pub version: u64,
    /// Wall-clock time of last mutation; only used to break conflict ties
    pub updated_at_epoch_ms: i64,
}

/// Structural problems that cause a snapshot to be rejected outright
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotValidationError {
    /// Authenticated snapshot without a subject id
    #[error("authenticated snapshot is missing a subject id")]
    MissingSubject,
    /// Authenticated snapshot without a subject email
    #[error("authenticated snapshot is missing a subject email")]
    MissingEmail,
    /// Unauthenticated snapshot still carrying identity fields
    #[error("unauthenticated snapshot carries identity fields")]
    UnexpectedIdentity,
    /// Negative mutation timestamp
    #[error("updatedAtEpochMs must not be negative, got {0}")]
    NegativeTimestamp(i64),
}

impl AuthSnapshot {
    /// The signed-out snapshot a fresh context starts from
    pub fn signed_out(version: u64, updated_at_epoch_ms: i64) -> Self {
        Self {
            is_authenticated: false,
            subject_id: None,
            subject_email: None,
            credential_expiry_epoch_ms: None,
            profile_loaded: false,
            version,
            updated_at_epoch_ms,
        }
    }

    /// Authenticated snapshot for a subject
    pub fn authenticated(
        subject_id: impl Into<String>,
        subject_email: impl Into<String>,
        credential_expiry_epoch_ms: i64,
        version: u64,
        updated_at_epoch_ms: i64,
    ) -> Self {
        Self {
            is_authenticated: true,
            subject_id: Some(subject_id.into()),
            subject_email: Some(subject_email.into()),
            credential_expiry_epoch_ms: Some(credential_expiry_epoch_ms),
            profile_loaded: false,
            version,
            updated_at_epoch_ms,
        }
    }

    /// Signed-out snapshot that follows this one in the version sequence
    pub fn signed_out_successor(&self, now_ms: i64) -> Self {
        Self::signed_out(self.version.saturating_add(1), self.next_timestamp(now_ms))
    }

    /// Copy of this snapshot with the version bumped and timestamp refreshed
    pub fn successor(&self, now_ms: i64) -> Self {
        Self {
            version: self.version.saturating_add(1),
            updated_at_epoch_ms: self.next_timestamp(now_ms),
            ..self.clone()
        }
    }

    /// Authenticated snapshot that follows this one in the version sequence
    pub fn authenticated_successor(
        &self,
        subject_id: impl Into<String>,
        subject_email: impl Into<String>,
        credential_expiry_epoch_ms: i64,
        now_ms: i64,
    ) -> Self {
        Self::authenticated(
            subject_id,
            subject_email,
            credential_expiry_epoch_ms,
            self.version.saturating_add(1),
            self.next_timestamp(now_ms),
        )
    }

    /// Mutation timestamp for a successor: `now_ms`, or one past ours if the
    /// clock has not moved (successors must win tie-breaks against us).
    fn next_timestamp(&self, now_ms: i64) -> i64 {
        now_ms.max(self.updated_at_epoch_ms.saturating_add(1))
    }

    /// Same identity as `other` (both signed out, or same subject)
    pub fn same_subject(&self, other: &AuthSnapshot) -> bool {
        self.is_authenticated == other.is_authenticated && self.subject_id == other.subject_id
    }

    /// Structural validation applied to every incoming snapshot
    pub fn validate(&self) -> Result<(), SnapshotValidationError> {
        if self.updated_at_epoch_ms < 0 {
            return Err(SnapshotValidationError::NegativeTimestamp(
                self.updated_at_epoch_ms,
            ));
        }

        if self.is_authenticated {
            match self.subject_id.as_deref() {
                Some(id) if !id.trim().is_empty() => {}
                _ => return Err(SnapshotValidationError::MissingSubject),
            }
            match self.subject_email.as_deref() {
                Some(email) if !email.trim().is_empty() => {}
                _ => return Err(SnapshotValidationError::MissingEmail),
            }
        } else if self.subject_id.is_some() || self.subject_email.is_some() {
            return Err(SnapshotValidationError::UnexpectedIdentity);
        }

        Ok(())
    }
}
