//! Snapshot, credential and identifier types

mod credential;
mod identifiers;
mod snapshot;

pub use credential::{Credential, SubjectClaims};
pub use identifiers::ContextId;
pub use snapshot::{AuthSnapshot, SnapshotValidationError};
