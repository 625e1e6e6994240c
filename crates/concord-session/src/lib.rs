//! Concord Session - Session Lifecycle Manager
//!
//! Owns the credential. Everything else only ever sees the snapshot this
//! manager derives from it and hands to the [`concord_sync::StateSynchronizer`].
//!
//! ```text
//! NoSession ──establish──▶ Valid ──refresh──▶ RefreshPending ──▶ Valid
//!                            │                      │
//!                            │                      ├──▶ Expired
//!                            └──validate────────────┴──▶ Corrupted (terminal)
//! ```
//!
//! A refresh is single-flight: concurrent callers share one provider call
//! and one result.

#![forbid(unsafe_code)]

/// Session errors
pub mod error;

/// Shared in-flight operation
pub mod flight;

/// The lifecycle manager
pub mod manager;

/// Session-domain recovery pattern
pub mod recovery;

/// Session phase and read-only state view
pub mod state;

/// Credential validation
pub mod validation;

pub use error::SessionError;
pub use flight::SingleFlight;
pub use manager::SessionLifecycleManager;
pub use recovery::RevokedSessionRecovery;
pub use state::{SessionPhase, SessionState};
pub use validation::{validate_credential, validate_token_structure, ValidationResult};
