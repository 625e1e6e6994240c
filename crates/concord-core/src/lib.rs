//! Concord Core - Shared Foundation
//!
//! Types and interfaces shared by every Concord crate. Nothing in here owns a
//! running task; handlers live in `concord-effects` and the stateful services
//! live in `concord-sync`, `concord-session` and `concord-dispatch`.
//!
//! ## Contents
//! - [`AuthSnapshot`]: the unit of synchronized truth between execution contexts
//! - [`Credential`]: opaque token pair owned by the session lifecycle manager
//! - Effect interfaces: [`DurableStore`], [`ContextChannel`], [`IdentityProvider`],
//!   [`PhysicalClock`]
//! - Recovery layer: [`RetryPolicy`] and the [`RecoveryRegistry`] pattern table
//! - [`EventBus`]: typed lifecycle/sync event fan-out with per-handler isolation
//! - [`CoordinatorConfig`]: TOML/env configurable settings for all services

#![forbid(unsafe_code)]

/// Configuration sections for every service
pub mod config;

/// Effect interfaces for external collaborators
pub mod effects;

/// Unified error handling
pub mod errors;

/// Lifecycle and synchronization events
pub mod events;

/// Classification-driven recovery strategies
pub mod recovery;

/// Retry and backoff
pub mod reliability;

/// Snapshot, credential and identifier types
pub mod types;

pub use config::{
    ConfigError, CoordinatorConfig, DispatchConfig, RecoveryConfig, SessionConfig, SyncConfig,
    TransitionPolicy,
};
pub use effects::{
    ChannelEnvelope, ChannelError, ChannelPayload, ChannelReceiver, ContextChannel, DurableStore,
    IdentityProvider, PhysicalClock, ProviderError, ProviderEvent, StoreError,
};
pub use errors::{CoordinatorError, ErrorClass, Result, UserFacingError};
pub use events::{AuthEvent, ConflictKind, ConflictResolution, EventBus, EventSubscription};
pub use recovery::{RecoveryPattern, RecoveryRegistry, RecoveryResult};
pub use reliability::{
    with_timeout, BackoffStrategy, RecoveryAttempt, ReliabilityError, RetryPolicy, RetryResult,
};
pub use types::{AuthSnapshot, ContextId, Credential, SnapshotValidationError, SubjectClaims};
