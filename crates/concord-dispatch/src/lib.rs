//! Concord Dispatch - Update Dispatcher
//!
//! Fans [`AuthState`] out to UI subscribers in descending priority order.
//!
//! Updates come in two weights:
//! - **critical**: sign-in, sign-out, a subject switch, or an error appearing
//!   or clearing. Delivered synchronously inside [`UpdateDispatcher::publish`].
//! - **non-critical**: everything else (profile loaded, expiry pushed out,
//!   loading finished). Parked in a single pending slot and delivered once
//!   per batch window; only the latest parked state is delivered.
//!
//! A critical update discards anything pending, so subscribers never see an
//! older state after a newer one.

#![forbid(unsafe_code)]

/// The dispatcher
pub mod dispatcher;

/// Delivery metrics
pub mod metrics;

/// UI-facing auth state
pub mod state;

/// Structural transition checks
pub mod transitions;

pub use dispatcher::{DispatchOutcome, SubscribeOptions, SubscriptionHandle, UpdateDispatcher};
pub use metrics::{DeliveryMode, DispatchMetrics, DispatchMetricsSnapshot};
pub use state::{is_critical_change, AuthState};
pub use transitions::{validate_transition, TransitionIssue};
