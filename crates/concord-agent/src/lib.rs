//! Concord Agent - Runtime Composition
//!
//! Bootstrap for one execution context. Build an [`AuthRuntime`] with
//! [`AuthRuntimeBuilder`], start it, and subscribe UI code to it:
//!
//! ```rust,ignore
//! let runtime = AuthRuntimeBuilder::new()
//!     .with_config(CoordinatorConfig::default())
//!     .with_store(store)
//!     .with_channel(Arc::new(hub.endpoint()))
//!     .with_provider(provider)
//!     .build()?;
//!
//! runtime.start().await?;
//! let handle = runtime.subscribe(|state| render(state), SubscribeOptions::new());
//! ```
//!
//! There are no process-wide singletons: every context builds its own runtime
//! and shares only the durable store and the broadcast channel.

#![forbid(unsafe_code)]

mod bridge;

/// Runtime builder
pub mod builder;

/// Runtime errors
pub mod errors;

/// The runtime
pub mod runtime;

pub use builder::AuthRuntimeBuilder;
pub use errors::{AgentError, Result};
pub use runtime::AuthRuntime;

pub use concord_dispatch::{AuthState, SubscribeOptions, SubscriptionHandle};

/// Install a `tracing` subscriber honouring `RUST_LOG`, falling back to `default_filter`
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
