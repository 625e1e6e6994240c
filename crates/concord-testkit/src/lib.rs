//! Concord Testing Infrastructure
//!
//! Deterministic doubles for the effect interfaces plus credential fixtures.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! concord-testkit = { path = "../concord-testkit" }
//! ```
//!
//! ```rust,no_run
//! use concord_testkit::*;
//! use std::time::Duration;
//!
//! let clock = ManualClock::new(1_700_000_000_000);
//! let credential = credential_for("u1", clock.now(), Duration::from_secs(3600));
//! let provider = MockIdentityProvider::new();
//! provider.set_refresh_result(Ok(credential));
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod clock;
pub mod fixtures;
pub mod provider;
pub mod store;

pub use clock::ManualClock;
pub use fixtures::{credential_for, jwt_like_token, init_test_tracing};
pub use provider::MockIdentityProvider;
pub use store::FlakyStore;
