//! Effect interfaces for external collaborators
//!
//! Pure signatures only. Memory, filesystem and system handlers live in
//! `concord-effects`; mocks live in `concord-testkit`.

mod channel;
mod provider;
mod store;
mod time;

pub use channel::{ChannelEnvelope, ChannelError, ChannelPayload, ChannelReceiver, ContextChannel};
pub use provider::{IdentityProvider, ProviderError, ProviderEvent};
pub use store::{DurableStore, StoreError};
pub use time::PhysicalClock;
