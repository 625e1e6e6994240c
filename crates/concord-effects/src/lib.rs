//! Concord Effects - Production Handlers
//!
//! Stateless or self-contained implementations of the effect interfaces
//! declared in `concord-core`. Deterministic test doubles (manual clocks,
//! scripted providers, faulty stores) live in `concord-testkit`.

#![forbid(unsafe_code)]

/// In-process broadcast channel between contexts
pub mod channel;

/// Durable store handlers
pub mod store;

/// Background task supervision
pub mod tasks;

/// System clock
pub mod time;

pub use channel::{MemoryChannel, MemoryChannelHub};
pub use store::{FilesystemStore, MemoryStore};
pub use tasks::TaskRegistry;
pub use time::SystemClock;
