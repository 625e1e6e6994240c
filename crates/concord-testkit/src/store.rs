//! Durable store with injectable failures

use concord_core::{DurableStore, StoreError};
use concord_effects::MemoryStore;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// [`MemoryStore`] wrapper that fails on demand
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    unavailable: AtomicBool,
    quota_exceeded: AtomicBool,
    failing_writes: AtomicU32,
    write_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            quota_exceeded: AtomicBool::new(false),
            failing_writes: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
        }
    }

    /// Backing store, bypassing failure injection
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail every operation until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` writes or removals
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Reject every `set` as over quota until switched back
    pub fn set_quota_exceeded(&self, exceeded: bool) {
        self.quota_exceeded.store(exceeded, Ordering::SeqCst);
    }

    /// Writes and removals attempted so far, failed ones included
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected outage"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::unavailable("injected write failure"));
        }
        Ok(())
    }
}

impl DurableStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_write()?;
        if self.quota_exceeded.load(Ordering::SeqCst) {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
            });
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.remove(key)
    }
}
