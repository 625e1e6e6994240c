//! Scripted identity provider

use async_trait::async_trait;
use concord_core::{Credential, IdentityProvider, ProviderError, ProviderEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

type RefreshResult = Result<Credential, ProviderError>;

/// Identity provider driven entirely by the test
///
/// Refresh answers come from a queue first, then from a repeating fallback.
#[derive(Debug)]
pub struct MockIdentityProvider {
    refresh_calls: AtomicUsize,
    delay: Mutex<Duration>,
    queued: Mutex<VecDeque<RefreshResult>>,
    fallback: Mutex<Option<RefreshResult>>,
    session: Mutex<Result<Option<Credential>, ProviderError>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            refresh_calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            session: Mutex::new(Ok(None)),
            events,
        }
    }

    /// Every refresh sleeps this long before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Answer the next refresh with `result`
    pub fn push_refresh(&self, result: RefreshResult) {
        self.queued.lock().push_back(result);
    }

    /// Answer every refresh with `result` once the queue is empty
    pub fn set_refresh_result(&self, result: RefreshResult) {
        *self.fallback.lock() = Some(result);
    }

    /// What `current_session` returns
    pub fn set_current_session(&self, session: Result<Option<Credential>, ProviderError>) {
        *self.session.lock() = session;
    }

    /// Push an out-of-band event to subscribers
    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    /// Number of `refresh_credential` calls so far
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn refresh_credential(&self) -> Result<Credential, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queued.lock().pop_front();
        match queued {
            Some(result) => result,
            None => self
                .fallback
                .lock()
                .clone()
                .unwrap_or_else(|| Err(ProviderError::unavailable("no scripted response"))),
        }
    }

    async fn current_session(&self) -> Result<Option<Credential>, ProviderError> {
        self.session.lock().clone()
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::credential_for;

    #[tokio::test(start_paused = true)]
    async fn queue_then_fallback() {
        let provider = MockIdentityProvider::new();
        provider.push_refresh(Err(ProviderError::network("first")));
        provider.set_refresh_result(Ok(credential_for("u1", 0, Duration::from_secs(60))));
        provider.set_delay(Duration::from_millis(200));

        assert!(provider.refresh_credential().await.is_err());
        assert!(provider.refresh_credential().await.is_ok());
        assert!(provider.refresh_credential().await.is_ok());
        assert_eq!(provider.refresh_calls(), 3);
    }
}
