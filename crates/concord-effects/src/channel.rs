//! In-process broadcast channel
//!
//! A [`MemoryChannelHub`] stands in for an origin-wide broadcast transport.
//! Each context takes its own [`MemoryChannel`] endpoint from the hub.
//! Envelopes reach every subscriber, the sender's own included; receivers
//! filter by origin.

use concord_core::{ChannelEnvelope, ChannelError, ChannelReceiver, ContextChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug)]
struct HubInner {
    sender: broadcast::Sender<ChannelEnvelope>,
    closed: AtomicBool,
}

/// Shared transport for every context of one origin
#[derive(Debug, Clone)]
pub struct MemoryChannelHub {
    inner: Arc<HubInner>,
}

impl MemoryChannelHub {
    /// Hub with the default per-receiver buffer
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Hub whose receivers buffer at most `capacity` envelopes before lagging
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                sender,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// New endpoint for one context
    pub fn endpoint(&self) -> MemoryChannel {
        MemoryChannel {
            hub: self.inner.clone(),
        }
    }

    /// Close the transport; every endpoint fails from now on
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Number of live receivers across all endpoints
    pub fn receiver_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for MemoryChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's endpoint on a [`MemoryChannelHub`]
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    hub: Arc<HubInner>,
}

impl ContextChannel for MemoryChannel {
    fn send(&self, envelope: &ChannelEnvelope) -> Result<(), ChannelError> {
        if self.hub.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        // No live receivers is not an error for a best-effort broadcast.
        let delivered = self.hub.sender.send(envelope.clone()).unwrap_or(0);
        trace!(origin = %envelope.origin, delivered, "broadcast envelope");
        Ok(())
    }

    fn subscribe(&self) -> Result<ChannelReceiver, ChannelError> {
        if self.hub.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        Ok(ChannelReceiver::new(self.hub.sender.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{AuthSnapshot, ChannelPayload, ContextId};

    fn envelope(origin: ContextId, version: u64) -> ChannelEnvelope {
        ChannelEnvelope {
            origin,
            sent_at_ms: 0,
            payload: ChannelPayload::Snapshot(AuthSnapshot::signed_out(version, 0)),
        }
    }

    #[tokio::test]
    async fn endpoints_see_each_others_messages() {
        let hub = MemoryChannelHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let mut rx_b = b.subscribe().unwrap();

        let origin = ContextId::new();
        a.send(&envelope(origin, 7)).unwrap();

        let received = rx_b.recv().await.unwrap();
        assert_eq!(received.origin, origin);
        assert_eq!(received.payload.into_snapshot().version, 7);
    }

    #[test]
    fn send_without_receivers_succeeds() {
        let hub = MemoryChannelHub::new();
        hub.endpoint().send(&envelope(ContextId::new(), 1)).unwrap();
    }

    #[test]
    fn closed_hub_rejects_everything() {
        let hub = MemoryChannelHub::new();
        let endpoint = hub.endpoint();
        hub.close();
        assert_eq!(
            endpoint.send(&envelope(ContextId::new(), 1)),
            Err(ChannelError::Closed)
        );
        assert!(endpoint.subscribe().is_err());
    }
}
