//! Inter-context broadcast channel interface
//!
//! Best-effort: a context that is not running when a message is sent never
//! sees it. The durable store is the fallback propagation path.

use crate::types::{AuthSnapshot, ContextId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// What a broadcast carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "snapshot", rename_all = "kebab-case")]
pub enum ChannelPayload {
    /// An accepted snapshot
    Snapshot(AuthSnapshot),
    /// The sender signed out; carries the signed-out snapshot it adopted
    Clear(AuthSnapshot),
}

impl ChannelPayload {
    /// Consume the payload, returning its snapshot
    pub fn into_snapshot(self) -> AuthSnapshot {
        match self {
            Self::Snapshot(snapshot) | Self::Clear(snapshot) => snapshot,
        }
    }
}

/// Wire envelope tagged with the origin context and send time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEnvelope {
    /// Context that sent this message
    pub origin: ContextId,
    /// Send timestamp (epoch ms)
    pub sent_at_ms: i64,
    /// Message body
    pub payload: ChannelPayload,
}

/// Channel transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Transport has been closed
    #[error("channel closed")]
    Closed,
}

/// Receiving half of a channel subscription
///
/// Dropping the receiver unsubscribes.
#[derive(Debug)]
pub struct ChannelReceiver {
    inner: broadcast::Receiver<ChannelEnvelope>,
}

impl ChannelReceiver {
    /// Wrap a tokio broadcast receiver
    pub fn new(inner: broadcast::Receiver<ChannelEnvelope>) -> Self {
        Self { inner }
    }

    /// Wait for the next envelope; `None` once the channel is closed
    ///
    /// Lagged receivers skip what they missed. The store safety net covers
    /// the gap.
    pub async fn recv(&mut self) -> Option<ChannelEnvelope> {
        loop {
            match self.inner.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "channel receiver lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is queued
    pub fn try_recv(&mut self) -> Option<ChannelEnvelope> {
        loop {
            match self.inner.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "channel receiver lagged, messages dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Fire-and-forget broadcast between live contexts of one origin
pub trait ContextChannel: Send + Sync {
    /// Broadcast an envelope to every other live context
    fn send(&self, envelope: &ChannelEnvelope) -> Result<(), ChannelError>;

    /// Subscribe to envelopes sent after this call
    fn subscribe(&self) -> Result<ChannelReceiver, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receiver_yields_envelopes_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let mut receiver = ChannelReceiver::new(rx);
        let origin = ContextId::new();

        for version in 1..=3 {
            tx.send(ChannelEnvelope {
                origin,
                sent_at_ms: version as i64,
                payload: ChannelPayload::Snapshot(AuthSnapshot::signed_out(version, 0)),
            })
            .unwrap();
        }
        drop(tx);

        let mut versions = Vec::new();
        while let Some(envelope) = receiver.recv().await {
            versions.push(envelope.payload.into_snapshot().version);
        }
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn lagged_receiver_skips_to_latest() {
        let (tx, rx) = broadcast::channel(2);
        let mut receiver = ChannelReceiver::new(rx);
        let origin = ContextId::new();

        for version in 1..=5 {
            tx.send(ChannelEnvelope {
                origin,
                sent_at_ms: 0,
                payload: ChannelPayload::Clear(AuthSnapshot::signed_out(version, 0)),
            })
            .unwrap();
        }

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.payload.into_snapshot().version, 4);
    }
}
