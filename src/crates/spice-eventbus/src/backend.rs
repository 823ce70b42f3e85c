//! The seam between [`crate::bus::EventBus`] and whatever actually moves
//! envelopes around — an in-process fan-out topic or a Redis stream. Both
//! implementations hand subscribers the same `broadcast`-backed
//! [`BackendSubscription`], matching the orchestrator crate's WebSocket
//! broadcast pattern.

use crate::envelope::EventEnvelope;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// A live subscription to one channel's fan-out topic.
///
/// Lagged subscribers (slower than the topic's capacity) silently skip
/// forward rather than erroring — at-least-once delivery within a single
/// partition does not promise every subscriber sees every message if it
/// falls far enough behind.
pub struct BackendSubscription {
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl BackendSubscription {
    pub fn new(receiver: broadcast::Receiver<EventEnvelope>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// What a channel's storage/transport layer must provide. `spice-eventbus`'s
/// own `InMemoryBackend` and `spice-stream-redis`'s `RedisStreamBackend` both
/// implement this.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Appends `envelope` to `channel`, returning a backend-assigned message
    /// id (opaque to the bus).
    async fn publish(&self, channel: &str, envelope: EventEnvelope) -> Result<String>;

    /// Subscribes to `channel`, creating its fan-out topic if this is the
    /// first subscriber.
    async fn subscribe(&self, channel: &str) -> Result<BackendSubscription>;

    /// Ensures `channel`'s topic exists with the given buffer capacity,
    /// without subscribing to it. Idempotent.
    async fn ensure_channel(&self, channel: &str, capacity: usize) -> Result<()>;

    /// Releases background resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}
