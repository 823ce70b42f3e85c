//! The default `StreamBackend`: one `tokio::sync::broadcast` topic per
//! channel, created lazily on first use. No persistence, no consumer groups
//! — this is the backend the in-process demo graphs and unit tests run
//! against; `spice-stream-redis` is the durable counterpart.

use crate::backend::{BackendSubscription, StreamBackend};
use crate::envelope::EventEnvelope;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1000;

struct Topic {
    sender: broadcast::Sender<EventEnvelope>,
}

/// In-process event backend. Cloning is cheap — it shares its topics.
#[derive(Default)]
pub struct InMemoryBackend {
    topics: RwLock<HashMap<String, Topic>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_sender(&self, channel: &str, capacity: usize) -> broadcast::Sender<EventEnvelope> {
        if let Some(topic) = self.topics.read().expect("inmemory backend lock poisoned").get(channel) {
            return topic.sender.clone();
        }
        let mut topics = self.topics.write().expect("inmemory backend lock poisoned");
        topics
            .entry(channel.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(capacity.max(1));
                Topic { sender }
            })
            .sender
            .clone()
    }
}

#[async_trait]
impl StreamBackend for InMemoryBackend {
    async fn publish(&self, channel: &str, envelope: EventEnvelope) -> Result<String> {
        let id = envelope.id.clone();
        let sender = self.topic_sender(channel, DEFAULT_CAPACITY);
        // No subscribers yet is not an error — the envelope is simply unheard.
        let _ = sender.send(envelope);
        Ok(id)
    }

    async fn subscribe(&self, channel: &str) -> Result<BackendSubscription> {
        let sender = self.topic_sender(channel, DEFAULT_CAPACITY);
        Ok(BackendSubscription::new(sender.subscribe()))
    }

    async fn ensure_channel(&self, channel: &str, capacity: usize) -> Result<()> {
        self.topic_sender(channel, capacity);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.topics.write().expect("inmemory backend lock poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new("c", "T", "1.0.0", serde_json::json!({"n": 1}), StdHashMap::new())
    }

    #[tokio::test]
    async fn subscriber_receives_published_envelope() {
        let backend = InMemoryBackend::new();
        let mut sub = backend.subscribe("c").await.unwrap();
        backend.publish("c", envelope()).await.unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.channel_name, "c");
    }

    #[tokio::test]
    async fn publish_before_any_subscriber_is_not_an_error() {
        let backend = InMemoryBackend::new();
        let id = backend.publish("c", envelope()).await.unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn ensure_channel_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.ensure_channel("c", 10).await.unwrap();
        backend.ensure_channel("c", 10).await.unwrap();
        assert_eq!(backend.topics.read().unwrap().len(), 1);
    }
}
