//! The event bus itself: schema-gated channel creation, publish, and typed
//! subscribe, backed by whatever [`StreamBackend`] is plugged in.

use crate::backend::StreamBackend;
use crate::channel::{standard_channel_configs, ChannelConfig};
use crate::dlq::{DeadLetterSink, InMemoryDeadLetterQueue};
use crate::envelope::{EventEnvelope, TypedEvent};
use crate::error::{EventBusError, Result};
use crate::filter::EventFilter;
use crate::schema::SchemaRegistry;
use crate::stats::{BusStats, BusStatsSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

/// Typed publish/subscribe bus with schema enforcement, filters, and a DLQ.
///
/// ```rust,ignore
/// let bus = EventBus::new(Arc::new(InMemoryBackend::new()));
/// bus.registry().register("MyEvent", "1.0.0");
/// bus.channel(ChannelConfig::new("my.events", "MyEvent", "1.0.0")).await?;
/// bus.publish("my.events", "MyEvent", "1.0.0", &payload, HashMap::new()).await?;
/// let mut sub = bus.subscribe::<MyEvent>("my.events", None).await?;
/// let received = sub.recv().await;
/// ```
pub struct EventBus {
    backend: Arc<dyn StreamBackend>,
    registry: Arc<SchemaRegistry>,
    channels: RwLock<HashMap<String, ChannelConfig>>,
    stats: Arc<BusStats>,
    dlq: Arc<dyn DeadLetterSink>,
}

impl EventBus {
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        Self {
            backend,
            registry: Arc::new(SchemaRegistry::new()),
            channels: RwLock::new(HashMap::new()),
            stats: Arc::new(BusStats::new()),
            dlq: Arc::new(InMemoryDeadLetterQueue::new()),
        }
    }

    pub fn with_dlq(mut self, dlq: Arc<dyn DeadLetterSink>) -> Self {
        self.dlq = dlq;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dead_letter_queue(&self) -> &Arc<dyn DeadLetterSink> {
        &self.dlq
    }

    /// Registers a channel. Fails unless `(event_type, schema_version)` is
    /// already known to the schema registry.
    pub async fn channel(&self, config: ChannelConfig) -> Result<()> {
        if !self.registry.is_registered(&config.event_type, &config.schema_version) {
            return Err(EventBusError::SchemaNotRegistered {
                event_type: config.event_type.clone(),
                version: config.schema_version.clone(),
            });
        }
        self.backend.ensure_channel(&config.name, config.history).await?;
        self.channels
            .write()
            .expect("eventbus channel registry lock poisoned")
            .insert(config.name.clone(), config);
        self.stats.channel_registered();
        Ok(())
    }

    /// Registers the four predefined channels (`spice.graph.lifecycle`,
    /// `spice.node.lifecycle`, `spice.toolcalls`, `spice.system`), registering
    /// their schema identities first so `channel()` does not reject them.
    pub async fn with_standard_channels(self) -> Result<Self> {
        for config in standard_channel_configs() {
            self.registry.register(&config.event_type, &config.schema_version);
            self.channel(config).await?;
        }
        Ok(self)
    }

    fn channel_config(&self, channel: &str) -> Result<ChannelConfig> {
        self.channels
            .read()
            .expect("eventbus channel registry lock poisoned")
            .get(channel)
            .cloned()
            .ok_or_else(|| EventBusError::ChannelNotFound(channel.to_string()))
    }

    /// Serializes `payload`, validates it against the channel's registered
    /// schema, and hands it to the backend. Validation failures are routed to
    /// the DLQ (if the channel allows it) rather than simply propagated —
    /// the originating call still sees the error, but a redelivery of the
    /// same malformed payload will not loop.
    pub async fn publish<T: Serialize>(
        &self,
        channel: &str,
        event_type: &str,
        schema_version: &str,
        payload: &T,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        let config = self.channel_config(channel)?;
        let payload_value = serde_json::to_value(payload)?;

        if let Err(e) = self.registry.validate(event_type, schema_version, &payload_value) {
            self.stats.record_error();
            if config.enable_dlq && e.is_dead_letter_worthy() {
                let envelope = EventEnvelope::new(channel, event_type, schema_version, payload_value, metadata);
                self.dlq.send(envelope, e.to_string(), None);
                self.stats.record_dead_letter();
            }
            return Err(e);
        }

        let envelope = EventEnvelope::new(channel, event_type, schema_version, payload_value, metadata);
        let id = self.backend.publish(channel, envelope).await?;
        self.stats.record_published();
        Ok(id)
    }

    /// Subscribes to `channel`, deserializing each delivered envelope's
    /// payload as `T` and applying `filter` before handing it back.
    pub async fn subscribe<T: DeserializeOwned>(
        &self,
        channel: &str,
        filter: Option<EventFilter>,
    ) -> Result<Subscription<T>> {
        self.channel_config(channel)?;
        let inner = self.backend.subscribe(channel).await?;
        self.stats.subscriber_added();
        Ok(Subscription {
            inner,
            filter,
            dlq: self.dlq.clone(),
            stats: self.stats.clone(),
            _marker: PhantomData,
        })
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

/// A live, typed subscription returned by [`EventBus::subscribe`].
pub struct Subscription<T> {
    inner: crate::backend::BackendSubscription,
    filter: Option<EventFilter>,
    dlq: Arc<dyn DeadLetterSink>,
    stats: Arc<BusStats>,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Awaits the next envelope matching this subscription's filter,
    /// skipping (and dead-lettering) anything that fails to deserialize.
    pub async fn recv(&mut self) -> Option<TypedEvent<T>> {
        loop {
            let envelope = self.inner.recv().await?;
            if let Some(filter) = &self.filter {
                if !filter.matches(&envelope) {
                    continue;
                }
            }
            match serde_json::from_value::<T>(envelope.payload.clone()) {
                Ok(event) => {
                    self.stats.record_consumed();
                    return Some(TypedEvent::new(event, envelope));
                }
                Err(e) => {
                    self.stats.record_error();
                    self.dlq.send(envelope, format!("deserialize failed: {e}"), Some(e.to_string()));
                    self.stats.record_dead_letter();
                    continue;
                }
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.stats.subscriber_removed();
    }
}

/// Distinct `(channelName)` set a bus has ever created — used by
/// `spice-cli` demos to report what's live without reaching into internals.
pub fn channel_names(bus: &EventBus) -> HashSet<String> {
    bus.channels
        .read()
        .expect("eventbus channel registry lock poisoned")
        .keys()
        .cloned()
        .collect()
}
