//! # spice-eventbus — typed pub/sub with schema enforcement and a DLQ
//!
//! A channel carries one registered `(eventType, schemaVersion)` pair.
//! Publishing serializes the event, validates it against the
//! [`schema::SchemaRegistry`], wraps it in an [`envelope::EventEnvelope`],
//! and hands it to a [`backend::StreamBackend`] — the in-process
//! [`inmemory::InMemoryBackend`] here, or `spice-stream-redis`'s durable
//! consumer-group-backed backend. Subscribers get a lazy, filtered sequence
//! of [`envelope::TypedEvent`]s; anything that fails to deserialize or
//! violates its schema is dead-lettered rather than silently dropped.
//!
//! ## Standard channels
//!
//! [`channel::standard_channel_configs`] names the four predefined channels:
//! `spice.graph.lifecycle`, `spice.node.lifecycle`, `spice.toolcalls`, and
//! `spice.system`. [`bus::EventBus::with_standard_channels`] registers all
//! four in one call.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spice_eventbus::bus::EventBus;
//! use spice_eventbus::channel::ChannelConfig;
//! use spice_eventbus::inmemory::InMemoryBackend;
//! use std::sync::Arc;
//!
//! # #[derive(serde::Serialize, serde::Deserialize)] struct MyEvent { n: u32 }
//! # async fn run() -> spice_eventbus::error::Result<()> {
//! let bus = EventBus::new(Arc::new(InMemoryBackend::new()));
//! bus.registry().register("MyEvent", "1.0.0");
//! bus.channel(ChannelConfig::new("my.events", "MyEvent", "1.0.0")).await?;
//!
//! let mut sub = bus.subscribe::<MyEvent>("my.events", None).await?;
//! bus.publish("my.events", "MyEvent", "1.0.0", &MyEvent { n: 1 }, Default::default()).await?;
//! let received = sub.recv().await.unwrap();
//! assert_eq!(received.event.n, 1);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bus;
pub mod channel;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod inmemory;
pub mod schema;
pub mod stats;

pub use backend::{BackendSubscription, StreamBackend};
pub use bus::{EventBus, Subscription};
pub use channel::ChannelConfig;
pub use dlq::{DeadLetterRecord, DeadLetterSink, InMemoryDeadLetterQueue};
pub use envelope::{EventEnvelope, TypedEvent};
pub use error::{EventBusError, Result};
pub use filter::EventFilter;
pub use inmemory::InMemoryBackend;
pub use schema::SchemaRegistry;
pub use stats::{BusStats, BusStatsSnapshot};
