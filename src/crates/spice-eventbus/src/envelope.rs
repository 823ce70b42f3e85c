//! The wire envelope every published event travels in, and the typed view a
//! subscriber receives after deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The backend-agnostic envelope around one published event.
///
/// Field names match the stream wire format named in the external-interfaces
/// section: `id, channelName, eventType, schemaVersion, payload, metadata,
/// timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "channelName")]
    pub channel_name: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub payload: Value,
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(
        channel_name: impl Into<String>,
        event_type: impl Into<String>,
        schema_version: impl Into<String>,
        payload: Value,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_name: channel_name.into(),
            event_type: event_type.into(),
            schema_version: schema_version.into(),
            payload,
            metadata,
            timestamp: Utc::now(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// What a subscriber actually receives: the deserialized event, the raw
/// envelope it arrived in, and the local receive time.
#[derive(Debug, Clone)]
pub struct TypedEvent<T> {
    pub event: T,
    pub envelope: EventEnvelope,
    pub received_at: DateTime<Utc>,
}

impl<T> TypedEvent<T> {
    pub fn new(event: T, envelope: EventEnvelope) -> Self {
        Self {
            event,
            envelope,
            received_at: Utc::now(),
        }
    }
}
