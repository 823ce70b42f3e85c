//! Composable subscription filters. Filters run after deserialization and
//! before delivery — a filter that never matches still costs a deserialize.

use crate::envelope::EventEnvelope;
use serde_json::Value;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>;

/// A composable predicate over an [`EventEnvelope`].
#[derive(Clone)]
pub struct EventFilter {
    predicate: Predicate,
}

impl EventFilter {
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        (self.predicate)(envelope)
    }

    /// Matches only envelopes of the given event type.
    pub fn by_type(event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        Self {
            predicate: Arc::new(move |env| env.event_type == event_type),
        }
    }

    /// Matches envelopes whose `metadata[key]` equals `value`.
    pub fn by_metadata(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        Self {
            predicate: Arc::new(move |env| env.metadata.get(&key) == Some(&value)),
        }
    }

    pub fn and(self, other: EventFilter) -> Self {
        let a = self.predicate;
        let b = other.predicate;
        Self {
            predicate: Arc::new(move |env| a(env) && b(env)),
        }
    }

    pub fn or(self, other: EventFilter) -> Self {
        let a = self.predicate;
        let b = other.predicate;
        Self {
            predicate: Arc::new(move |env| a(env) || b(env)),
        }
    }
}
