//! Error taxonomy for the event bus, mirroring `spice_core::error::SpiceError`'s
//! shape: a closed `thiserror` enum, a stable `code()`, and a `Result<T>` alias.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EventBusError>;

/// Errors raised by [`crate::bus::EventBus`] and its backends.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// `channel()` or `publish()` referenced a `(type, version)` pair that was
    /// never registered with the schema registry.
    #[error("schema not registered: {event_type}:{version}")]
    SchemaNotRegistered { event_type: String, version: String },

    /// A channel name was used before `channel()` created it.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// A channel name was registered twice with incompatible configuration.
    #[error("channel already exists: {0}")]
    ChannelExists(String),

    /// Publish-time schema or payload validation failed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Serialization or deserialization of an event payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend (in-memory fan-out, Redis stream, ...) failed to deliver.
    #[error("backend error: {0}")]
    Backend(String),

    /// The bus or a subscription was closed.
    #[error("event bus closed")]
    Closed,
}

impl EventBusError {
    pub fn code(&self) -> &'static str {
        match self {
            EventBusError::SchemaNotRegistered { .. } => "SCHEMA_NOT_REGISTERED",
            EventBusError::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            EventBusError::ChannelExists(_) => "CHANNEL_EXISTS",
            EventBusError::Validation(_) => "VALIDATION",
            EventBusError::Serialization(_) => "SERIALIZATION",
            EventBusError::Backend(_) => "BACKEND_ERROR",
            EventBusError::Closed => "CLOSED",
        }
    }

    /// Whether this failure should route the originating envelope to the DLQ
    /// rather than propagate to the publisher. Validation and serialization
    /// failures are the bus's own business; backend failures are not.
    pub fn is_dead_letter_worthy(&self) -> bool {
        matches!(
            self,
            EventBusError::Validation(_)
                | EventBusError::Serialization(_)
                | EventBusError::SchemaNotRegistered { .. }
        )
    }
}
