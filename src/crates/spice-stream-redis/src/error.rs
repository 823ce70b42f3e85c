//! Error taxonomy for the Redis stream backend, mirroring
//! `spice_eventbus::error::EventBusError`'s shape. Kept as its own closed enum
//! (rather than reusing `EventBusError` directly) because Redis operations
//! fail in ways the bus itself has no vocabulary for — connection pool
//! exhaustion, a consumer group that already exists, a malformed stream
//! entry. [`StreamBackendError`] converts into `EventBusError::Backend` at
//! the `StreamBackend` trait boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamBackendError>;

/// Errors raised by [`crate::backend::RedisStreamBackend`] and its
/// background workers.
#[derive(Debug, Error)]
pub enum StreamBackendError {
    /// The underlying `redis` client or command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Checking out a connection from the `deadpool-redis` pool failed.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Building the pool itself failed (bad config, unreachable host at
    /// construction time).
    #[error("pool configuration error: {0}")]
    PoolConfig(String),

    /// A stream entry's fields didn't decode into the documented wire
    /// format (`id, channelName, eventType, schemaVersion, payload,
    /// metadata, timestamp`).
    #[error("malformed stream entry in '{channel}': {reason}")]
    MalformedEntry { channel: String, reason: String },

    /// `metadata`/`payload` JSON in a stream entry failed to parse.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend's background workers are shutting down or have already
    /// shut down.
    #[error("stream backend closed")]
    Closed,
}

impl StreamBackendError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamBackendError::Redis(_) => "REDIS_ERROR",
            StreamBackendError::Pool(_) => "POOL_ERROR",
            StreamBackendError::PoolConfig(_) => "POOL_CONFIG_ERROR",
            StreamBackendError::MalformedEntry { .. } => "MALFORMED_ENTRY",
            StreamBackendError::Serialization(_) => "SERIALIZATION",
            StreamBackendError::Closed => "CLOSED",
        }
    }
}

/// The only place a Redis-specific failure crosses into the bus's own error
/// vocabulary: every variant becomes a `Backend` failure, since none of them
/// are schema/validation problems the bus would route to the DLQ itself.
impl From<StreamBackendError> for spice_eventbus::error::EventBusError {
    fn from(err: StreamBackendError) -> Self {
        spice_eventbus::error::EventBusError::Backend(err.to_string())
    }
}
