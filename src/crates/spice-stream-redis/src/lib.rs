//! Redis Streams [`spice_eventbus::backend::StreamBackend`] implementation:
//! consumer groups, a batching/blocking reader loop, async approximate
//! trimming, and pending/claim recovery. The durable counterpart to
//! `spice_eventbus::inmemory::InMemoryBackend`, for deployments where event
//! delivery must survive a process restart.

pub mod backend;
pub mod config;
pub mod error;
mod wire;

pub use backend::RedisStreamBackend;
pub use config::RedisStreamConfig;
pub use error::{Result, StreamBackendError};
