//! # spice-checkpoint - Durable storage for paused graph executions
//!
//! A checkpoint durably persists a paused [`Checkpoint::message`] alongside
//! the node it paused at, keyed by checkpoint id with a secondary index by
//! run id (SPEC_FULL.md §4.2, component C3). `spice-core`'s runner calls
//! [`CheckpointStore::save`] whenever a message transitions to WAITING, and
//! [`CheckpointStore::load`]/`delete` when resuming.
//!
//! ## Core Concepts
//!
//! - [`Checkpoint`] — the persisted record: `(id, run_id, graph_id,
//!   current_node_id, message, timestamp, expires_at?)`.
//! - [`CheckpointStore`] — the storage contract; `save`/`load`/`list_by_run`/`delete`.
//! - [`memory::InMemoryCheckpointStore`] — the default, process-local implementation.
//! - [`serializer::SerializerProtocol`] — pluggable encoding for callers that
//!   need to serialize their own message type into `Checkpoint::message`.
//!
//! This crate deliberately has no dependency on `spice-core`: `message` is
//! stored as an opaque `serde_json::Value` so the dependency runs one way
//! (`spice-core` → `spice-checkpoint`), matching how the runner needs to both
//! construct graphs *and* persist their paused state.
//!
//! ## Quick Start
//!
//! ```rust
//! use spice_checkpoint::{Checkpoint, CheckpointStore, memory::InMemoryCheckpointStore};
//!
//! # async fn run() -> spice_checkpoint::error::Result<()> {
//! let store = InMemoryCheckpointStore::new();
//! let cp = Checkpoint::new("cp:run-1:1", "run-1", "approval-flow", "ask-approval", serde_json::json!({
//!     "content": "please approve the refund",
//! }));
//! store.save(cp).await?;
//!
//! let pending = store.list_by_run("run-1").await?;
//! assert_eq!(pending.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::Checkpoint;
pub use error::{CheckpointError, Result};
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
