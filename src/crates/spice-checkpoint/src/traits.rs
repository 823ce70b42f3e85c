//! The [`CheckpointStore`] contract (§4.2, C3)
//!
//! A concurrent key/value store keyed by checkpoint id, with a secondary
//! index by `run_id`. Implementations must read their own writes within a
//! single process; a distributed backend must read-your-writes within a
//! single caller at minimum.
//!
//! # Quick Start
//!
//! ```rust
//! use spice_checkpoint::{Checkpoint, CheckpointStore, memory::InMemoryCheckpointStore};
//!
//! # async fn run() -> spice_checkpoint::error::Result<()> {
//! let store = InMemoryCheckpointStore::new();
//! let cp = Checkpoint::new("cp:run-1:1", "run-1", "graph-1", "ask-approval", serde_json::json!({}));
//! store.save(cp.clone()).await?;
//! let loaded = store.load("cp:run-1:1").await?.unwrap();
//! assert_eq!(loaded.run_id, "run-1");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::Result;

/// A concurrent checkpoint store, keyed by checkpoint id with a secondary
/// index by run id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save (or overwrite, by id) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Load a checkpoint by id; `Ok(None)` when it doesn't exist.
    async fn load(&self, id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints for a run, ordered by timestamp ascending.
    async fn list_by_run(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete a checkpoint by id; `Ok(true)` if something was deleted.
    async fn delete(&self, id: &str) -> Result<bool>;
}
