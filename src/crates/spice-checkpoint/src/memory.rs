//! An in-process [`CheckpointStore`] backed by a `HashMap` (§4.2)
//!
//! Suitable for tests and single-process deployments; a distributed backend
//! (e.g. Postgres- or Redis-backed) would implement the same trait over a
//! real database instead of holding everything in memory.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::traits::CheckpointStore;

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    by_id: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.by_id
            .write()
            .expect("checkpoint store lock poisoned")
            .insert(checkpoint.id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.by_id.read().expect("checkpoint store lock poisoned").get(id).cloned())
    }

    async fn list_by_run(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let mut matches: Vec<Checkpoint> = self
            .by_id
            .read()
            .expect("checkpoint store lock poisoned")
            .values()
            .filter(|cp| cp.run_id == run_id)
            .cloned()
            .collect();
        matches.sort_by_key(|cp| cp.timestamp);
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.by_id.write().expect("checkpoint store lock poisoned").remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, run_id: &str) -> Checkpoint {
        Checkpoint::new(id, run_id, "graph-1", "node-1", serde_json::json!({"k": "v"}))
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCheckpointStore::new();
        store.save(sample("cp:1", "run-1")).await.unwrap();
        let loaded = store.load("cp:1").await.unwrap().unwrap();
        assert_eq!(loaded.run_id, "run-1");
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_run_is_ordered_by_timestamp() {
        let store = InMemoryCheckpointStore::new();
        let mut first = sample("cp:1", "run-1");
        let mut second = sample("cp:2", "run-1");
        first.timestamp = chrono::Utc::now() - chrono::Duration::seconds(10);
        second.timestamp = chrono::Utc::now();
        store.save(second.clone()).await.unwrap();
        store.save(first.clone()).await.unwrap();

        let list = store.list_by_run("run-1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "cp:1");
        assert_eq!(list[1].id, "cp:2");
    }

    #[tokio::test]
    async fn delete_removes_and_reports_presence() {
        let store = InMemoryCheckpointStore::new();
        store.save(sample("cp:1", "run-1")).await.unwrap();
        assert!(store.delete("cp:1").await.unwrap());
        assert!(!store.delete("cp:1").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_by_id_replaces_existing_entry() {
        let store = InMemoryCheckpointStore::new();
        store.save(sample("cp:1", "run-1")).await.unwrap();
        let mut updated = sample("cp:1", "run-1");
        updated.current_node_id = "node-2".into();
        store.save(updated).await.unwrap();
        let loaded = store.load("cp:1").await.unwrap().unwrap();
        assert_eq!(loaded.current_node_id, "node-2");
    }
}
