//! The checkpoint record itself (§3, §4.2, C3)
//!
//! A checkpoint is the paused message plus the node it paused at. `message`
//! is stored as an opaque [`serde_json::Value`] rather than a typed message
//! struct — this crate has no dependency on `spice-core` (it's the other way
//! around), so the caller is responsible for serializing/deserializing its
//! own message type around this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A durably persisted paused execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    pub graph_id: String,
    pub current_node_id: String,
    pub message: Value,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        current_node_id: impl Into<String>,
        message: Value,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            current_node_id: current_node_id.into(),
            message,
            timestamp: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() > exp).unwrap_or(false)
    }

    /// Build the canonical checkpoint id: `cp:{run_id}:{nanos}` (§4.5 step 2.a).
    pub fn id_for(run_id: &str) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("cp:{run_id}:{nanos}")
    }
}
