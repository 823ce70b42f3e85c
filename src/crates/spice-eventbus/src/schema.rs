//! The schema registry: the one gate a `(type, version)` pair must pass
//! through before a channel may be created or an event published.

use crate::error::{EventBusError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SchemaKey {
    event_type: String,
    version: String,
}

/// An optional JSON Schema validated against a registered event type's
/// payload at publish time. Registration without a schema is valid — it
/// simply means "this type/version pair is known", with no payload shape
/// enforcement.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub schema: Option<Value>,
}

/// Tracks which `(eventType, schemaVersion)` pairs may be published.
///
/// Grounded in the same "register once, look up many times" shape as
/// `spice_checkpoint`'s `SerializerProtocol`, but keyed by a compound type
/// identity rather than a single serializer choice.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: RwLock<HashMap<SchemaKey, SchemaEntry>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: impl Into<String>, version: impl Into<String>) {
        self.register_with_schema(event_type, version, None);
    }

    pub fn register_with_schema(
        &self,
        event_type: impl Into<String>,
        version: impl Into<String>,
        schema: Option<Value>,
    ) {
        let key = SchemaKey {
            event_type: event_type.into(),
            version: version.into(),
        };
        self.entries
            .write()
            .expect("schema registry lock poisoned")
            .insert(key, SchemaEntry { schema });
    }

    pub fn is_registered(&self, event_type: &str, version: &str) -> bool {
        let key = SchemaKey {
            event_type: event_type.to_string(),
            version: version.to_string(),
        };
        self.entries
            .read()
            .expect("schema registry lock poisoned")
            .contains_key(&key)
    }

    /// Validates `payload` against the registered schema for `(event_type,
    /// version)`, requiring the pair be registered at all. Pairs registered
    /// without a schema validate any payload.
    pub fn validate(&self, event_type: &str, version: &str, payload: &Value) -> Result<()> {
        let key = SchemaKey {
            event_type: event_type.to_string(),
            version: version.to_string(),
        };
        let entries = self.entries.read().expect("schema registry lock poisoned");
        let entry = entries.get(&key).ok_or_else(|| EventBusError::SchemaNotRegistered {
            event_type: event_type.to_string(),
            version: version.to_string(),
        })?;

        #[cfg(feature = "json-validation")]
        if let Some(schema) = &entry.schema {
            let compiled = jsonschema::JSONSchema::compile(schema)
                .map_err(|e| EventBusError::Validation(e.to_string()))?;
            if let Err(mut errors) = compiled.validate(payload) {
                let first = errors.next().map(|e| e.to_string()).unwrap_or_default();
                return Err(EventBusError::Validation(first));
            }
        }
        #[cfg(not(feature = "json-validation"))]
        let _ = entry;

        Ok(())
    }
}
