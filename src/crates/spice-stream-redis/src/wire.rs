//! Encodes an [`EventEnvelope`] to/from the Redis stream wire format named in
//! the external-interfaces section: string fields `id, channelName,
//! eventType, schemaVersion, payload, metadata, timestamp`, with `payload`
//! and `metadata` carried as JSON strings and `timestamp` as RFC 3339.

use crate::error::{Result, StreamBackendError};
use chrono::{DateTime, Utc};
use redis::streams::StreamId;
use spice_eventbus::envelope::EventEnvelope;
use std::collections::HashMap;

/// `XADD` field/value pairs for one envelope, in wire order.
pub fn encode(envelope: &EventEnvelope) -> Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("id", envelope.id.clone()),
        ("channelName", envelope.channel_name.clone()),
        ("eventType", envelope.event_type.clone()),
        ("schemaVersion", envelope.schema_version.clone()),
        ("payload", serde_json::to_string(&envelope.payload)?),
        ("metadata", serde_json::to_string(&envelope.metadata)?),
        ("timestamp", envelope.timestamp.to_rfc3339()),
    ])
}

/// Decodes one `XREADGROUP`/`XCLAIM` entry back into an [`EventEnvelope`].
/// `channel` is only used to name the channel in a [`StreamBackendError::MalformedEntry`]
/// if decoding fails — the entry's own `channelName` field is what ends up on
/// the envelope.
pub fn decode(channel: &str, entry: &StreamId) -> Result<EventEnvelope> {
    let field = |key: &str| -> Result<String> {
        entry
            .map
            .get(key)
            .and_then(|value| redis::from_redis_value::<String>(value).ok())
            .ok_or_else(|| StreamBackendError::MalformedEntry {
                channel: channel.to_string(),
                reason: format!("missing or non-string field '{key}'"),
            })
    };

    let malformed = |reason: String| StreamBackendError::MalformedEntry {
        channel: channel.to_string(),
        reason,
    };

    let payload = serde_json::from_str(&field("payload")?)?;
    let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&field("metadata")?)?;
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&field("timestamp")?)
        .map_err(|e| malformed(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);

    Ok(EventEnvelope {
        id: field("id")?,
        channel_name: field("channelName")?,
        event_type: field("eventType")?,
        schema_version: field("schemaVersion")?,
        payload,
        metadata,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn sample_envelope() -> EventEnvelope {
        EventEnvelope::new(
            "my.events",
            "MyEvent",
            "1.0.0",
            serde_json::json!({"n": 1}),
            StdHashMap::new(),
        )
    }

    #[test]
    fn encode_includes_all_seven_wire_fields() {
        let fields = encode(&sample_envelope()).unwrap();
        let keys: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["id", "channelName", "eventType", "schemaVersion", "payload", "metadata", "timestamp"]
        );
    }

    #[test]
    fn decode_round_trips_through_encode() {
        let envelope = sample_envelope();
        let fields = encode(&envelope).unwrap();
        let map: HashMap<String, redis::Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), redis::Value::BulkString(v.into_bytes())))
            .collect();
        let entry = StreamId { id: "1-0".to_string(), map };
        let decoded = decode("my.events", &entry).unwrap();
        assert_eq!(decoded.id, envelope.id);
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.timestamp, envelope.timestamp);
    }

    #[test]
    fn decode_reports_missing_field() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        let err = decode("my.events", &entry).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_ENTRY");
    }
}
