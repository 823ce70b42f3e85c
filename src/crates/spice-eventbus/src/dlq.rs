//! Dead-letter queue: where envelopes go on deserialization failure or an
//! explicit schema violation. The originating stream entry is still
//! acknowledged — the bus does not redeliver a poison message forever.

use crate::envelope::EventEnvelope;
use std::sync::Mutex;

/// One dead-lettered envelope, with the reason it was rejected and, when
/// available, the underlying cause.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub envelope: EventEnvelope,
    pub reason: String,
    pub cause: Option<String>,
}

/// Sink for dead-lettered envelopes. Implementations must not panic or block
/// indefinitely — they run on the hot delivery path.
pub trait DeadLetterSink: Send + Sync {
    fn send(&self, envelope: EventEnvelope, reason: String, cause: Option<String>);
    fn len(&self) -> usize;
}

/// Default sink: an in-process, unbounded record of rejected envelopes.
#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().expect("dlq lock poisoned").clone()
    }
}

impl DeadLetterSink for InMemoryDeadLetterQueue {
    fn send(&self, envelope: EventEnvelope, reason: String, cause: Option<String>) {
        tracing::warn!(channel = %envelope.channel_name, reason = %reason, "event dead-lettered");
        self.records
            .lock()
            .expect("dlq lock poisoned")
            .push(DeadLetterRecord { envelope, reason, cause });
    }

    fn len(&self) -> usize {
        self.records.lock().expect("dlq lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn send_then_records_are_visible() {
        let dlq = InMemoryDeadLetterQueue::new();
        let envelope = EventEnvelope::new("c", "T", "1.0.0", serde_json::Value::Null, HashMap::new());
        dlq.send(envelope, "bad payload".into(), None);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq.records()[0].reason, "bad payload");
    }
}
