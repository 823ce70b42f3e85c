//! Contracts for external collaborators (§1, §6)
//!
//! The runner core never talks to an LLM provider, a vector store, or a
//! concrete tool implementation directly — it only knows [`Agent`], [`Tool`],
//! and [`DeadLetterHandler`] as `dyn` trait objects. Concrete implementations
//! (HTTP clients, in-process functions, ...) live outside this crate; see
//! SPEC_FULL.md §6 for their contracts. This module only defines the seams.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;

/// An external agent collaborator invoked by an [`crate::node::AgentNode`].
///
/// Implementations typically wrap an LLM provider call; this crate only
/// needs the request/response shape, never the provider protocol.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a reply to `message`. Implementations should prefer
    /// [`Message::reply`] to build the result so `correlationId`/`causationId`
    /// stay correct.
    async fn invoke(&self, message: &Message) -> Result<Message>;

    /// Stable name used in logs and metrics.
    fn name(&self) -> &str;
}

/// The outcome of a [`Tool`] invocation, merged into a message's `data`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Keys merged into the calling message's `data` on success.
    pub data: HashMap<String, Value>,
    /// Whether the tool wants the runner to treat this as a failure even
    /// though no error was raised (e.g. a soft "not found").
    pub success: bool,
}

impl ToolResult {
    pub fn ok(data: HashMap<String, Value>) -> Self {
        Self { data, success: true }
    }

    pub fn failed(data: HashMap<String, Value>) -> Self {
        Self { data, success: false }
    }
}

/// An external tool collaborator invoked by a [`crate::node::ToolNode`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invoke the tool with caller-projected `params`, in the context of `message`.
    async fn call(&self, params: HashMap<String, Value>, message: &Message) -> Result<ToolResult>;

    /// Stable name used for policy lookups ([`crate::middleware::ToolPolicyMiddleware`]).
    fn name(&self) -> &str;

    /// Tags this tool carries for policy enforcement (e.g. `"requires_approval"`).
    fn tags(&self) -> &[String] {
        &[]
    }
}

/// A record of a message that failed validation or policy and was routed off
/// the happy path rather than propagated as a hard error.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub message: Message,
    pub reason: String,
    pub source: String,
}

/// Sink for [`DeadLetterRecord`]s. The default in-memory implementation is
/// meant for tests and small deployments; production hosts typically forward
/// these onto the event bus's own DLQ (see [`crate::event::dlq`]... — wired
/// at the host level, not inside this trait).
pub trait DeadLetterHandler: Send + Sync {
    fn handle(&self, record: DeadLetterRecord);
}

/// An in-memory [`DeadLetterHandler`] that simply accumulates records.
#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    records: std::sync::Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().expect("dead-letter queue mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("dead-letter queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterHandler for InMemoryDeadLetterQueue {
    fn handle(&self, record: DeadLetterRecord) {
        self.records.lock().expect("dead-letter queue mutex poisoned").push(record);
    }
}

impl Clone for DeadLetterRecord {
    fn clone(&self) -> Self {
        Self {
            message: self.message.clone(),
            reason: self.reason.clone(),
            source: self.source.clone(),
        }
    }
}

/// Shared handle type used wherever the runner stores a collaborator.
pub type SharedAgent = Arc<dyn Agent>;
/// Shared handle type used wherever the runner stores a collaborator.
pub type SharedTool = Arc<dyn Tool>;
/// Shared handle type used wherever the runner stores a dead-letter sink.
pub type SharedDeadLetterHandler = Arc<dyn DeadLetterHandler>;

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn invoke(&self, message: &Message) -> Result<Message> {
            Ok(message.reply(format!("echo: {}", message.content), "echo-agent"))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn agent_trait_object_is_callable() {
        let agent: SharedAgent = Arc::new(EchoAgent);
        let msg = Message::create("hi", "user", None);
        let reply = agent.invoke(&msg).await.unwrap();
        assert_eq!(reply.content, "echo: hi");
    }

    #[test]
    fn dead_letter_queue_accumulates_records() {
        let dlq = InMemoryDeadLetterQueue::new();
        assert!(dlq.is_empty());
        dlq.handle(DeadLetterRecord {
            message: Message::create("x", "a", None),
            reason: "policy violation".into(),
            source: "tool-policy".into(),
        });
        assert_eq!(dlq.len(), 1);
    }
}
