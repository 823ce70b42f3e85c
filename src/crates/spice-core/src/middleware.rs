//! The middleware chain wrapped around every node execution (§4.6, C7)
//!
//! Middlewares compose in insertion order: `beforeNode` runs front-to-back,
//! `afterNode` runs front-to-back over the result, and on failure `onError`
//! runs front-to-back until one returns something other than
//! [`ErrorAction::Propagate`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SpiceError};
use crate::external::{DeadLetterRecord, SharedDeadLetterHandler};
use crate::message::{Message, MessageState, Validator};

/// What the chain should do after a node (or middleware) fails.
#[derive(Debug, Clone)]
pub enum ErrorAction {
    /// Let the failure propagate to the runner's retry/failure handling.
    Propagate,
    /// Swallow the failure and continue as if the node had produced `input` unchanged.
    Skip,
    /// Ask the runner to retry the current node immediately (outside the normal backoff).
    Retry,
    /// Replace the failed result with `message`, as if the node had produced it.
    Fallback(Message),
}

/// A single hook around node execution.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Run before the node executes; may transform `message`.
    async fn before_node(&self, message: Message) -> Result<Message> {
        Ok(message)
    }

    /// Run after the node executes successfully; may transform `result`.
    async fn after_node(&self, result: Message) -> Result<Message> {
        Ok(result)
    }

    /// Run when a node (or an earlier `before_node`/`after_node`) fails.
    async fn on_error(&self, _error: &SpiceError, _input: &Message) -> ErrorAction {
        ErrorAction::Propagate
    }

    /// Stable name used in logs.
    fn name(&self) -> &str;
}

/// Composes middlewares in insertion order.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: Box<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn push(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub async fn before_node(&self, mut message: Message) -> Result<Message> {
        for mw in &self.middlewares {
            message = mw.before_node(message).await?;
        }
        Ok(message)
    }

    pub async fn after_node(&self, mut result: Message) -> Result<Message> {
        for mw in &self.middlewares {
            result = mw.after_node(result).await?;
        }
        Ok(result)
    }

    /// Run `on_error` across the chain in order; first non-[`ErrorAction::Propagate`] wins.
    pub async fn on_error(&self, error: &SpiceError, input: &Message) -> ErrorAction {
        for mw in &self.middlewares {
            match mw.on_error(error, input).await {
                ErrorAction::Propagate => continue,
                other => return other,
            }
        }
        ErrorAction::Propagate
    }
}

/// Mandatory middleware (§4.6): transitions READY messages to RUNNING before
/// a node executes, and re-validates the transition history every time.
pub struct StateTransitionMiddleware;

#[async_trait]
impl Middleware for StateTransitionMiddleware {
    async fn before_node(&self, message: Message) -> Result<Message> {
        let message = if message.state == MessageState::Ready {
            message.transition_to(MessageState::Running, Some("Node execution started".into()), message.node_id.clone())?
        } else {
            message
        };
        let errors = Validator::validate(&message);
        if !errors.is_empty() {
            return Err(SpiceError::Validation(
                errors.into_iter().map(|e| format!("{}: {}", e.field, e.message)).collect::<Vec<_>>().join("; "),
            ));
        }
        Ok(message)
    }

    fn name(&self) -> &str {
        "state-transition"
    }
}

/// Enforces required tags on a tool before a [`crate::node::ToolNode`] (or any
/// node that declares a tool call) is allowed to execute it. On violation,
/// pushes an `ErrorReport` tool call and routes the message to the dead-letter handler.
pub struct ToolPolicyMiddleware {
    required_tags: HashMap<String, Vec<String>>,
    available_tags: HashMap<String, Vec<String>>,
    dead_letter: SharedDeadLetterHandler,
}

impl ToolPolicyMiddleware {
    pub fn new(dead_letter: SharedDeadLetterHandler) -> Self {
        Self {
            required_tags: HashMap::new(),
            available_tags: HashMap::new(),
            dead_letter,
        }
    }

    pub fn require_tags(mut self, tool_name: impl Into<String>, tags: Vec<String>) -> Self {
        self.required_tags.insert(tool_name.into(), tags);
        self
    }

    pub fn declare_tags(mut self, tool_name: impl Into<String>, tags: Vec<String>) -> Self {
        self.available_tags.insert(tool_name.into(), tags);
        self
    }

    fn violation(&self, message: &Message) -> Option<String> {
        for tc in &message.tool_calls {
            if let Some(required) = self.required_tags.get(&tc.function_name) {
                let available = self.available_tags.get(&tc.function_name).cloned().unwrap_or_default();
                if !required.iter().all(|tag| available.contains(tag)) {
                    return Some(tc.function_name.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Middleware for ToolPolicyMiddleware {
    async fn before_node(&self, message: Message) -> Result<Message> {
        if let Some(tool_name) = self.violation(&message) {
            let report = crate::message::ToolCall::new(
                "ErrorReport",
                serde_json::json!({ "tool": tool_name, "reason": "policy violation" }),
            );
            let reported = message.with_tool_call(report);
            self.dead_letter.handle(DeadLetterRecord {
                message: reported.clone(),
                reason: format!("tool '{tool_name}' violates policy"),
                source: "tool-policy".into(),
            });
            return Err(SpiceError::Tool(format!("tool '{tool_name}' is not permitted by policy")));
        }
        Ok(message)
    }

    fn name(&self) -> &str {
        "tool-policy"
    }
}

/// Records per-node durations and per-error-type counts without affecting flow.
#[derive(Default)]
pub struct MetricsMiddleware {
    node_count: AtomicU64,
    error_count: AtomicU64,
    durations: Mutex<Vec<Duration>>,
    start: Mutex<Option<std::time::Instant>>,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> u64 {
        self.node_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn total_duration(&self) -> Duration {
        self.durations.lock().expect("metrics mutex poisoned").iter().sum()
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn before_node(&self, message: Message) -> Result<Message> {
        *self.start.lock().expect("metrics mutex poisoned") = Some(std::time::Instant::now());
        Ok(message)
    }

    async fn after_node(&self, result: Message) -> Result<Message> {
        self.node_count.fetch_add(1, Ordering::Relaxed);
        if let Some(start) = self.start.lock().expect("metrics mutex poisoned").take() {
            self.durations.lock().expect("metrics mutex poisoned").push(start.elapsed());
        }
        Ok(result)
    }

    async fn on_error(&self, _error: &SpiceError, _input: &Message) -> ErrorAction {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        ErrorAction::Propagate
    }

    fn name(&self) -> &str {
        "metrics"
    }
}

/// Host-supplied hook for context injection (authentication, tracing,
/// subgraph context, ...). Unlike [`Middleware`], a `MessageTransformer`
/// failure can be configured to be logged and ignored (`continueOnFailure`)
/// rather than halting execution.
#[async_trait]
pub trait MessageTransformer: Send + Sync {
    async fn before_execution(&self, message: Message) -> Result<Message> {
        Ok(message)
    }

    async fn after_execution(&self, message: Message) -> Result<Message> {
        Ok(message)
    }

    /// Whether a failure in this transformer should halt execution (`true`,
    /// the default — critical) or be logged and ignored (`false`, non-critical).
    fn continue_on_failure(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Runs a transformer's `before_execution`, honoring `continue_on_failure`.
pub async fn apply_before(transformer: &dyn MessageTransformer, message: Message) -> Result<Message> {
    let fallback = message.clone();
    match transformer.before_execution(message).await {
        Ok(m) => Ok(m),
        Err(e) if transformer.continue_on_failure() => {
            tracing::warn!(transformer = transformer.name(), error = %e, "non-critical transformer failed, continuing");
            Ok(fallback)
        }
        Err(e) => Err(e),
    }
}

/// Runs a transformer's `after_execution`, honoring `continue_on_failure`.
pub async fn apply_after(transformer: &dyn MessageTransformer, message: Message) -> Result<Message> {
    let fallback = message.clone();
    match transformer.after_execution(message).await {
        Ok(m) => Ok(m),
        Err(e) if transformer.continue_on_failure() => {
            tracing::warn!(transformer = transformer.name(), error = %e, "non-critical transformer failed, continuing");
            Ok(fallback)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryDeadLetterQueue;
    use std::sync::Arc;

    #[tokio::test]
    async fn state_transition_middleware_promotes_ready_to_running() {
        let mw = StateTransitionMiddleware;
        let msg = Message::create("x", "a", None);
        let result = mw.before_node(msg).await.unwrap();
        assert_eq!(result.state, MessageState::Running);
    }

    #[tokio::test]
    async fn chain_runs_middlewares_in_order() {
        let chain = MiddlewareChain::new()
            .with(Box::new(StateTransitionMiddleware))
            .with(Box::new(MetricsMiddleware::new()));
        let msg = Message::create("x", "a", None);
        let result = chain.before_node(msg).await.unwrap();
        assert_eq!(result.state, MessageState::Running);
    }

    #[tokio::test]
    async fn tool_policy_middleware_blocks_unpermitted_tool() {
        let dlq: SharedDeadLetterHandler = Arc::new(InMemoryDeadLetterQueue::new());
        let mw = ToolPolicyMiddleware::new(dlq.clone()).require_tags("delete_account", vec!["requires_approval".into()]);
        let msg = Message::create("x", "a", None)
            .with_tool_call(crate::message::ToolCall::new("delete_account", serde_json::json!({})));
        let err = mw.before_node(msg).await.unwrap_err();
        assert_eq!(err.code(), "TOOL_ERROR");
    }

    #[tokio::test]
    async fn tool_policy_middleware_allows_tagged_tool() {
        let dlq: SharedDeadLetterHandler = Arc::new(InMemoryDeadLetterQueue::new());
        let mw = ToolPolicyMiddleware::new(dlq)
            .require_tags("delete_account", vec!["requires_approval".into()])
            .declare_tags("delete_account", vec!["requires_approval".into()]);
        let msg = Message::create("x", "a", None)
            .with_tool_call(crate::message::ToolCall::new("delete_account", serde_json::json!({})));
        assert!(mw.before_node(msg).await.is_ok());
    }

    #[tokio::test]
    async fn metrics_middleware_counts_nodes_and_errors() {
        let mw = MetricsMiddleware::new();
        let msg = Message::create("x", "a", None);
        let msg = mw.before_node(msg).await.unwrap();
        let _ = mw.after_node(msg).await.unwrap();
        assert_eq!(mw.node_count(), 1);
        let action = mw.on_error(&SpiceError::Network("x".into()), &Message::create("x", "a", None)).await;
        assert!(matches!(action, ErrorAction::Propagate));
        assert_eq!(mw.error_count(), 1);
    }
}
