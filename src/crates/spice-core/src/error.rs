//! Error taxonomy for graph execution, messages, and the HITL contract
//!
//! All errors that can occur while building, validating, or running a graph are
//! represented by the closed [`SpiceError`] enum. Every variant carries a stable
//! [`SpiceError::code`] (used by the retry resolver and by event-bus DLQ entries),
//! a human-readable message, and a free-form `context` map for structured detail
//! that doesn't deserve its own field.
//!
//! # Error Hierarchy
//!
//! ```text
//! SpiceError
//! ├── Validation        - Message/graph invariant violations
//! ├── InvalidTransition - Illegal state machine transition
//! ├── NodeExecution     - A node's `run` returned an error
//! ├── Routing           - Decision node had no matching target
//! ├── Tool              - Tool invocation failed or was denied by policy
//! ├── Agent             - External Agent collaborator failed
//! ├── MissingContext    - HITL tool invoked without runId/nodeId
//! ├── Timeout           - HITL response arrived after the deadline
//! ├── Network           - Transient network failure (retryable by default)
//! ├── RateLimit         - Upstream throttling (retryable by default)
//! ├── Serialization     - JSON/YAML encode or decode failure
//! ├── Authentication    - Credential/identity failure
//! ├── Checkpoint        - Checkpoint store failure
//! └── Policy            - Catch-all for host-defined/unknown errors
//! ```
//!
//! # Retryable Wrapping
//!
//! Any [`SpiceError`] can be wrapped in [`RetryableError`] with an explicit
//! [`RetryHint`], letting node authors override how the [retry resolver](crate::retry)
//! treats a specific failure without changing the underlying error kind.

use std::collections::HashMap;
use thiserror::Error;

/// Result type used throughout `spice-core`.
pub type Result<T> = std::result::Result<T, SpiceError>;

/// All errors that can occur while building, validating, or executing a graph.
#[derive(Error, Debug, Clone)]
pub enum SpiceError {
    /// A message or graph failed invariant validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An illegal state transition was attempted.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Originating state
        from: String,
        /// Attempted target state
        to: String,
    },

    /// A node's `run` implementation returned an error.
    #[error("node '{node}' execution failed: {message}")]
    NodeExecution {
        /// Name/id of the failing node
        node: String,
        /// Error message from node execution
        message: String,
    },

    /// A decision node could not resolve a target and had no fallback.
    #[error("routing error: {0}")]
    Routing(String),

    /// A tool invocation failed, was misconfigured, or violated policy.
    #[error("tool error: {0}")]
    Tool(String),

    /// An external `Agent` collaborator failed.
    #[error("agent error: {0}")]
    Agent(String),

    /// The HITL tool was invoked without `runId`/`nodeId` in its context.
    #[error("missing context: {0}")]
    MissingContext(String),

    /// A HITL response arrived after its deadline, or a checkpoint expired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A transient network failure.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream throttling.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// JSON/YAML encode or decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Credential or identity failure.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The checkpoint store failed to save, load, list, or delete.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Host-defined or unrecognized error.
    #[error("{0}")]
    Policy(String),
}

impl SpiceError {
    /// Stable error code consulted by the retry resolver (§4.3) and DLQ entries.
    ///
    /// Codes are deliberately `SCREAMING_SNAKE_CASE` strings rather than an enum
    /// discriminant: hosts key custom retry policies off these strings (see
    /// [`crate::retry::RetryPolicyResolver`]), and they appear verbatim in
    /// event-bus dead-letter entries.
    pub fn code(&self) -> &'static str {
        match self {
            SpiceError::Validation(_) => "VALIDATION",
            SpiceError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SpiceError::NodeExecution { .. } => "NODE_EXECUTION",
            SpiceError::Routing(_) => "ROUTING_ERROR",
            SpiceError::Tool(_) => "TOOL_ERROR",
            SpiceError::Agent(_) => "AGENT_ERROR",
            SpiceError::MissingContext(_) => "MISSING_CONTEXT",
            SpiceError::Timeout(_) => "TIMEOUT",
            SpiceError::Network(_) => "NETWORK_ERROR",
            SpiceError::RateLimit(_) => "RATE_LIMIT",
            SpiceError::Serialization(_) => "SERIALIZATION",
            SpiceError::Authentication(_) => "AUTHENTICATION",
            SpiceError::Checkpoint(_) => "CHECKPOINT_ERROR",
            SpiceError::Policy(_) => "POLICY",
        }
    }

    /// Whether this error kind is retryable by default absent any other policy.
    ///
    /// Only `Network`, `RateLimit`, and a generic `NodeExecution` are retryable
    /// out of the box; validation, routing, and transition errors never are.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(
            self,
            SpiceError::Network(_) | SpiceError::RateLimit(_) | SpiceError::NodeExecution { .. }
        )
    }

    pub fn node_execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        SpiceError::NodeExecution {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        SpiceError::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl From<serde_json::Error> for SpiceError {
    fn from(err: serde_json::Error) -> Self {
        SpiceError::Serialization(err.to_string())
    }
}

/// A hint embedded in an error to override the retry resolver's decision (§4.3, item 1).
#[derive(Debug, Clone, Default)]
pub struct RetryHint {
    /// When true, the resolver short-circuits to `NO_RETRY` regardless of policy tables.
    pub skip_retry: bool,
    /// When set, overrides the resolved policy's `max_attempts`.
    pub max_attempts: Option<usize>,
}

/// A [`SpiceError`] paired with an optional [`RetryHint`] and structured context.
///
/// Node authors return `RetryableError` instead of a bare `SpiceError` when they
/// have better information than the resolver's static tables — e.g. a tool that
/// knows a particular upstream 429 should never be retried even though `RateLimit`
/// is retryable by default.
#[derive(Debug, Clone)]
pub struct RetryableError {
    /// The underlying error.
    pub error: SpiceError,
    /// Optional override for the retry resolver.
    pub retry_hint: Option<RetryHint>,
    /// Free-form structured context (request id, upstream status code, …).
    pub context: HashMap<String, serde_json::Value>,
}

impl RetryableError {
    pub fn new(error: SpiceError) -> Self {
        Self {
            error,
            retry_hint: None,
            context: HashMap::new(),
        }
    }

    pub fn with_hint(mut self, hint: RetryHint) -> Self {
        self.retry_hint = Some(hint);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn no_retry(error: SpiceError) -> Self {
        Self::new(error).with_hint(RetryHint {
            skip_retry: true,
            max_attempts: None,
        })
    }
}

impl std::fmt::Display for RetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SpiceError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(SpiceError::Routing("x".into()).code(), "ROUTING_ERROR");
        assert_eq!(
            SpiceError::invalid_transition("READY", "FAILED").code(),
            "INVALID_TRANSITION"
        );
    }

    #[test]
    fn default_retryability_matches_taxonomy() {
        assert!(SpiceError::Network("x".into()).is_retryable_by_default());
        assert!(SpiceError::RateLimit("x".into()).is_retryable_by_default());
        assert!(!SpiceError::Validation("x".into()).is_retryable_by_default());
        assert!(!SpiceError::Routing("x".into()).is_retryable_by_default());
    }

    #[test]
    fn retryable_error_no_retry_sets_skip_flag() {
        let err = RetryableError::no_retry(SpiceError::Tool("denied".into()));
        let hint = err.retry_hint.unwrap();
        assert!(hint.skip_retry);
        assert!(hint.max_attempts.is_none());
    }
}
