//! The canonical message envelope and its per-message state machine
//!
//! [`Message`] is the single immutable value that flows from node to node as a
//! graph executes. "Immutable" means every mutating method returns a *new*
//! `Message`; nothing here holds interior mutability. The only code allowed to
//! advance a message's [`MessageState`] is [`Message::transition_to`] itself —
//! middlewares and nodes call it, nothing reaches into `state` directly.
//!
//! # Quick Start
//!
//! ```rust
//! use spice_core::message::{Message, MessageState};
//!
//! let msg = Message::create("draft the release notes", "planner", None);
//! assert_eq!(msg.state, MessageState::Ready);
//!
//! let running = msg.transition_to(MessageState::Running, None, None).unwrap();
//! assert_eq!(running.state_history.len(), 1);
//! ```
//!
//! # Invariants
//!
//! See `SPEC_FULL.md` §3 for the full list; [`Validator`] in this module checks
//! all of them and is what a [`crate::middleware::StateTransitionMiddleware`] or a
//! dead-letter path runs before trusting a message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, SpiceError};

/// The function name used by the built-in HITL tool call (see [`crate::hitl`]).
pub const HITL_REQUEST_FUNCTION: &str = "hitl_request_input";

/// The function name used by [`Message::from_user_input`].
pub const USER_INPUT_FUNCTION: &str = "user_input";

/// One of the five states a [`Message`] can occupy during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageState {
    Ready,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl MessageState {
    /// Whether `self -> to` is a legal transition per the table in SPEC_FULL.md §3.
    pub fn can_transition_to(self, to: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, to),
            (Ready, Running)
                | (Running, Waiting)
                | (Running, Completed)
                | (Running, Failed)
                | (Waiting, Running)
                | (Waiting, Failed)
        )
    }

    /// `COMPLETED` and `FAILED` are terminal; no further transition is ever legal.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Completed | MessageState::Failed)
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageState::Ready => "READY",
            MessageState::Running => "RUNNING",
            MessageState::Waiting => "WAITING",
            MessageState::Completed => "COMPLETED",
            MessageState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// One entry in a message's append-only `state_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: MessageState,
    pub to: MessageState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub node_id: Option<String>,
}

/// A single tool-call request attached to a message.
///
/// Invariant 3 (§3): `id` always starts with `call_`. Use [`ToolCall::new`]
/// rather than constructing the struct literal to keep that guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    /// JSON-encoded arguments, matching the wire contract in SPEC_FULL.md §3.
    pub arguments: Value,
}

impl ToolCall {
    /// Build a tool call with an auto-generated `call_` id.
    pub fn new(function_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            function_name: function_name.into(),
            arguments,
        }
    }

    /// Build a tool call with an explicit id; panics in debug builds if the id
    /// doesn't start with `call_`, matching invariant 3 eagerly rather than
    /// letting it slip through to the [`Validator`].
    pub fn with_id(id: impl Into<String>, function_name: impl Into<String>, arguments: Value) -> Self {
        let id = id.into();
        debug_assert!(id.starts_with("call_"), "tool-call id must start with call_: {id}");
        Self {
            id,
            function_name: function_name.into(),
            arguments,
        }
    }
}

/// The canonical message envelope (§3).
///
/// `Message` is cheap to `Clone`: collections are small (a handful of tool
/// calls, a short history) and runs are short-lived, so plain `Vec`/`HashMap`
/// clones are preferred here over `Arc`-wrapped interiors — matching this
/// corpus's preference for straightforward value types over exotic persistent
/// data structures when the scale doesn't call for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub content: String,
    pub data: HashMap<String, Value>,
    pub tool_calls: Vec<ToolCall>,
    pub state: MessageState,
    pub state_history: Vec<StateTransition>,
    pub metadata: HashMap<String, Value>,
    pub graph_id: Option<String>,
    pub node_id: Option<String>,
    pub run_id: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new READY message. `correlation_id` defaults to a fresh uuid
    /// when not supplied, matching the "required, non-empty" contract in §3.
    pub fn create(content: impl Into<String>, from: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            causation_id: None,
            content: content.into(),
            data: HashMap::new(),
            tool_calls: Vec::new(),
            state: MessageState::Ready,
            state_history: Vec::new(),
            metadata: HashMap::new(),
            graph_id: None,
            node_id: None,
            run_id: None,
            from: from.into(),
            to: None,
            timestamp: Utc::now(),
            expires_at: None,
        }
    }

    /// Build a READY message wrapping exactly one `user_input` tool call, as
    /// used to seed a run with a human's free-text/choice response (§4.1).
    pub fn from_user_input(
        text: impl Into<String>,
        user_id: impl Into<String>,
        metadata: HashMap<String, Value>,
        input_type: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        let text = text.into();
        let args = serde_json::json!({
            "text": text,
            "input_type": input_type.into(),
            "metadata": metadata,
        });
        let mut msg = Self::create("", user_id, correlation_id);
        msg.tool_calls.push(ToolCall::new(USER_INPUT_FUNCTION, args));
        msg
    }

    /// Produce a reply: same `correlation_id`, `causation_id` set to this
    /// message's id, fresh READY state, empty history (§4.1).
    pub fn reply(&self, content: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            causation_id: Some(self.id.clone()),
            content: content.into(),
            data: HashMap::new(),
            tool_calls: Vec::new(),
            state: MessageState::Ready,
            state_history: Vec::new(),
            metadata: self.metadata.clone(),
            graph_id: self.graph_id.clone(),
            node_id: self.node_id.clone(),
            run_id: self.run_id.clone(),
            from: from.into(),
            to: None,
            timestamp: Utc::now(),
            expires_at: None,
        }
    }

    /// Validate and apply a state transition, returning a new `Message` with
    /// the transition appended to `state_history`. Fails with
    /// [`SpiceError::InvalidTransition`] and leaves `self` conceptually
    /// unchanged (the caller simply discards the `Err`, since `self` is never
    /// mutated in place).
    pub fn transition_to(
        &self,
        new_state: MessageState,
        reason: Option<String>,
        node_id: Option<String>,
    ) -> Result<Self> {
        if !self.state.can_transition_to(new_state) {
            return Err(SpiceError::invalid_transition(
                self.state.to_string(),
                new_state.to_string(),
            ));
        }
        let mut next = self.clone();
        next.state_history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
            node_id: node_id.or_else(|| self.node_id.clone()),
        });
        next.state = new_state;
        Ok(next)
    }

    /// Merge `entries` into `data`, overwriting on key collision; never drops
    /// pre-existing keys that aren't in `entries`.
    pub fn with_data(&self, entries: HashMap<String, Value>) -> Self {
        let mut next = self.clone();
        next.data.extend(entries);
        next
    }

    /// Merge `entries` into `metadata`, same semantics as [`Message::with_data`].
    pub fn with_metadata(&self, entries: HashMap<String, Value>) -> Self {
        let mut next = self.clone();
        next.metadata.extend(entries);
        next
    }

    /// Append a single tool call.
    pub fn with_tool_call(&self, call: ToolCall) -> Self {
        let mut next = self.clone();
        next.tool_calls.push(call);
        next
    }

    /// Append multiple tool calls, preserving order.
    pub fn with_tool_calls(&self, calls: impl IntoIterator<Item = ToolCall>) -> Self {
        let mut next = self.clone();
        next.tool_calls.extend(calls);
        next
    }

    /// Attach `graph_id`/`node_id`/`run_id` execution context.
    pub fn with_graph_context(
        &self,
        graph_id: impl Into<String>,
        node_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        let mut next = self.clone();
        next.graph_id = Some(graph_id.into());
        next.node_id = Some(node_id.into());
        next.run_id = Some(run_id.into());
        next
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_waiting(&self) -> bool {
        self.state == MessageState::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.state == MessageState::Running
    }

    pub fn has_tool_call(&self, function_name: &str) -> bool {
        self.tool_calls.iter().any(|tc| tc.function_name == function_name)
    }
}

/// One `(field, message)` validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Checks invariants 1–6 of SPEC_FULL.md §3 against a [`Message`], producing a
/// flat list of [`ValidationError`]s rather than failing fast — callers
/// (typically a dead-letter path) want to see everything wrong at once.
pub struct Validator;

impl Validator {
    /// Validate all invariants, returning every violation found.
    pub fn validate(message: &Message) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // Invariant 1: content non-empty OR tool_calls non-empty.
        if message.content.is_empty() && message.tool_calls.is_empty() {
            errors.push(ValidationError {
                field: "content".into(),
                message: "content must be non-empty when toolCalls is empty".into(),
            });
        }

        // Invariant 2: correlationId non-empty.
        if message.correlation_id.is_empty() {
            errors.push(ValidationError {
                field: "correlationId".into(),
                message: "correlationId must be non-empty".into(),
            });
        }

        // Invariant 3: every tool-call id starts with call_.
        for tc in &message.tool_calls {
            if !tc.id.starts_with("call_") {
                errors.push(ValidationError {
                    field: "toolCalls[].id".into(),
                    message: format!("tool-call id '{}' does not start with call_", tc.id),
                });
            }
        }

        // Invariant 4: stateHistory is monotone in timestamp and every
        // consecutive pair is a legal transition.
        let mut prev_ts: Option<DateTime<Utc>> = None;
        for transition in &message.state_history {
            if !transition.from.can_transition_to(transition.to) {
                errors.push(ValidationError {
                    field: "stateHistory".into(),
                    message: format!(
                        "illegal recorded transition {} -> {}",
                        transition.from, transition.to
                    ),
                });
            }
            if let Some(prev) = prev_ts {
                if transition.timestamp < prev {
                    errors.push(ValidationError {
                        field: "stateHistory".into(),
                        message: "stateHistory timestamps are not monotone".into(),
                    });
                }
            }
            prev_ts = Some(transition.timestamp);
        }

        // Invariant 5: a WAITING message has at least one HITL-request tool call.
        if message.state == MessageState::Waiting
            && !message.has_tool_call(HITL_REQUEST_FUNCTION)
        {
            errors.push(ValidationError {
                field: "toolCalls".into(),
                message: format!(
                    "WAITING message must have a '{HITL_REQUEST_FUNCTION}' tool call"
                ),
            });
        }

        // Invariant 6: causationId (when set) is non-empty — full referential
        // integrity against a prior message requires store-level context and
        // is enforced by the Runner, which always sets causation_id from a
        // concrete prior message's id.
        if let Some(cid) = &message.causation_id {
            if cid.is_empty() {
                errors.push(ValidationError {
                    field: "causationId".into(),
                    message: "causationId, when set, must be non-empty".into(),
                });
            }
        }

        errors
    }

    pub fn is_valid(message: &Message) -> bool {
        Self::validate(message).is_empty()
    }
}
