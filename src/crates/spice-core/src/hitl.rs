//! The `hitl_request_input` tool and the emitter contract (§4.7, C8)
//!
//! This module owns the one piece of the HITL contract that is genuinely
//! shared infrastructure rather than host-specific UI: the stable tool-call
//! id scheme, the metadata shape published alongside a pause, and the
//! validator/deadline check applied when a human's response comes back.
//!
//! # Stable id scheme
//!
//! `hitl_{runId}_{nodeId}_{invocationIndex}` — identical across retries of
//! the same invocation (so a crashed-and-restarted runner doesn't double
//! publish), distinct across loop iterations of the same node
//! (`invocationIndex` increments each time the node asks again).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SpiceError};
use crate::message::{Message, ToolCall};

/// Required/optional parameters accepted by `hitl_request_input`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlRequestParams {
    /// Required: shown to the human.
    pub prompt: String,
    /// Optional: a description of what a valid response looks like, used by
    /// [`ResumeValidator`] at resume time.
    pub validation_rules: Option<Value>,
    /// Optional: seconds until the request expires.
    pub timeout: Option<u64>,
    /// Internal: which invocation of this node this is, for the stable id.
    #[serde(default)]
    pub invocation_index: u64,
}

/// Metadata describing a pending human interaction, published to an
/// [`HitlEventEmitter`] and returned by [`crate::runner::GraphRunner::get_pending_interactions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInteraction {
    pub tool_call_id: String,
    pub interaction_type: String,
    pub prompt: String,
    pub run_id: String,
    pub node_id: String,
    pub invocation_index: u64,
    pub validation_rules: Option<Value>,
    pub timeout: Option<u64>,
    pub requested_at: DateTime<Utc>,
    pub extra: HashMap<String, Value>,
}

/// Build the stable tool-call id for a HITL request: `hitl_{run_id}_{node_id}_{index}`,
/// with the trailing `_{index}` omitted when `index == 0` (the common case).
pub fn stable_tool_call_id(run_id: &str, node_id: &str, invocation_index: u64) -> String {
    if invocation_index == 0 {
        format!("hitl_{run_id}_{node_id}")
    } else {
        format!("hitl_{run_id}_{node_id}_{invocation_index}")
    }
}

/// Publishes HITL requests to external listeners (a UI, a notification
/// service, ...). The default is a no-op so the core can run headless in tests.
pub trait HitlEventEmitter: Send + Sync {
    fn emit_request(&self, interaction: &HumanInteraction);
}

/// The default [`HitlEventEmitter`]: does nothing.
#[derive(Default)]
pub struct NoopHitlEventEmitter;

impl HitlEventEmitter for NoopHitlEventEmitter {
    fn emit_request(&self, _interaction: &HumanInteraction) {}
}

/// Invoke the `hitl_request_input` tool: requires `run_id`/`node_id` from the
/// tool-call context (§4.7 step 1), builds the stable id, constructs the
/// [`HumanInteraction`], emits it, and appends a tool call + WAITING
/// transition to `message`.
pub fn request_input(
    message: &Message,
    run_id: Option<&str>,
    node_id: Option<&str>,
    params: HitlRequestParams,
    emitter: &dyn HitlEventEmitter,
) -> Result<Message> {
    let run_id = run_id
        .or(message.run_id.as_deref())
        .ok_or_else(|| SpiceError::MissingContext("hitl_request_input requires runId".into()))?;
    let node_id = node_id
        .or(message.node_id.as_deref())
        .ok_or_else(|| SpiceError::MissingContext("hitl_request_input requires nodeId".into()))?;

    let tool_call_id = stable_tool_call_id(run_id, node_id, params.invocation_index);

    let interaction = HumanInteraction {
        tool_call_id: tool_call_id.clone(),
        interaction_type: "input".into(),
        prompt: params.prompt.clone(),
        run_id: run_id.to_string(),
        node_id: node_id.to_string(),
        invocation_index: params.invocation_index,
        validation_rules: params.validation_rules.clone(),
        timeout: params.timeout,
        requested_at: Utc::now(),
        extra: HashMap::new(),
    };
    emitter.emit_request(&interaction);

    let arguments = serde_json::json!({
        "prompt": params.prompt,
        "validation_rules": params.validation_rules,
        "timeout": params.timeout,
        "_hitl_invocation_index": params.invocation_index,
    });
    let tool_call = ToolCall::with_id(tool_call_id, crate::message::HITL_REQUEST_FUNCTION, arguments);

    // `transition_to` only records `node_id` on the `StateTransition` entry;
    // the struct's own `node_id` must be set here too, since that field (not
    // state_history) is what the runner resumes against and what
    // `persist_if_waiting` keys the checkpoint by.
    let mut waiting = message
        .with_tool_call(tool_call)
        .transition_to(crate::message::MessageState::Waiting, Some("awaiting human input".into()), Some(node_id.to_string()))?;
    waiting.node_id = Some(node_id.to_string());
    Ok(waiting)
}

/// A predicate a HITL node captures to validate a human's response at resume time.
pub type ResumeValidator = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Validates a human's response against the captured validator (if any) and
/// the request's deadline.
pub struct ResumeCheck<'a> {
    pub validator: Option<&'a ResumeValidator>,
    pub requested_at: DateTime<Utc>,
    pub timeout: Option<u64>,
}

impl<'a> ResumeCheck<'a> {
    /// Run the deadline check followed by the predicate, per §4.7's final
    /// paragraph: a late response fails with `TIMEOUT`, a predicate failure
    /// fails with `VALIDATION`.
    pub fn check(&self, response: &Value) -> Result<()> {
        if let Some(timeout) = self.timeout {
            let deadline = self.requested_at + chrono::Duration::seconds(timeout as i64);
            if Utc::now() > deadline {
                return Err(SpiceError::Timeout(format!(
                    "human response arrived after deadline {deadline}"
                )));
            }
        }
        if let Some(validator) = self.validator {
            if !validator(response) {
                return Err(SpiceError::Validation("human response failed validation_rules".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_omits_zero_index() {
        assert_eq!(stable_tool_call_id("run-1", "approve", 0), "hitl_run-1_approve");
        assert_eq!(stable_tool_call_id("run-1", "approve", 2), "hitl_run-1_approve_2");
    }

    #[test]
    fn request_input_requires_run_and_node_id() {
        let msg = Message::create("x", "a", None).transition_to(crate::message::MessageState::Running, None, None).unwrap();
        let params = HitlRequestParams {
            prompt: "approve?".into(),
            validation_rules: None,
            timeout: None,
            invocation_index: 0,
        };
        let err = request_input(&msg, None, None, params, &NoopHitlEventEmitter).unwrap_err();
        assert_eq!(err.code(), "MISSING_CONTEXT");
    }

    #[test]
    fn request_input_produces_waiting_message_with_stable_tool_call() {
        let msg = Message::create("x", "a", None)
            .transition_to(crate::message::MessageState::Running, None, None)
            .unwrap()
            .with_graph_context("g1", "approve", "run-1");
        let params = HitlRequestParams {
            prompt: "approve?".into(),
            validation_rules: None,
            timeout: None,
            invocation_index: 0,
        };
        let waiting = request_input(&msg, None, None, params, &NoopHitlEventEmitter).unwrap();
        assert!(waiting.is_waiting());
        assert!(waiting.has_tool_call(crate::message::HITL_REQUEST_FUNCTION));
        assert_eq!(waiting.tool_calls[0].id, "hitl_run-1_approve");
    }

    #[test]
    fn resume_check_rejects_response_after_deadline() {
        let check = ResumeCheck {
            validator: None,
            requested_at: Utc::now() - chrono::Duration::seconds(120),
            timeout: Some(60),
        };
        let err = check.check(&serde_json::json!("yes")).unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[test]
    fn resume_check_runs_validator_when_within_deadline() {
        let validator: ResumeValidator = Box::new(|v: &Value| v.as_str() == Some("yes"));
        let check = ResumeCheck {
            validator: Some(&validator),
            requested_at: Utc::now(),
            timeout: Some(60),
        };
        assert!(check.check(&serde_json::json!("yes")).is_ok());
        assert_eq!(check.check(&serde_json::json!("no")).unwrap_err().code(), "VALIDATION");
    }
}
