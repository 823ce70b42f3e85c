//! Node kinds — the six ways a message can be transformed as it crosses a graph (§4.4, C5)
//!
//! Every node shares one contract, [`Node::run`]: take a message, return a
//! message (or fail). What differs is where the new content comes from — an
//! external [`crate::external::Agent`], a [`crate::external::Tool`], a
//! decision table, a human, a nested graph, or a final projection. Node kinds
//! are a closed set (this corpus prefers tagged variants over open class
//! hierarchies — see SPEC_FULL.md's REDESIGN FLAGS), but the collaborators
//! each node kind calls out to (`Agent`, `Tool`, `DecisionEngine`) are open
//! `dyn` traits, since those genuinely vary per deployment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SpiceError};
use crate::external::{Agent, Tool};
use crate::hitl::{self, HitlEventEmitter, HitlRequestParams, NoopHitlEventEmitter};
use crate::message::{Message, MessageState};

/// Shared contract for every node kind.
#[async_trait]
pub trait Node: Send + Sync {
    /// Run this node against `message`, returning the resulting message.
    async fn run(&self, message: Message) -> Result<Message>;

    /// Stable id used for routing, checkpoints, and the HITL id scheme.
    fn id(&self) -> &str;

    /// Downcast to [`SubgraphNode`], for callers (namely [`crate::runner::GraphRunner::resume`])
    /// that need to re-enter a nested graph/runner by node id alone. `None`
    /// for every other node kind.
    fn as_subgraph(&self) -> Option<&SubgraphNode> {
        None
    }
}

/// Invokes an external [`Agent`]; preserves the caller's RUNNING state.
pub struct AgentNode {
    id: String,
    agent: Arc<dyn Agent>,
}

impl AgentNode {
    pub fn new(id: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self { id: id.into(), agent }
    }
}

#[async_trait]
impl Node for AgentNode {
    async fn run(&self, message: Message) -> Result<Message> {
        let mut reply = self.agent.invoke(&message).await.map_err(|e| {
            SpiceError::node_execution(self.id.clone(), e.to_string())
        })?;
        reply.state = message.state;
        reply.state_history = message.state_history.clone();
        reply.graph_id = message.graph_id.clone();
        reply.node_id = Some(self.id.clone());
        reply.run_id = message.run_id.clone();
        Ok(reply)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Projects `message` into tool parameters, invokes a [`Tool`], merges the
/// result into `data`.
pub struct ToolNode {
    id: String,
    tool: Arc<dyn Tool>,
    projector: Arc<dyn Fn(&Message) -> HashMap<String, Value> + Send + Sync>,
}

impl ToolNode {
    pub fn new(
        id: impl Into<String>,
        tool: Arc<dyn Tool>,
        projector: impl Fn(&Message) -> HashMap<String, Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            tool,
            projector: Arc::new(projector),
        }
    }
}

#[async_trait]
impl Node for ToolNode {
    async fn run(&self, message: Message) -> Result<Message> {
        let params = (self.projector)(&message);
        let result = self.tool.call(params, &message).await.map_err(|e| {
            SpiceError::node_execution(self.id.clone(), e.to_string())
        })?;
        if !result.success {
            return Err(SpiceError::Tool(format!("tool '{}' reported failure", self.tool.name())));
        }
        Ok(message.with_data(result.data))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// A typed decision made from a message, returned as a routing key.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Evaluate `message` and return the routing key used to look up the
    /// target node in [`DecisionNode`]'s mapping.
    async fn decide(&self, message: &Message) -> Result<String>;

    /// Stable name recorded in `_decisionEngine`.
    fn name(&self) -> &str;
}

/// Routes to one of several target nodes based on a [`DecisionEngine`]'s result.
pub struct DecisionNode {
    id: String,
    engine: Arc<dyn DecisionEngine>,
    mapping: HashMap<String, String>,
    otherwise: Option<String>,
}

impl DecisionNode {
    pub fn new(id: impl Into<String>, engine: Arc<dyn DecisionEngine>, mapping: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            engine,
            mapping,
            otherwise: None,
        }
    }

    pub fn with_otherwise(mut self, target: impl Into<String>) -> Self {
        self.otherwise = Some(target.into());
        self
    }
}

#[async_trait]
impl Node for DecisionNode {
    async fn run(&self, message: Message) -> Result<Message> {
        let result = self.engine.decide(&message).await?;
        let target = self
            .mapping
            .get(&result)
            .cloned()
            .or_else(|| self.otherwise.clone())
            .ok_or_else(|| {
                SpiceError::Routing(format!(
                    "decision '{result}' has no mapping and no otherwise fallback at node '{}'",
                    self.id
                ))
            })?;

        let mut data = HashMap::new();
        data.insert("_decisionResult".into(), Value::String(result.clone()));
        data.insert("_decisionTarget".into(), Value::String(target.clone()));
        data.insert("_decisionEngine".into(), Value::String(self.engine.name().into()));
        data.insert("_decisionNodeId".into(), Value::String(self.id.clone()));
        Ok(message.with_data(data))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Reads the decision target written by `node_id`'s [`DecisionNode`] run, if
/// the node that just executed was in fact the one that wrote `_decisionTarget`.
/// `data` never drops stale keys (see [`Message::with_data`]), so this must
/// check `_decisionNodeId` rather than mere presence of `_decisionTarget` —
/// otherwise routing would wrongly keep following a decision made several
/// nodes ago.
pub fn last_decision_target(node_id: &str, message: &Message) -> Option<String> {
    let written_by = message.data.get("_decisionNodeId").and_then(Value::as_str)?;
    if written_by != node_id {
        return None;
    }
    message
        .data
        .get("_decisionTarget")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Injects a `hitl_request_input` tool call and transitions the message to WAITING.
pub struct HitlInputNode {
    id: String,
    prompt: String,
    validation_rules: Option<Value>,
    timeout: Option<u64>,
    emitter: Arc<dyn HitlEventEmitter>,
}

impl HitlInputNode {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            validation_rules: None,
            timeout: None,
            emitter: Arc::new(NoopHitlEventEmitter),
        }
    }

    pub fn with_validation_rules(mut self, rules: Value) -> Self {
        self.validation_rules = Some(rules);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn HitlEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }
}

#[async_trait]
impl Node for HitlInputNode {
    async fn run(&self, message: Message) -> Result<Message> {
        let invocation_index = message
            .tool_calls
            .iter()
            .filter(|tc| tc.function_name == crate::message::HITL_REQUEST_FUNCTION)
            .count() as u64;
        let params = HitlRequestParams {
            prompt: self.prompt.clone(),
            validation_rules: self.validation_rules.clone(),
            timeout: self.timeout,
            invocation_index,
        };
        hitl::request_input(&message, message.run_id.as_deref(), Some(&self.id), params, self.emitter.as_ref())
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// How a subgraph's child `data` is merged back into the parent message.
#[derive(Debug, Clone, Default)]
pub struct SubgraphOutputMapping {
    /// `child_key -> parent_key`; keys not present here pass through unchanged.
    pub renames: HashMap<String, String>,
}

/// Pushed onto the parent message's `metadata["subgraphStack"]` whenever a
/// nested graph pauses, so resume can unwind through every level (§4.4).
///
/// `parent_message` is a snapshot of the message [`SubgraphNode::run`]
/// received before dispatching into the child graph: still RUNNING, still
/// carrying this level's own pre-subgraph `data`/`metadata`. Resume needs it
/// because the child's own final message is COMPLETED — a terminal state
/// nothing can transition out of — so continuing this level's graph after
/// the child returns has to start from this snapshot, not from the child's
/// message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphCheckpointContext {
    pub parent_node_id: String,
    pub parent_run_id: String,
    pub child_graph_id: String,
    pub child_run_id: String,
    pub parent_message: Value,
}

/// Executes a nested graph with a derived run id, bounded by `max_depth`.
pub struct SubgraphNode {
    id: String,
    child_graph: Arc<crate::graph::Graph>,
    runner: Arc<crate::runner::GraphRunner>,
    preserve_keys: Vec<String>,
    output_mapping: SubgraphOutputMapping,
    max_depth: usize,
}

impl SubgraphNode {
    pub fn new(id: impl Into<String>, child_graph: Arc<crate::graph::Graph>, runner: Arc<crate::runner::GraphRunner>) -> Self {
        Self {
            id: id.into(),
            child_graph,
            runner,
            preserve_keys: Vec::new(),
            output_mapping: SubgraphOutputMapping::default(),
            max_depth: 10,
        }
    }

    pub fn with_preserve_keys(mut self, keys: Vec<String>) -> Self {
        self.preserve_keys = keys;
        self
    }

    pub fn with_output_mapping(mut self, mapping: SubgraphOutputMapping) -> Self {
        self.output_mapping = mapping;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn current_depth(run_id: &str) -> usize {
        run_id.matches(":subgraph:").count()
    }

    fn derive_run_id(&self, parent_run_id: &str) -> String {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{parent_run_id}:subgraph:{}:{nanos}", self.child_graph.id)
    }

    /// The nested graph this node drives.
    pub fn child_graph(&self) -> &Arc<crate::graph::Graph> {
        &self.child_graph
    }

    /// The runner dedicated to [`SubgraphNode::child_graph`].
    pub fn runner(&self) -> &Arc<crate::runner::GraphRunner> {
        &self.runner
    }

    /// Re-derive what the non-pausing branch of [`SubgraphNode::run`] would
    /// have produced, given the child's now-COMPLETED message and the
    /// snapshot of this level's own message captured in a
    /// [`SubgraphCheckpointContext`] when the child first paused. Used by
    /// [`crate::runner::GraphRunner::resume`] to unwind a pause without
    /// re-running this node.
    pub fn resume_into_parent(&self, parent_message: &Message, child_result: Message) -> Message {
        let mut merged_data = parent_message.data.clone();
        for (key, value) in child_result.data {
            let target_key = self.output_mapping.renames.get(&key).cloned().unwrap_or(key);
            merged_data.insert(target_key, value);
        }
        let mut metadata = HashMap::new();
        metadata.insert("lastSubgraphId".into(), Value::String(self.child_graph.id.clone()));
        parent_message.with_data(merged_data).with_metadata(metadata)
    }
}

#[async_trait]
impl Node for SubgraphNode {
    async fn run(&self, message: Message) -> Result<Message> {
        let parent_run_id = message
            .run_id
            .clone()
            .ok_or_else(|| SpiceError::MissingContext("subgraph node requires runId".into()))?;

        let depth = Self::current_depth(&parent_run_id);
        if depth >= self.max_depth {
            return Err(SpiceError::Validation(format!(
                "subgraph max_depth ({}) exceeded at node '{}'",
                self.max_depth, self.id
            )));
        }

        let child_run_id = self.derive_run_id(&parent_run_id);

        let mut child_metadata = HashMap::new();
        for key in &self.preserve_keys {
            if let Some(value) = message.metadata.get(key) {
                child_metadata.insert(key.clone(), value.clone());
            }
        }

        let child_input = Message::create(message.content.clone(), message.from.clone(), Some(message.correlation_id.clone()))
            .with_data(message.data.clone())
            .with_metadata(child_metadata)
            .with_graph_context(self.child_graph.id.clone(), self.child_graph.entry_point.clone(), child_run_id.clone())
            .transition_to(MessageState::Running, Some("subgraph entry".into()), None)?;

        let started = Instant::now();
        let child_result = self.runner.execute(&self.child_graph, child_input).await?;
        let elapsed = started.elapsed();

        if child_result.is_waiting() {
            let ctx = SubgraphCheckpointContext {
                parent_node_id: self.id.clone(),
                parent_run_id: parent_run_id.clone(),
                child_graph_id: self.child_graph.id.clone(),
                child_run_id: child_run_id.clone(),
                parent_message: serde_json::to_value(&message)?,
            };
            // Read the stack off `child_result`, not the parent's own input:
            // a grandchild subgraph may have already pushed its own context
            // when it paused, and that entry must not be lost here.
            let mut stack: Vec<SubgraphCheckpointContext> = child_result
                .metadata
                .get("subgraphStack")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            stack.push(ctx);
            let mut metadata = HashMap::new();
            metadata.insert("subgraphStack".to_string(), serde_json::to_value(stack)?);
            // The waiting child message becomes the run's paused state; the
            // parent context rides along in metadata so resume can find its way back.
            return Ok(child_result.with_metadata(metadata));
        }

        let mut merged_data = message.data.clone();
        for (key, value) in child_result.data {
            let target_key = self
                .output_mapping
                .renames
                .get(&key)
                .cloned()
                .unwrap_or(key);
            merged_data.insert(target_key, value);
        }

        let mut metadata = HashMap::new();
        metadata.insert("lastSubgraphId".into(), Value::String(self.child_graph.id.clone()));
        metadata.insert("lastSubgraphDuration".into(), Value::from(elapsed.as_millis() as u64));

        Ok(message.with_data(merged_data).with_metadata(metadata))
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn as_subgraph(&self) -> Option<&SubgraphNode> {
        Some(self)
    }
}

/// Projects `data` into a final value and transitions the message to COMPLETED.
pub struct OutputNode {
    id: String,
    selector: Arc<dyn Fn(&HashMap<String, Value>) -> Value + Send + Sync>,
    output_key: String,
}

impl OutputNode {
    pub fn new(
        id: impl Into<String>,
        output_key: impl Into<String>,
        selector: impl Fn(&HashMap<String, Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            selector: Arc::new(selector),
            output_key: output_key.into(),
        }
    }
}

#[async_trait]
impl Node for OutputNode {
    async fn run(&self, message: Message) -> Result<Message> {
        let output = (self.selector)(&message.data);
        let mut data = HashMap::new();
        data.insert(self.output_key.clone(), output);
        message
            .with_data(data)
            .transition_to(MessageState::Completed, Some("output produced".into()), Some(self.id.clone()))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ToolResult;

    struct UpperAgent;

    #[async_trait]
    impl Agent for UpperAgent {
        async fn invoke(&self, message: &Message) -> Result<Message> {
            Ok(message.reply(message.content.to_uppercase(), "upper-agent"))
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        async fn call(&self, params: HashMap<String, Value>, _message: &Message) -> Result<ToolResult> {
            Ok(ToolResult::ok(params))
        }

        fn name(&self) -> &str {
            "echo-tool"
        }
    }

    struct AlwaysApprove;

    #[async_trait]
    impl DecisionEngine for AlwaysApprove {
        async fn decide(&self, _message: &Message) -> Result<String> {
            Ok("approve".into())
        }

        fn name(&self) -> &str {
            "always-approve"
        }
    }

    #[tokio::test]
    async fn agent_node_preserves_running_state() {
        let node = AgentNode::new("agent-1", Arc::new(UpperAgent));
        let msg = Message::create("hello", "a", None)
            .transition_to(MessageState::Running, None, None)
            .unwrap();
        let result = node.run(msg).await.unwrap();
        assert_eq!(result.content, "HELLO");
        assert_eq!(result.state, MessageState::Running);
    }

    #[tokio::test]
    async fn tool_node_merges_result_into_data() {
        let node = ToolNode::new("tool-1", Arc::new(EchoTool), |_m| {
            let mut p = HashMap::new();
            p.insert("answer".to_string(), Value::from(42));
            p
        });
        let msg = Message::create("x", "a", None);
        let result = node.run(msg).await.unwrap();
        assert_eq!(result.data.get("answer"), Some(&Value::from(42)));
    }

    #[tokio::test]
    async fn decision_node_routes_via_mapping() {
        let mut mapping = HashMap::new();
        mapping.insert("approve".to_string(), "finalize".to_string());
        let node = DecisionNode::new("decide-1", Arc::new(AlwaysApprove), mapping);
        let msg = Message::create("x", "a", None);
        let result = node.run(msg).await.unwrap();
        assert_eq!(
            last_decision_target("decide-1", &result),
            Some("finalize".to_string())
        );
    }

    #[tokio::test]
    async fn decision_node_fails_with_routing_error_when_unmapped() {
        let node = DecisionNode::new("decide-1", Arc::new(AlwaysApprove), HashMap::new());
        let msg = Message::create("x", "a", None);
        let err = node.run(msg).await.unwrap_err();
        assert_eq!(err.code(), "ROUTING_ERROR");
    }

    #[tokio::test]
    async fn hitl_input_node_transitions_to_waiting() {
        let node = HitlInputNode::new("ask", "please confirm");
        let msg = Message::create("x", "a", None)
            .transition_to(MessageState::Running, None, None)
            .unwrap()
            .with_graph_context("g1", "ask", "run-1");
        let result = node.run(msg).await.unwrap();
        assert!(result.is_waiting());
    }

    #[tokio::test]
    async fn output_node_completes_message() {
        let node = OutputNode::new("out", "result", |data| {
            data.get("answer").cloned().unwrap_or(Value::Null)
        });
        let mut msg = Message::create("x", "a", None)
            .transition_to(MessageState::Running, None, None)
            .unwrap();
        msg.data.insert("answer".into(), Value::from(42));
        let result = node.run(msg).await.unwrap();
        assert_eq!(result.state, MessageState::Completed);
        assert_eq!(result.data.get("result"), Some(&Value::from(42)));
    }
}
