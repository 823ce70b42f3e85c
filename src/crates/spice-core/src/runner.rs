//! The graph runner: durable pause/resume and retry-aware execution (§4.5, C6)
//!
//! A [`GraphRunner`] is stateless — the message, the checkpoint store, and
//! the middleware chain carry all mutable state. This is what lets the same
//! runner drive arbitrarily many concurrent runs, and what lets a subgraph
//! node hand a nested graph to a fresh-looking runner without any setup.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spice_core::runner::GraphRunner;
//! use spice_core::message::Message;
//!
//! let runner = GraphRunner::new(middleware_chain, retry_resolver);
//! let result = runner.execute(&graph, Message::create("hi", "user", None)).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use spice_checkpoint::{Checkpoint, CheckpointStore};

use crate::error::{Result, RetryableError, SpiceError};
use crate::graph::Graph;
use crate::hitl::{HumanInteraction, ResumeCheck};
use crate::message::{Message, MessageState};
use crate::middleware::MiddlewareChain;
use crate::retry::RetryPolicyResolver;

/// One failed attempt recorded against a run, for diagnostics in [`RunReport`].
#[derive(Debug, Clone)]
pub struct Failure {
    pub node_id: String,
    pub attempt: usize,
    pub error: SpiceError,
}

/// Outcome of [`GraphRunner::run_with_checkpoint`] /
/// [`GraphRunner::resume_with_human_response`]: the final or paused message,
/// plus whatever retries happened along the way.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub message: Message,
    pub checkpoint_id: Option<String>,
    pub failures: Vec<Failure>,
}

/// Controls how [`GraphRunner::resume_with_human_response`] treats an aged
/// checkpoint and how it cleans up after a terminal resume.
#[derive(Debug, Clone)]
pub struct ResumeOptions {
    /// Enforce `maxCheckpointAge`/`expiresAt`. `false` is the LENIENT preset.
    pub validate_expiration: bool,
    /// Delete the checkpoint once the resumed run reaches a terminal state.
    pub auto_cleanup: bool,
    /// Whether misuse (e.g. checkpoint not found) raises an error or is
    /// folded into a [`RunReport`] with the original message marked FAILED.
    pub throw_on_error: bool,
    /// Optional ceiling on checkpoint age, independent of `expires_at`.
    pub max_checkpoint_age: Option<Duration>,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            validate_expiration: true,
            auto_cleanup: true,
            throw_on_error: true,
            max_checkpoint_age: None,
        }
    }
}

impl ResumeOptions {
    /// Skips expiration checks entirely.
    pub fn lenient() -> Self {
        Self {
            validate_expiration: false,
            ..Default::default()
        }
    }

    /// Leaves the checkpoint in place and returns `Failure`s instead of raising.
    pub fn non_destructive() -> Self {
        Self {
            auto_cleanup: false,
            throw_on_error: false,
            ..Default::default()
        }
    }
}

/// Drives one execution from a root message to a terminal state or a pause.
pub struct GraphRunner {
    middleware: MiddlewareChain,
    retry_resolver: RetryPolicyResolver,
}

impl GraphRunner {
    pub fn new(middleware: MiddlewareChain, retry_resolver: RetryPolicyResolver) -> Self {
        Self { middleware, retry_resolver }
    }

    fn tenant_id(message: &Message) -> Option<String> {
        message
            .metadata
            .get("tenantId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Run `message` through `graph` until it reaches WAITING, COMPLETED, or
    /// FAILED (without exhausting retries).
    pub async fn execute(&self, graph: &Graph, message: Message) -> Result<Message> {
        let mut current_node_id = message
            .node_id
            .clone()
            .unwrap_or_else(|| graph.entry_point.clone());
        let mut message = if message.state == MessageState::Ready {
            message.transition_to(MessageState::Running, Some("execution started".into()), Some(current_node_id.clone()))?
        } else {
            message
        };

        loop {
            if message.is_terminal() {
                return Ok(message);
            }

            let node = graph
                .node(&current_node_id)
                .ok_or_else(|| SpiceError::Routing(format!("no such node '{current_node_id}'")))?
                .clone();
            // Anchor `node_id` to the node about to run, not just its entry
            // point: a pausing node may not be the node the message started
            // at, and both checkpointing and resume key off this field.
            message.node_id = Some(current_node_id.clone());

            let mut attempt = 1usize;
            let outcome = loop {
                let before = self.middleware.before_node(message.clone()).await;
                let before = match before {
                    Ok(m) => m,
                    Err(e) => break Err(e),
                };

                match node.run(before.clone()).await {
                    Ok(result) => {
                        break self.middleware.after_node(result).await;
                    }
                    Err(e) => {
                        let retryable = RetryableError::new(e.clone());
                        let policy = self.retry_resolver.resolve_for(
                            &retryable,
                            Some(current_node_id.as_str()),
                            Self::tenant_id(&before).as_deref(),
                        );
                        // Only codes explicitly listed in the resolved policy are retryable;
                        // an empty list means nothing is (NO_RETRY relies on this).
                        if policy.is_code_retryable(e.code()) && policy.should_retry(attempt) {
                            let delay = policy.backoff_for_attempt(attempt);
                            tracing::warn!(node = %current_node_id, attempt, error = %e, ?delay, "retrying node after failure");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        break Err(e);
                    }
                }
            };

            message = match outcome {
                Ok(m) => m,
                Err(e) => {
                    return message.transition_to(
                        MessageState::Failed,
                        Some(e.to_string()),
                        Some(current_node_id.clone()),
                    );
                }
            };

            match message.state {
                MessageState::Waiting | MessageState::Completed | MessageState::Failed => {
                    return Ok(message);
                }
                MessageState::Running => {
                    let next = if let Some(target) =
                        crate::node::last_decision_target(&current_node_id, &message)
                    {
                        Some(target)
                    } else {
                        graph.resolve_next(&current_node_id, &message)
                    };
                    match next {
                        Some(next_id) => current_node_id = next_id,
                        None => {
                            return message.transition_to(
                                MessageState::Failed,
                                Some("ROUTING_ERROR: no outbound edge matched".into()),
                                Some(current_node_id.clone()),
                            );
                        }
                    }
                }
                MessageState::Ready => {
                    message = message.transition_to(MessageState::Running, None, Some(current_node_id.clone()))?;
                }
            }
        }
    }

    /// Resume a WAITING message, merging `response`'s `data` into it and
    /// continuing from the node *after* the one that paused.
    ///
    /// When `waiting_message` paused inside a nested graph, its
    /// `metadata["subgraphStack"]` names the chain of [`crate::node::SubgraphNode`]s
    /// to unwind back through before `graph` itself can continue — see
    /// [`Self::resume_nested`].
    pub async fn resume(&self, graph: &Graph, waiting_message: Message, response: &Message) -> Result<Message> {
        if waiting_message.state != MessageState::Waiting {
            return Err(SpiceError::invalid_transition(waiting_message.state.to_string(), "RUNNING".into()));
        }

        let mut stack: Vec<crate::node::SubgraphCheckpointContext> = waiting_message
            .metadata
            .get("subgraphStack")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        if let Some(frame) = stack.pop() {
            return self.resume_nested(graph, waiting_message, response, frame, stack).await;
        }

        let paused_node_id = waiting_message
            .node_id
            .clone()
            .ok_or_else(|| SpiceError::MissingContext("waiting message has no nodeId to resume from".into()))?;
        let resumed = waiting_message
            .with_data(response.data.clone())
            .transition_to(MessageState::Running, Some("resume".into()), Some(paused_node_id.clone()))?;
        let next_id = crate::node::last_decision_target(&paused_node_id, &resumed)
            .or_else(|| graph.resolve_next(&paused_node_id, &resumed))
            .ok_or_else(|| SpiceError::Routing(format!("no outbound edge from '{paused_node_id}' to resume into")))?;
        let mut resumed = resumed;
        resumed.node_id = Some(next_id);
        self.execute(graph, resumed).await
    }

    /// Unwind one level of a nested-subgraph pause: re-enter the subgraph
    /// node named by `frame.parent_node_id` (found in `graph`) via its own
    /// dedicated runner and child graph, recursing on whatever of `stack`
    /// remains. Once the child graph itself reaches a terminal state, merge
    /// its result back into `frame.parent_message` (the only place that
    /// level's pre-dispatch RUNNING message survives) and continue `graph`
    /// from the node after the subgraph node.
    async fn resume_nested(
        &self,
        graph: &Graph,
        waiting_message: Message,
        response: &Message,
        frame: crate::node::SubgraphCheckpointContext,
        remaining_stack: Vec<crate::node::SubgraphCheckpointContext>,
    ) -> Result<Message> {
        let subgraph_node = graph
            .node(&frame.parent_node_id)
            .and_then(|n| n.as_subgraph())
            .ok_or_else(|| {
                SpiceError::Routing(format!("no subgraph node '{}' to resume into", frame.parent_node_id))
            })?;

        let mut inner_waiting = waiting_message;
        if remaining_stack.is_empty() {
            inner_waiting.metadata.remove("subgraphStack");
        } else {
            inner_waiting
                .metadata
                .insert("subgraphStack".to_string(), serde_json::to_value(&remaining_stack)?);
        }

        let child_result = subgraph_node
            .runner()
            .resume(subgraph_node.child_graph(), inner_waiting, response)
            .await?;

        if child_result.state != MessageState::Completed {
            // Still WAITING at a deeper level (already re-packaged with its
            // own stack by the recursive call) or FAILED; either way there is
            // nothing more to unwind at this level.
            return Ok(child_result);
        }

        let parent_message: Message = serde_json::from_value(frame.parent_message.clone())?;
        let resumed = subgraph_node.resume_into_parent(&parent_message, child_result);

        let current_node_id = frame.parent_node_id;
        let next_id = crate::node::last_decision_target(&current_node_id, &resumed)
            .or_else(|| graph.resolve_next(&current_node_id, &resumed))
            .ok_or_else(|| SpiceError::Routing(format!("no outbound edge from '{current_node_id}' to resume into")))?;
        let mut resumed = resumed;
        resumed.node_id = Some(next_id);
        self.execute(graph, resumed).await
    }

    /// Save a checkpoint for `message` if (and only if) it is WAITING.
    async fn persist_if_waiting(&self, message: &Message, store: &dyn CheckpointStore) -> Result<Option<String>> {
        if !message.is_waiting() {
            return Ok(None);
        }
        let run_id = message.run_id.clone().unwrap_or_default();
        let node_id = message.node_id.clone().unwrap_or_default();
        let id = Checkpoint::id_for(&run_id);
        let message_value = serde_json::to_value(message)?;
        let mut checkpoint = Checkpoint::new(
            id.clone(),
            run_id,
            message.graph_id.clone().unwrap_or_default(),
            node_id,
            message_value,
        );
        if let Some(expires_at) = message.expires_at {
            checkpoint = checkpoint.with_expiry(expires_at);
        }
        store
            .save(checkpoint)
            .await
            .map_err(|e| SpiceError::Checkpoint(e.to_string()))?;
        Ok(Some(id))
    }

    /// Wraps [`GraphRunner::execute`] with checkpoint persistence: saves a
    /// checkpoint whenever the run pauses, leaves none behind on completion.
    pub async fn run_with_checkpoint(
        &self,
        graph: &Graph,
        input: Message,
        store: &dyn CheckpointStore,
    ) -> Result<RunReport> {
        let result = self.execute(graph, input).await?;
        let checkpoint_id = self.persist_if_waiting(&result, store).await?;
        Ok(RunReport {
            message: result,
            checkpoint_id,
            failures: Vec::new(),
        })
    }

    /// Validate a human's response against the paused node's rules, then resume.
    ///
    /// `validator`/`requested_at`/`timeout` describe the deadline/predicate
    /// captured when the HITL request was issued (see [`crate::hitl::ResumeCheck`]);
    /// callers without that context may pass `None` to skip the check.
    #[allow(clippy::too_many_arguments)]
    pub async fn resume_with_human_response(
        &self,
        graph: &Graph,
        checkpoint_id: &str,
        response_data: std::collections::HashMap<String, serde_json::Value>,
        response_value: &serde_json::Value,
        store: &dyn CheckpointStore,
        options: &ResumeOptions,
        resume_check: Option<&ResumeCheck<'_>>,
    ) -> Result<RunReport> {
        let checkpoint = match store.load(checkpoint_id).await {
            Ok(Some(cp)) => cp,
            Ok(None) => {
                let err = SpiceError::Checkpoint(format!("no checkpoint '{checkpoint_id}'"));
                if options.throw_on_error {
                    return Err(err);
                }
                return Ok(RunReport {
                    message: Message::create("", "runner", None),
                    checkpoint_id: None,
                    failures: vec![Failure { node_id: String::new(), attempt: 1, error: err }],
                });
            }
            Err(e) => return Err(SpiceError::Checkpoint(e.to_string())),
        };

        if options.validate_expiration {
            if checkpoint.is_expired() {
                return Err(SpiceError::Timeout(format!("checkpoint '{checkpoint_id}' has expired")));
            }
            if let Some(max_age) = options.max_checkpoint_age {
                let age = chrono::Utc::now() - checkpoint.timestamp;
                if age.to_std().unwrap_or_default() > max_age {
                    return Err(SpiceError::Timeout(format!("checkpoint '{checkpoint_id}' exceeds max_checkpoint_age")));
                }
            }
        }

        if let Some(check) = resume_check {
            check.check(response_value)?;
        }

        let waiting_message: Message = serde_json::from_value(checkpoint.message.clone())?;
        let response = waiting_message.reply("", "human").with_data(response_data);
        let result = self.resume(graph, waiting_message, &response).await?;

        if result.is_terminal() && options.auto_cleanup {
            store
                .delete(checkpoint_id)
                .await
                .map_err(|e| SpiceError::Checkpoint(e.to_string()))?;
        }

        // A nested subgraph may re-pause at a new node; persist that as a
        // fresh checkpoint rather than re-executing `result`.
        let new_checkpoint_id = self.persist_if_waiting(&result, store).await?;
        if new_checkpoint_id.is_some() && options.auto_cleanup {
            store
                .delete(checkpoint_id)
                .await
                .map_err(|e| SpiceError::Checkpoint(e.to_string()))?;
        }

        Ok(RunReport {
            message: result,
            checkpoint_id: new_checkpoint_id,
            failures: Vec::new(),
        })
    }

    /// Introspect a paused checkpoint for the pending [`HumanInteraction`]s
    /// recorded in its message's tool calls.
    pub async fn get_pending_interactions(
        &self,
        checkpoint_id: &str,
        store: &dyn CheckpointStore,
    ) -> Result<Vec<HumanInteraction>> {
        let checkpoint = store
            .load(checkpoint_id)
            .await
            .map_err(|e| SpiceError::Checkpoint(e.to_string()))?
            .ok_or_else(|| SpiceError::Checkpoint(format!("no checkpoint '{checkpoint_id}'")))?;
        let message: Message = serde_json::from_value(checkpoint.message)?;

        let mut interactions = Vec::new();
        for tc in &message.tool_calls {
            if tc.function_name != crate::message::HITL_REQUEST_FUNCTION {
                continue;
            }
            let prompt = tc.arguments.get("prompt").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let invocation_index = tc
                .arguments
                .get("_hitl_invocation_index")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            interactions.push(HumanInteraction {
                tool_call_id: tc.id.clone(),
                interaction_type: "input".into(),
                prompt,
                run_id: message.run_id.clone().unwrap_or_default(),
                node_id: message.node_id.clone().unwrap_or_default(),
                invocation_index,
                validation_rules: tc.arguments.get("validation_rules").cloned(),
                timeout: tc.arguments.get("timeout").and_then(|v| v.as_u64()),
                requested_at: checkpoint.timestamp,
                extra: std::collections::HashMap::new(),
            });
        }
        Ok(interactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{Agent, ToolResult, Tool};
    use crate::node::{AgentNode, HitlInputNode, OutputNode};
    use crate::graph::{Edge, Graph};
    use async_trait::async_trait;
    use spice_checkpoint::memory::InMemoryCheckpointStore;
    use std::collections::HashMap;

    struct UpperAgent;

    #[async_trait]
    impl Agent for UpperAgent {
        async fn invoke(&self, message: &Message) -> Result<Message> {
            Ok(message.reply(message.content.to_uppercase(), "upper"))
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    fn simple_graph() -> Graph {
        Graph::new("g1", "shout")
            .with_node(Arc::new(AgentNode::new("shout", Arc::new(UpperAgent))))
            .with_node(Arc::new(OutputNode::new("finish", "result", |data| {
                data.get("echo").cloned().unwrap_or(serde_json::Value::Null)
            })))
            .with_edge(Edge::new("shout", "finish"))
    }

    fn runner() -> GraphRunner {
        GraphRunner::new(
            MiddlewareChain::new().with(Box::new(crate::middleware::StateTransitionMiddleware)),
            RetryPolicyResolver::default(),
        )
    }

    #[tokio::test]
    async fn execute_runs_straight_line_graph_to_completion() {
        let runner = runner();
        let graph = simple_graph();
        let msg = Message::create("hello", "user", None).with_graph_context("g1", "shout", "run-1");
        let result = runner.execute(&graph, msg).await.unwrap();
        assert_eq!(result.state, MessageState::Completed);
        assert_eq!(result.content, "HELLO");
    }

    #[tokio::test]
    async fn execute_pauses_at_hitl_node_and_resumes_with_human_response() {
        let graph = Graph::new("g1", "ask")
            .with_node(Arc::new(HitlInputNode::new("ask", "approve?")))
            .with_node(Arc::new(OutputNode::new("finish", "result", |data| {
                data.get("answer").cloned().unwrap_or(serde_json::Value::Null)
            })))
            .with_edge(Edge::new("ask", "finish"));
        let runner = runner();
        let store = InMemoryCheckpointStore::new();

        let input = Message::create("please review", "user", None).with_graph_context("g1", "ask", "run-1");
        let report = runner.run_with_checkpoint(&graph, input, &store).await.unwrap();
        assert!(report.message.is_waiting());
        let checkpoint_id = report.checkpoint_id.unwrap();

        let mut response_data = HashMap::new();
        response_data.insert("answer".to_string(), serde_json::Value::String("approved".into()));
        let final_report = runner
            .resume_with_human_response(
                &graph,
                &checkpoint_id,
                response_data,
                &serde_json::Value::String("approved".into()),
                &store,
                &ResumeOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(final_report.message.state, MessageState::Completed);
        assert_eq!(
            final_report.message.data.get("result"),
            Some(&serde_json::Value::String("approved".into()))
        );
    }

    struct AlwaysFailsTool;

    #[async_trait]
    impl Tool for AlwaysFailsTool {
        async fn call(&self, _params: HashMap<String, serde_json::Value>, _message: &Message) -> Result<ToolResult> {
            Err(SpiceError::Network("upstream unreachable".into()))
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn execute_retries_then_fails_terminal_node() {
        let graph = Graph::new("g1", "flaky").with_node(Arc::new(crate::node::ToolNode::new(
            "flaky",
            Arc::new(AlwaysFailsTool),
            |_m| HashMap::new(),
        )));
        let mut resolver = RetryPolicyResolver::new(crate::retry::RetryPolicy::default_profile().with_max_attempts(2));
        resolver.set_for_error_code("NETWORK_ERROR", crate::retry::RetryPolicy::default_profile().with_max_attempts(2));
        let runner = GraphRunner::new(
            MiddlewareChain::new().with(Box::new(crate::middleware::StateTransitionMiddleware)),
            resolver,
        );
        let msg = Message::create("x", "user", None).with_graph_context("g1", "flaky", "run-1");
        let result = runner.execute(&graph, msg).await.unwrap();
        assert_eq!(result.state, MessageState::Failed);
    }

    #[tokio::test]
    async fn get_pending_interactions_reads_hitl_tool_call_from_checkpoint() {
        let graph = Graph::new("g1", "ask").with_node(Arc::new(HitlInputNode::new("ask", "approve?")));
        let runner = runner();
        let store = InMemoryCheckpointStore::new();
        let input = Message::create("x", "user", None).with_graph_context("g1", "ask", "run-1");
        let report = runner.run_with_checkpoint(&graph, input, &store).await.unwrap();
        let checkpoint_id = report.checkpoint_id.unwrap();
        let interactions = runner.get_pending_interactions(&checkpoint_id, &store).await.unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].prompt, "approve?");
    }
}
