//! End-to-end scenarios against the public API, one per SPEC_FULL.md §8 case.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use spice_checkpoint::memory::InMemoryCheckpointStore;
use spice_core::error::{Result, SpiceError};
use spice_core::external::{Tool, ToolResult};
use spice_core::graph::{Edge, Graph};
use spice_core::hitl::ResumeCheck;
use spice_core::message::{Message, MessageState};
use spice_core::middleware::{MiddlewareChain, StateTransitionMiddleware};
use spice_core::node::{DecisionEngine, DecisionNode, HitlInputNode, OutputNode};
use spice_core::retry::{RetryPolicy, RetryPolicyResolver};
use spice_core::runner::{GraphRunner, ResumeOptions};

fn default_runner() -> GraphRunner {
    GraphRunner::new(
        MiddlewareChain::new().with(Box::new(StateTransitionMiddleware)),
        RetryPolicyResolver::default(),
    )
}

/// Scenario 1: basic approval — draft -> review (HITL choice) -> publish/rejected.
#[tokio::test]
async fn scenario_basic_approval_reaches_success_and_deletes_checkpoint() {
    let graph = Graph::new("approval", "review")
        .with_node(Arc::new(
            HitlInputNode::new("review", "Please review the draft").with_validation_rules(json!({
                "options": ["approve", "reject"],
            })),
        ))
        .with_node(Arc::new(OutputNode::new("publish", "status", |_| json!("published"))))
        .with_edge(Edge::new("review", "publish"));

    let runner = default_runner();
    let store = InMemoryCheckpointStore::new();

    let input = Message::create("", "author", None).with_graph_context("approval", "review", "run-approval-1");
    let paused = runner.run_with_checkpoint(&graph, input, &store).await.unwrap();
    assert!(paused.message.is_waiting());
    assert_eq!(paused.message.tool_calls[0].arguments["prompt"], "Please review the draft");
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let mut response_data = HashMap::new();
    response_data.insert("selectedOption".to_string(), json!("approve"));
    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            response_data,
            &json!("approve"),
            &store,
            &ResumeOptions::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.message.state, MessageState::Completed);
    assert_eq!(report.message.data.get("status"), Some(&json!("published")));
    assert!(store.load(&checkpoint_id).await.unwrap().is_none());
}

/// Scenario 2: free-text HITL response is folded into the final content.
#[tokio::test]
async fn scenario_free_text_hitl_captures_response_in_output() {
    let graph = Graph::new("feedback", "get-input")
        .with_node(Arc::new(HitlInputNode::new("get-input", "What's your feedback?")))
        .with_node(Arc::new(OutputNode::new("done", "summary", |data| {
            let text = data.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            json!(format!("User said: {text}"))
        })))
        .with_edge(Edge::new("get-input", "done"));

    let runner = default_runner();
    let store = InMemoryCheckpointStore::new();
    let input = Message::create("", "author", None).with_graph_context("feedback", "get-input", "run-feedback-1");
    let paused = runner.run_with_checkpoint(&graph, input, &store).await.unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let mut response_data = HashMap::new();
    response_data.insert(
        "text".to_string(),
        json!("This is my detailed feedback about the system"),
    );
    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            response_data,
            &json!("This is my detailed feedback about the system"),
            &store,
            &ResumeOptions::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        report.message.data.get("summary"),
        Some(&json!("User said: This is my detailed feedback about the system"))
    );
}

/// Scenario 3: the rejection path through the same graph shape as scenario 1.
#[tokio::test]
async fn scenario_rejection_path_produces_rejected_content() {
    let graph = Graph::new("approval", "review")
        .with_node(Arc::new(HitlInputNode::new("review", "Please review the draft")))
        .with_node(Arc::new(OutputNode::new("outcome", "message", |data| {
            match data.get("selectedOption").and_then(|v| v.as_str()) {
                Some("approve") => json!("Draft was approved"),
                _ => json!("Draft was rejected by human reviewer"),
            }
        })))
        .with_edge(Edge::new("review", "outcome"));

    let runner = default_runner();
    let store = InMemoryCheckpointStore::new();
    let input = Message::create("", "author", None).with_graph_context("approval", "review", "run-reject-1");
    let paused = runner.run_with_checkpoint(&graph, input, &store).await.unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let mut response_data = HashMap::new();
    response_data.insert("selectedOption".to_string(), json!("reject"));
    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            response_data,
            &json!("reject"),
            &store,
            &ResumeOptions::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.message.data.get("message"), Some(&json!("Draft was rejected by human reviewer")));
}

/// Scenario 4: a response arriving after the HITL deadline fails with TIMEOUT.
#[tokio::test]
async fn scenario_timeout_rejects_late_response() {
    let check = ResumeCheck {
        validator: None,
        requested_at: chrono::Utc::now() - chrono::Duration::milliseconds(1100),
        timeout: Some(1),
    };
    let err = check.check(&json!("too late")).unwrap_err();
    assert_eq!(err.code(), "TIMEOUT");
    assert!(err.to_string().to_lowercase().contains("timeout") || err.to_string().to_lowercase().contains("deadline"));
}

/// Scenario 5: the captured validator rejects short responses and accepts long ones.
#[tokio::test]
async fn scenario_validator_enforces_minimum_length() {
    let validator: spice_core::hitl::ResumeValidator = Box::new(|v: &serde_json::Value| {
        v.as_str().map(|s| s.len() >= 10).unwrap_or(false)
    });
    let check = ResumeCheck {
        validator: Some(&validator),
        requested_at: chrono::Utc::now(),
        timeout: None,
    };

    let err = check.check(&json!("short")).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    assert!(check.check(&json!("This is a valid long feedback")).is_ok());
}

/// Scenario 6: a subgraph pausing inside a subgraph records two stack entries
/// and resume unwinds back to COMPLETED.
#[tokio::test]
async fn scenario_nested_subgraph_resume_unwinds_stack() {
    let leaf = Arc::new(
        Graph::new("level2", "confirm")
            .with_node(Arc::new(HitlInputNode::new("confirm", "confirm?")))
            .with_node(Arc::new(OutputNode::new("leaf-done", "confirmed", |data| {
                data.get("user_response").cloned().unwrap_or(json!(null))
            })))
            .with_edge(Edge::new("confirm", "leaf-done")),
    );

    let inner_runner = Arc::new(default_runner());
    let level1 = Arc::new(
        Graph::new("level1", "nested")
            .with_node(Arc::new(spice_core::node::SubgraphNode::new(
                "nested",
                leaf.clone(),
                inner_runner.clone(),
            )))
            .with_node(Arc::new(OutputNode::new("level1-done", "result", |data| {
                data.get("confirmed").cloned().unwrap_or(json!(null))
            })))
            .with_edge(Edge::new("nested", "level1-done")),
    );

    let outer_runner = default_runner();
    let root = Graph::new("parent", "level1")
        .with_node(Arc::new(spice_core::node::SubgraphNode::new(
            "level1",
            level1.clone(),
            Arc::new(default_runner()),
        )))
        .with_node(Arc::new(OutputNode::new("root-done", "final", |data| {
            data.get("result").cloned().unwrap_or(json!(null))
        })))
        .with_edge(Edge::new("level1", "root-done"));

    let store = InMemoryCheckpointStore::new();
    let input = Message::create("start", "user", None).with_graph_context("parent", "level1", "run-nested-1");
    let paused = outer_runner.run_with_checkpoint(&root, input, &store).await.unwrap();
    assert!(paused.message.is_waiting());

    let stack = paused
        .message
        .metadata
        .get("subgraphStack")
        .cloned()
        .unwrap_or(json!([]));
    assert_eq!(stack.as_array().map(|a| a.len()), Some(2));

    let checkpoint_id = paused.checkpoint_id.unwrap();
    let mut response_data = HashMap::new();
    response_data.insert("user_response".to_string(), json!("confirmed"));
    let report = outer_runner
        .resume_with_human_response(
            &root,
            &checkpoint_id,
            response_data,
            &json!("confirmed"),
            &store,
            &ResumeOptions::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.message.state, MessageState::Completed);
}

struct FixedDecision(&'static str);

#[async_trait]
impl DecisionEngine for FixedDecision {
    async fn decide(&self, _message: &Message) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Scenario 7: a decision engine routes to the mapped target, and fails with
/// ROUTING_ERROR when no mapping or fallback matches.
#[tokio::test]
async fn scenario_decision_routing_follows_mapping_and_fails_without_fallback() {
    let mut mapping = HashMap::new();
    mapping.insert("YES".to_string(), "yes-handler".to_string());
    mapping.insert("NO".to_string(), "no-handler".to_string());

    let graph = Graph::new("decide", "route")
        .with_node(Arc::new(DecisionNode::new("route", Arc::new(FixedDecision("YES")), mapping.clone()).with_otherwise("default")))
        .with_node(Arc::new(OutputNode::new("yes-handler", "result", |_| json!("YES_RESULT"))))
        .with_node(Arc::new(OutputNode::new("no-handler", "result", |_| json!("NO_RESULT"))))
        .with_node(Arc::new(OutputNode::new("default", "result", |_| json!("DEFAULT_RESULT"))));

    let runner = default_runner();
    let input = Message::create("test", "user", None).with_graph_context("decide", "route", "run-decide-1");
    let result = runner.execute(&graph, input).await.unwrap();
    assert_eq!(result.data.get("result"), Some(&json!("YES_RESULT")));

    let graph_no_fallback = Graph::new("decide", "route")
        .with_node(Arc::new(DecisionNode::new("route", Arc::new(FixedDecision("UNCERTAIN")), mapping)))
        .with_node(Arc::new(OutputNode::new("yes-handler", "result", |_| json!("YES_RESULT"))))
        .with_node(Arc::new(OutputNode::new("no-handler", "result", |_| json!("NO_RESULT"))));
    let input = Message::create("test", "user", None).with_graph_context("decide", "route", "run-decide-2");
    let failed = runner.execute(&graph_no_fallback, input).await.unwrap();
    assert_eq!(failed.state, MessageState::Failed);
    assert!(failed.state_history.last().unwrap().reason.as_deref().unwrap_or_default().contains("UNCERTAIN"));
}

struct FlakyTwiceThenOkTool {
    attempts: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl Tool for FlakyTwiceThenOkTool {
    async fn call(&self, _params: HashMap<String, serde_json::Value>, _message: &Message) -> Result<ToolResult> {
        let attempt = self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if attempt < 2 {
            Err(SpiceError::Network("connection reset".into()))
        } else {
            Ok(ToolResult::ok(HashMap::from([("ok".to_string(), json!(true))])))
        }
    }

    fn name(&self) -> &str {
        "flaky-twice"
    }
}

/// Scenario 9: a tool fails twice with a retryable error, then succeeds; the
/// final stateHistory shows exactly one COMPLETED entry and no FAILED entries.
#[tokio::test]
async fn scenario_retry_recovers_from_transient_failures() {
    let tool = Arc::new(FlakyTwiceThenOkTool {
        attempts: std::sync::atomic::AtomicUsize::new(0),
    });
    let graph = Graph::new("retry", "call")
        .with_node(Arc::new(spice_core::node::ToolNode::new("call", tool, |_m| HashMap::new())))
        .with_node(Arc::new(OutputNode::new("done", "result", |data| {
            data.get("ok").cloned().unwrap_or(json!(false))
        })))
        .with_edge(Edge::new("call", "done"));

    let mut resolver = RetryPolicyResolver::new(RetryPolicy::default_profile().with_max_attempts(3));
    resolver.set_for_error_code(
        "NETWORK_ERROR",
        RetryPolicy::default_profile()
            .with_max_attempts(3)
            .with_initial_backoff(std::time::Duration::from_millis(1))
            .with_max_backoff(std::time::Duration::from_millis(5)),
    );
    let runner = GraphRunner::new(
        MiddlewareChain::new().with(Box::new(StateTransitionMiddleware)),
        resolver,
    );

    let input = Message::create("go", "user", None).with_graph_context("retry", "call", "run-retry-1");
    let result = runner.execute(&graph, input).await.unwrap();

    assert_eq!(result.state, MessageState::Completed);
    let completed_count = result.state_history.iter().filter(|t| t.to == MessageState::Completed).count();
    let failed_count = result.state_history.iter().filter(|t| t.to == MessageState::Failed).count();
    assert_eq!(completed_count, 1);
    assert_eq!(failed_count, 0);
}
