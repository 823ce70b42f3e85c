//! `spice approval` — SPEC_FULL.md §8 scenario 1: `review(HITL choice) -> publish|rejected`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use spice_checkpoint::memory::InMemoryCheckpointStore;
use spice_core::graph::{Edge, Graph};
use spice_core::message::Message;
use spice_core::node::{HitlInputNode, OutputNode};
use spice_core::runner::ResumeOptions;

fn graph() -> Graph {
    Graph::new("approval", "review")
        .with_node(Arc::new(
            HitlInputNode::new("review", "Please review the draft").with_validation_rules(json!({
                "options": ["approve", "reject"],
            })),
        ))
        .with_node(Arc::new(OutputNode::new("outcome", "message", |data| {
            match data.get("selectedOption").and_then(|v| v.as_str()) {
                Some("approve") => json!("Draft was approved and published"),
                _ => json!("Draft was rejected by human reviewer"),
            }
        })))
        .with_edge(Edge::new("review", "outcome"))
}

pub async fn run(decision: &str) -> anyhow::Result<()> {
    let graph = graph();
    let runner = super::default_runner();
    let store = InMemoryCheckpointStore::new();

    let input = Message::create("", "author", None).with_graph_context("approval", "review", "run-cli-approval");
    let paused = runner.run_with_checkpoint(&graph, input, &store).await?;
    let prompt = paused
        .message
        .tool_calls
        .first()
        .and_then(|tc| tc.arguments.get("prompt"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    println!("⏸ paused at 'review': {prompt}");
    let checkpoint_id = paused.checkpoint_id.expect("review node always pauses");

    println!("→ resuming with selectedOption={decision:?}");
    let mut response_data = HashMap::new();
    response_data.insert("selectedOption".to_string(), json!(decision));
    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            response_data,
            &json!(decision),
            &store,
            &ResumeOptions::default(),
            None,
        )
        .await?;

    println!("✓ {}: {}", report.message.state, report.message.data.get("message").unwrap_or(&json!(null)));
    Ok(())
}
