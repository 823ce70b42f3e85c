//! `spice free-text` — SPEC_FULL.md §8 scenario 2: a free-text HITL response
//! folded straight into the final output.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use spice_checkpoint::memory::InMemoryCheckpointStore;
use spice_core::graph::{Edge, Graph};
use spice_core::message::Message;
use spice_core::node::{HitlInputNode, OutputNode};
use spice_core::runner::ResumeOptions;

fn graph() -> Graph {
    Graph::new("feedback", "get-input")
        .with_node(Arc::new(HitlInputNode::new("get-input", "What's your feedback?")))
        .with_node(Arc::new(OutputNode::new("done", "summary", |data| {
            let text = data.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            json!(format!("User said: {text}"))
        })))
        .with_edge(Edge::new("get-input", "done"))
}

pub async fn run(response: &str) -> anyhow::Result<()> {
    let graph = graph();
    let runner = super::default_runner();
    let store = InMemoryCheckpointStore::new();

    let input = Message::create("", "author", None).with_graph_context("feedback", "get-input", "run-cli-free-text");
    let paused = runner.run_with_checkpoint(&graph, input, &store).await?;
    println!("⏸ paused at 'get-input': what's your feedback?");
    let checkpoint_id = paused.checkpoint_id.expect("get-input node always pauses");

    println!("→ resuming with text={response:?}");
    let mut response_data = HashMap::new();
    response_data.insert("text".to_string(), json!(response));
    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            response_data,
            &json!(response),
            &store,
            &ResumeOptions::default(),
            None,
        )
        .await?;

    println!("✓ {}: {}", report.message.state, report.message.data.get("summary").unwrap_or(&json!(null)));
    Ok(())
}
