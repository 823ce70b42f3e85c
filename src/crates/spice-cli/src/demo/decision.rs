//! `spice decision` — SPEC_FULL.md §8 scenario 7: a decision engine routes to
//! one of several target nodes, falling back to `default` when unmapped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use spice_core::error::Result as SpiceResult;
use spice_core::graph::Graph;
use spice_core::message::Message;
use spice_core::node::{DecisionEngine, DecisionNode, OutputNode};

/// Always returns the outcome the CLI was given — stands in for a real
/// decision engine (an LLM call, a rules evaluator) for demo purposes.
struct FixedDecision(String);

#[async_trait]
impl DecisionEngine for FixedDecision {
    async fn decide(&self, _message: &Message) -> SpiceResult<String> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

fn graph(outcome: &str) -> Graph {
    let mut mapping = HashMap::new();
    mapping.insert("YES".to_string(), "yes-handler".to_string());
    mapping.insert("NO".to_string(), "no-handler".to_string());

    Graph::new("decide", "route")
        .with_node(Arc::new(
            DecisionNode::new("route", Arc::new(FixedDecision(outcome.to_string())), mapping).with_otherwise("default"),
        ))
        .with_node(Arc::new(OutputNode::new("yes-handler", "result", |_| json!("YES_RESULT"))))
        .with_node(Arc::new(OutputNode::new("no-handler", "result", |_| json!("NO_RESULT"))))
        .with_node(Arc::new(OutputNode::new("default", "result", |_| json!("DEFAULT_RESULT"))))
}

pub async fn run(outcome: &str) -> anyhow::Result<()> {
    let graph = graph(outcome);
    let runner = super::default_runner();

    let input = Message::create("test", "user", None).with_graph_context("decide", "route", "run-cli-decision");
    let result = runner.execute(&graph, input).await?;

    let value = result.data.get("result").cloned().unwrap_or(json!(null));
    println!("✓ {}: {value}", result.state);
    Ok(())
}
