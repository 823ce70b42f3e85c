//! Graph definition: nodes, edges, and entry point (§4.5)
//!
//! A [`Graph`] is a plain, immutable description of wiring — it owns no
//! execution state. [`crate::runner::GraphRunner`] is what walks it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::message::Message;
use crate::node::Node;

/// A predicate over the last node's result, used to pick among several
/// outbound edges from the same source node.
pub type EdgeGuard = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A directed connection between two nodes, optionally guarded.
pub struct Edge {
    pub from: String,
    pub to: String,
    pub guard: Option<EdgeGuard>,
    /// An edge with no guard that should only be taken when no guarded edge
    /// from the same source matches.
    pub is_default: bool,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
            is_default: false,
        }
    }

    pub fn guarded(from: impl Into<String>, to: impl Into<String>, guard: EdgeGuard) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: Some(guard),
            is_default: false,
        }
    }

    pub fn default_edge(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
            is_default: true,
        }
    }
}

/// A directed graph of [`Node`]s wired by [`Edge`]s.
pub struct Graph {
    pub id: String,
    pub entry_point: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new(id: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entry_point: entry_point.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Edges leaving `node_id`, in registration order.
    pub fn outgoing_edges(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Resolve the next node id from `node_id` given the last result: the
    /// first guarded edge whose guard matches, else a default edge, else
    /// `None` (the runner treats that as `ROUTING_ERROR`).
    pub fn resolve_next(&self, node_id: &str, result: &Message) -> Option<String> {
        let mut default_target = None;
        for edge in self.outgoing_edges(node_id) {
            if edge.is_default {
                default_target = Some(edge.to.clone());
                continue;
            }
            match &edge.guard {
                Some(guard) if guard(result) => return Some(edge.to.clone()),
                None => return Some(edge.to.clone()),
                _ => continue,
            }
        }
        default_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::OutputNode;
    use async_trait::async_trait;
    use crate::error::Result;

    struct PassThrough(String);

    #[async_trait]
    impl Node for PassThrough {
        async fn run(&self, message: Message) -> Result<Message> {
            Ok(message)
        }

        fn id(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn resolve_next_prefers_matching_guarded_edge_over_default() {
        let graph = Graph::new("g1", "start")
            .with_node(Arc::new(PassThrough("start".into())))
            .with_node(Arc::new(OutputNode::new("approved", "result", |_| serde_json::Value::Null)))
            .with_node(Arc::new(OutputNode::new("rejected", "result", |_| serde_json::Value::Null)))
            .with_edge(Edge::guarded(
                "start",
                "approved",
                Arc::new(|m: &Message| m.data.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)),
            ))
            .with_edge(Edge::default_edge("start", "rejected"));

        let mut ok_msg = Message::create("x", "a", None);
        ok_msg.data.insert("ok".into(), serde_json::Value::Bool(true));
        assert_eq!(graph.resolve_next("start", &ok_msg), Some("approved".to_string()));

        let no_msg = Message::create("x", "a", None);
        assert_eq!(graph.resolve_next("start", &no_msg), Some("rejected".to_string()));
    }

    #[test]
    fn resolve_next_is_none_when_no_edges_match() {
        let graph = Graph::new("g1", "start").with_node(Arc::new(PassThrough("start".into())));
        let msg = Message::create("x", "a", None);
        assert_eq!(graph.resolve_next("start", &msg), None);
    }
}
