//! # spice-core — durable graph execution with human-in-the-loop pause/resume
//!
//! `spice-core` is the engine at the heart of spice: a single immutable
//! [`message::Message`] flows through a [`graph::Graph`] of
//! [`node`](node)s — agents, tools, decisions, human-input pauses, nested
//! subgraphs, and output projections — driven by a [`runner::GraphRunner`]
//! that durably checkpoints on pause, retries transient failures under a
//! [`retry::RetryPolicyResolver`], and resumes after an arbitrary delay with
//! a human's response.
//!
//! ## Core Concepts
//!
//! ### 1. Message & State Machine
//!
//! [`message::Message`] is the canonical envelope: every mutation returns a
//! new value, and [`message::MessageState`] only ever moves along the legal
//! transition table (READY → RUNNING → {WAITING, COMPLETED, FAILED},
//! WAITING → {RUNNING, FAILED}). [`message::Validator`] checks the envelope's
//! invariants independent of the state machine itself.
//!
//! ### 2. Node Kinds
//!
//! [`node::AgentNode`], [`node::ToolNode`], [`node::DecisionNode`],
//! [`node::HitlInputNode`], [`node::SubgraphNode`], and [`node::OutputNode`]
//! all implement [`node::Node`] — the one contract the runner depends on.
//!
//! ### 3. Retry Policy
//!
//! [`retry::RetryPolicy`] captures exponential backoff with jitter;
//! [`retry::RetryPolicyResolver`] picks the right one for a given
//! `(error, node, tenant)` triple.
//!
//! ### 4. Middleware
//!
//! [`middleware::MiddlewareChain`] wraps every node execution with
//! `before_node`/`after_node`/`on_error` hooks; [`middleware::StateTransitionMiddleware`]
//! is mandatory.
//!
//! ### 5. HITL Contract
//!
//! [`hitl::request_input`] is the one place a `hitl_request_input` tool call
//! gets built, with a stable id scheme that survives retries.
//!
//! ### 6. Graph Runner
//!
//! [`runner::GraphRunner`] is the stateless driver: [`runner::GraphRunner::execute`],
//! [`runner::GraphRunner::resume`], [`runner::GraphRunner::run_with_checkpoint`],
//! and [`runner::GraphRunner::resume_with_human_response`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spice_core::graph::{Edge, Graph};
//! use spice_core::message::Message;
//! use spice_core::middleware::{MiddlewareChain, StateTransitionMiddleware};
//! use spice_core::node::{AgentNode, OutputNode};
//! use spice_core::retry::RetryPolicyResolver;
//! use spice_core::runner::GraphRunner;
//! use std::sync::Arc;
//!
//! # async fn run(agent: std::sync::Arc<dyn spice_core::external::Agent>) -> spice_core::error::Result<()> {
//! let graph = Graph::new("greeter", "respond")
//!     .with_node(Arc::new(AgentNode::new("respond", agent)))
//!     .with_node(Arc::new(OutputNode::new("done", "reply", |_| serde_json::Value::Null)))
//!     .with_edge(Edge::new("respond", "done"));
//!
//! let runner = GraphRunner::new(
//!     MiddlewareChain::new().with(Box::new(StateTransitionMiddleware)),
//!     RetryPolicyResolver::default(),
//! );
//!
//! let result = runner.execute(&graph, Message::create("hi", "user", None)).await?;
//! assert!(result.is_terminal());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod external;
pub mod graph;
pub mod hitl;
pub mod message;
pub mod middleware;
pub mod node;
pub mod retry;
pub mod runner;

pub use error::{Result, RetryHint, RetryableError, SpiceError};
pub use graph::{Edge, Graph};
pub use message::{Message, MessageState, ToolCall, Validator};
pub use node::{AgentNode, DecisionNode, HitlInputNode, Node, OutputNode, SubgraphNode, ToolNode};
pub use retry::{RetryPolicy, RetryPolicyResolver};
pub use runner::{GraphRunner, ResumeOptions, RunReport};
