//! Bundled demo graphs, one module per `spice` subcommand. Each builds a tiny
//! graph, runs it to a HITL pause (or, for `decision`, straight through),
//! and prints the pause/resume lifecycle the way a real caller would see it.

pub mod approval;
pub mod decision;
pub mod free_text;

use spice_core::middleware::{MiddlewareChain, StateTransitionMiddleware};
use spice_core::retry::RetryPolicyResolver;
use spice_core::runner::GraphRunner;

/// The runner every demo shares: default retry policy, the mandatory
/// state-transition middleware, nothing fancier — the demos are about the
/// graph shapes, not runner configuration.
pub fn default_runner() -> GraphRunner {
    GraphRunner::new(
        MiddlewareChain::new().with(Box::new(StateTransitionMiddleware)),
        RetryPolicyResolver::default(),
    )
}
