//! The interface implemented by every optimization pass.

use crate::{compiler::CompilerContext, ir::Graph, Result};

/// A transformation over one graph.
///
/// Passes are stateless with respect to the graph they run on: everything they learn is
/// read from the graph and its analyses, everything they report goes to
/// [`CompilerContext::events`].
///
/// # Contract
///
/// - A pass reads analyses through [`Graph::require`] after bringing them up to date with
///   [`Graph::ensure`]; it never relies on an analysis it did not check.
/// - On return the graph must satisfy every structural invariant checked by
///   [`crate::ir::checker::GraphChecker`].
/// - `run` returns `Ok(true)` if and only if the graph changed.
pub trait Pass {
    /// Short identifier, used in logs and events.
    fn name(&self) -> &'static str;

    /// One-line description of what the pass does.
    fn description(&self) -> &'static str {
        ""
    }

    /// Returns `false` to skip the pass on `graph` without running it.
    fn should_run(&self, _graph: &Graph, _ctx: &CompilerContext) -> bool {
        true
    }

    /// Runs the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if an analysis the pass needs cannot be computed, or the pass
    /// hits a shape it does not support.
    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool>;
}
