//! Built-in graph passes.
//!
//! Every pass implements [`Pass`](crate::compiler::Pass), mutates the graph in place and
//! records what it did in the [`EventLog`](crate::compiler::EventLog) of the
//! [`CompilerContext`](crate::compiler::CompilerContext).
//!
//! # Pipeline Phases
//!
//! The [`PassScheduler`](crate::compiler::PassScheduler) groups the passes into phases.
//! [`CleanupPass`] runs to a fixpoint after every phase that changed the graph.
//!
//! ## Phase 1: Simplify
//!
//! Run repeatedly until stable.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`TryCatchPass`] | Links typed throws to handlers, drops unreachable handlers and empty try regions |
//! | [`BranchElimPass`] | Folds branches on constant conditions |
//!
//! ## Phase 2: Loops
//!
//! Run once.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`LoopPeelingPass`] | Moves the exit test of header-exit loops in front of the loop |
//! | [`LoopUnrollPass`] | Unrolls small innermost loops with side exits |
//!
//! ## Phase 3: Lowering
//!
//! Run once, right before liveness.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`MoveConstantsPass`] | Sinks constants from the start block towards their uses |
//! | [`SafepointPass`] | Places a safepoint in every loop header that lacks one |

mod branch_elim;
mod cleanup;
mod loop_peeling;
mod loop_unroll;
mod move_constants;
mod safepoint;
mod try_catch;

pub use branch_elim::BranchElimPass;
pub use cleanup::CleanupPass;
pub use loop_peeling::LoopPeelingPass;
pub use loop_unroll::LoopUnrollPass;
pub use move_constants::MoveConstantsPass;
pub use safepoint::SafepointPass;
pub use try_catch::TryCatchPass;

use crate::{
    analysis::LoopId,
    ir::{BlockId, Graph},
};

/// Headers of the innermost reducible loops, in loop tree order.
///
/// Loop passes restructure the CFG one loop at a time and recompute loop analysis in
/// between, so they remember headers rather than loop ids.
pub(crate) fn innermost_loops(graph: &Graph) -> Vec<BlockId> {
    graph
        .loops()
        .filter(|l| !l.is_root() && !l.is_irreducible() && l.inner().is_empty())
        .filter_map(|l| l.header())
        .collect()
}

/// Finds the loop currently headed by `header`.
pub(crate) fn find_loop(graph: &Graph, header: BlockId) -> Option<LoopId> {
    if !graph.contains_block(header) {
        return None;
    }
    let lp = graph.block(header).loop_id()?;
    (graph.get_loop(lp).header() == Some(header)).then_some(lp)
}
