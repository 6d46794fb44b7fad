//! Loop unrolling with side exits.
//!
//! Innermost reducible loops whose single back-edge block is also their only exit are
//! unrolled by the configured factor through [`GraphCloner::unroll_loop_body`]. Each copy
//! keeps its own exit test, so the trip count does not need to be known.
//!
//! Loops whose body holds more instructions than the configured limit are left alone, as
//! are loops in try regions or handlers (the cloner declines them).

use crate::{
    analysis::AnalysisKind,
    compiler::{
        pass::Pass,
        passes::{find_loop, innermost_loops},
        CompilerContext, EventKind,
    },
    config::CompilerOptions,
    ir::{cloner::GraphCloner, BlockId, Graph},
    Error, Result,
};

/// Unrolls small innermost loops.
pub struct LoopUnrollPass {
    factor: usize,
    inst_limit: usize,
}

impl Default for LoopUnrollPass {
    fn default() -> Self {
        let options = CompilerOptions::default();
        Self::new(options.unroll_factor, options.unroll_inst_limit)
    }
}

impl LoopUnrollPass {
    /// Creates an unroll pass producing `factor` copies of every loop body holding at
    /// most `inst_limit` instructions.
    #[must_use]
    pub fn new(factor: usize, inst_limit: usize) -> Self {
        Self { factor, inst_limit }
    }

    fn body_size(graph: &Graph, members: &[BlockId]) -> usize {
        members.iter().map(|&b| graph.all_insts(b).count()).sum()
    }
}

impl Pass for LoopUnrollPass {
    fn name(&self) -> &'static str {
        "loop-unroll"
    }

    fn description(&self) -> &'static str {
        "Unrolls small innermost loops with side exits"
    }

    fn should_run(&self, _graph: &Graph, _ctx: &CompilerContext) -> bool {
        self.factor >= 2
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        graph.ensure(AnalysisKind::Loops)?;
        let headers = innermost_loops(graph);
        let mut changed = false;

        for header in headers {
            graph.ensure(AnalysisKind::Loops)?;
            let Some(lp) = find_loop(graph, header) else {
                continue;
            };
            let size = Self::body_size(graph, &graph.loop_members(lp));
            if size > self.inst_limit {
                log::trace!("{lp}: {size} instruction(s) exceed the unroll limit");
                continue;
            }
            let mut cloner = GraphCloner::new(graph);
            if !cloner.is_loop_single_back_edge_exit_point(lp) {
                log::trace!("{lp}: not a single back-edge exit point");
                continue;
            }
            match cloner.unroll_loop_body(lp, self.factor, true) {
                Ok(copies) => {
                    ctx.events
                        .record(EventKind::LoopUnrolled)
                        .at(header)
                        .message(format!("{} extra copies of a {size}-instruction body", copies.len()));
                    changed = true;
                }
                Err(Error::Precondition(reason)) => {
                    log::trace!("{lp}: not unrolled, {reason}");
                }
                Err(e) => return Err(e),
            }
        }

        if changed {
            graph.ensure(AnalysisKind::Loops)?;
        }
        Ok(changed)
    }
}
