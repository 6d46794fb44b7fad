//! Loop header peeling.
//!
//! A loop whose header is its only exit test (`while (cond) { body }`) is turned into a
//! guarded do-while: the header is cloned in front of the loop and the loop is entered at
//! its body. Later passes then see a loop whose exit test sits at the bottom.

use crate::{
    analysis::AnalysisKind,
    compiler::{
        pass::Pass,
        passes::{find_loop, innermost_loops},
        CompilerContext, EventKind,
    },
    ir::{cloner::GraphCloner, BlockId, Graph},
    Error, Result,
};

/// Peels the header of innermost loops that exit only from their header.
pub struct LoopPeelingPass;

impl Default for LoopPeelingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopPeelingPass {
    /// Creates a new loop peeling pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn exits_only_from_header(graph: &Graph, header: BlockId, members: &[BlockId]) -> bool {
        let exits_from = |block: BlockId| {
            graph
                .block(block)
                .succs()
                .iter()
                .any(|s| !members.contains(s))
        };
        exits_from(header) && members.iter().all(|&b| b == header || !exits_from(b))
    }
}

impl Pass for LoopPeelingPass {
    fn name(&self) -> &'static str {
        "loop-peeling"
    }

    fn description(&self) -> &'static str {
        "Peels the exit test out of loops that only exit from their header"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        graph.ensure(AnalysisKind::Loops)?;
        let mut changed = false;

        for header in innermost_loops(graph) {
            graph.ensure(AnalysisKind::Loops)?;
            let Some(lp) = find_loop(graph, header) else {
                continue;
            };
            if !Self::exits_only_from_header(graph, header, &graph.loop_members(lp)) {
                continue;
            }
            match GraphCloner::new(graph).peel_loop_header(lp) {
                Ok(map) => {
                    let peeled = map.block(header).map_or_else(String::new, |b| format!(" into {b}"));
                    ctx.events
                        .record(EventKind::LoopPeeled)
                        .at(header)
                        .message(format!("header of {lp} peeled{peeled}"));
                    changed = true;
                }
                Err(Error::Precondition(reason)) => {
                    log::trace!("{lp}: not peeled, {reason}");
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
