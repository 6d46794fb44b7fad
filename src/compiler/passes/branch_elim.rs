//! Branch elimination.
//!
//! Removes conditional branches whose outcome is known at compile time.
//!
//! # Example
//!
//! Before:
//! ```text
//! bb1:
//!     v3 = Intrinsic LiteralTrue
//!     IfImm Ne 0 v3         succs: [bb2, bb3]
//! bb3:                      preds: [bb1]
//!     ...
//! ```
//!
//! After:
//! ```text
//! bb1:                      succs: [bb2]
//! ```
//!
//! The dead successor and everything it dominates are deleted, unless the successor is
//! also reached through a predecessor it does not dominate. In that case only the edge
//! goes away. The end block is never deleted: when the dead arm dominates it, it only
//! loses its edges from the deleted blocks.

use crate::{
    analysis::AnalysisKind,
    compiler::{pass::Pass, CompilerContext, EventKind},
    ir::{BlockId, Graph, InstData, InstId, Opcode},
    Result,
};

/// Folds `If`/`IfImm` on constant conditions into a single edge.
pub struct BranchElimPass;

impl Default for BranchElimPass {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchElimPass {
    /// Creates a new branch elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the branch ending `block` and whether its condition always holds.
    fn static_outcome(graph: &Graph, block: BlockId) -> Option<(InstId, bool)> {
        if graph.block(block).succs().len() != 2 {
            return None;
        }
        let branch = graph.block(block).last_inst()?;
        let inst = graph.inst(branch);
        let outcome = match (inst.opcode(), inst.data()) {
            (Opcode::IfImm, &InstData::ConditionImm { cc, imm }) => {
                let cond = graph.inst(inst.input(0));
                let value = match cond.const_value() {
                    Some(value) => value.as_int()?,
                    None => i64::from(cond.static_bool()?),
                };
                cc.evaluate(value, imm)
            }
            (Opcode::If, &InstData::Condition(cc)) => {
                let lhs = graph.inst(inst.input(0)).const_value()?.as_int()?;
                let rhs = graph.inst(inst.input(1)).const_value()?.as_int()?;
                cc.evaluate(lhs, rhs)
            }
            _ => return None,
        };
        Some((branch, outcome))
    }

    /// Returns `true` if the dead successor must survive because control still reaches
    /// it from somewhere it does not dominate.
    fn keeps_dead_successor(graph: &Graph, block: BlockId, dead: BlockId) -> bool {
        dead == block
            || graph.block(dead).is_end()
            || graph
                .block(dead)
                .preds()
                .iter()
                .any(|&p| p != block && !graph.dominates(dead, p))
    }

    /// Collects `root` and every block it dominates, except the end block.
    fn dominated_subtree(graph: &Graph, root: BlockId) -> Vec<BlockId> {
        let mut seen = graph.new_marker();
        let mut stack = vec![root];
        seen.mark_block(root);
        while let Some(block) = stack.pop() {
            for &child in graph.block(block).dominated() {
                if seen.mark_block(child) {
                    stack.push(child);
                }
            }
        }
        graph
            .blocks()
            .filter(|&b| seen.is_block_marked(b) && !graph.block(b).is_end())
            .collect()
    }

    fn eliminate(graph: &mut Graph, ctx: &CompilerContext, block: BlockId) -> Result<bool> {
        graph.ensure(AnalysisKind::Dominators)?;
        let Some((branch, taken)) = Self::static_outcome(graph, block) else {
            return Ok(false);
        };
        let (live, dead) = if taken {
            (graph.block(block).succ(0), graph.block(block).succ(1))
        } else {
            (graph.block(block).succ(1), graph.block(block).succ(0))
        };
        if live == dead {
            log::trace!("{block}: both arms of {branch} lead to {live}");
            return Ok(false);
        }

        graph.remove_inst(branch);
        if Self::keeps_dead_successor(graph, block, dead) {
            graph.remove_edge(block, dead);
        } else {
            let subtree = Self::dominated_subtree(graph, dead);
            log::trace!("{block}: removing {} block(s) under {dead}", subtree.len());
            for &removed in &subtree {
                ctx.events
                    .record(EventKind::BlockRemoved)
                    .at(removed)
                    .message(format!("only reachable through the dead arm of {block}"));
            }
            graph.remove_blocks(&subtree);
        }

        ctx.events
            .record(EventKind::BranchEliminated)
            .at(block)
            .inst(branch)
            .message(format!("condition is always {taken}, {live} taken"));
        Ok(true)
    }
}

impl Pass for BranchElimPass {
    fn name(&self) -> &'static str {
        "branch-elim"
    }

    fn description(&self) -> &'static str {
        "Removes conditional branches on constant conditions"
    }

    fn should_run(&self, graph: &Graph, _ctx: &CompilerContext) -> bool {
        graph
            .blocks()
            .any(|block| Self::static_outcome(graph, block).is_some())
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        let candidates: Vec<BlockId> = graph
            .blocks()
            .filter(|&block| Self::static_outcome(graph, block).is_some())
            .collect();
        let mut changed = false;
        for block in candidates {
            if graph.contains_block(block) && Self::eliminate(graph, ctx, block)? {
                changed = true;
            }
        }
        if changed {
            graph.ensure(AnalysisKind::Loops)?;
        }
        Ok(changed)
    }
}
