//! Dead-code and empty-block cleanup.
//!
//! The pass runs four sweeps until none of them changes the graph:
//!
//! 1. phis without users are deleted,
//! 2. empty single-successor blocks are bypassed with [`Graph::remove_empty_block`],
//! 3. instructions not reachable through inputs from a non-removable instruction are
//!    deleted (mark and sweep),
//! 4. a block with a single successor absorbs that successor when it is the successor's
//!    only predecessor and the successor has no phis.
//!
//! Start, end, try boundary, catch-begin and loop pre-header blocks are never bypassed.
//! When a predecessor of an empty block already links to the block's successor (a
//! triangle), the block goes only if every successor phi receives the same value along
//! both paths; the predecessor's branch then collapses into a single edge.
//!
//! Dominators are recomputed at the end if the CFG changed. Loop analysis is kept up to
//! date in place and survives that recomputation. With irreducible loops, or after a
//! collapsed triangle, it is recomputed instead.

use crate::{
    analysis::{AnalysisKind, AnalysisSet},
    compiler::{pass::Pass, CompilerContext, EventKind},
    ir::{BlockFlags, BlockId, Graph, InstId},
    Result,
};

/// Removes dead phis, empty blocks and dead instructions, and joins straight-line blocks.
pub struct CleanupPass;

impl Default for CleanupPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupPass {
    /// Creates a new cleanup pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn remove_dead_phis(graph: &mut Graph, ctx: &CompilerContext) -> bool {
        let mut changed = false;
        loop {
            let dead: Vec<InstId> = graph
                .blocks()
                .flat_map(|b| graph.phis(b).collect::<Vec<_>>())
                .filter(|&phi| !graph.inst(phi).has_users())
                .collect();
            if dead.is_empty() {
                return changed;
            }
            for phi in dead {
                let block = graph.inst(phi).block();
                graph.remove_inst(phi);
                let event = ctx.events.record(EventKind::PhiRemoved).inst(phi);
                match block {
                    Some(block) => event.at(block).message("phi without users"),
                    None => event.message("phi without users"),
                }
            }
            changed = true;
        }
    }

    fn is_preheader(graph: &Graph, block: BlockId) -> bool {
        graph.is_valid(AnalysisKind::Loops)
            && graph.loops().any(|l| l.preheader() == Some(block))
    }

    fn is_candidate(graph: &Graph, block: BlockId) -> bool {
        let b = graph.block(block);
        !b.is_start()
            && !b.is_end()
            && !b.is_try_boundary()
            && !b.is_catch_begin()
            && !Self::is_preheader(graph, block)
            && graph.can_remove_empty_block(block)
    }

    /// Collapses the branches of predecessors that reach `succ` both directly and through
    /// `block`. Returns `false` if a successor phi tells the two paths apart.
    fn collapse_triangles(graph: &mut Graph, block: BlockId, succ: BlockId) -> bool {
        let triangles: Vec<BlockId> = graph
            .block(block)
            .preds()
            .iter()
            .copied()
            .filter(|&p| graph.block(p).succs().contains(&succ))
            .collect();
        if triangles.is_empty() {
            return true;
        }
        if graph.block(block).has_phis() {
            return false;
        }
        let Some(slot) = graph.block(succ).pred_index(block) else {
            return false;
        };
        let same_values = triangles.iter().all(|&pred| {
            let Some(direct) = graph.block(succ).pred_index(pred) else {
                return false;
            };
            graph.phis(succ).all(|phi| {
                let phi = graph.inst(phi);
                phi.is_catch_phi() || phi.input(slot) == phi.input(direct)
            })
        });
        if !same_values {
            return false;
        }
        for pred in triangles {
            if let Some(branch) = graph
                .block(pred)
                .last_inst()
                .filter(|&last| graph.inst(last).opcode().is_conditional_branch())
            {
                graph.remove_inst(branch);
            }
            graph.remove_edge(pred, block);
            log::trace!("collapsed branch of {pred} around {block}");
        }
        true
    }

    fn remove_empty_blocks(graph: &mut Graph, ctx: &CompilerContext) -> bool {
        let mut changed = false;
        let candidates: Vec<BlockId> = graph.blocks().collect();
        for block in candidates {
            if !graph.contains_block(block) || !Self::is_candidate(graph, block) {
                continue;
            }
            let succ = graph.block(block).succs()[0];
            if !Self::collapse_triangles(graph, block, succ) {
                continue;
            }
            if !graph.can_remove_empty_block(block) {
                continue;
            }
            let hint = graph.has_irreducible_loop();
            graph.remove_empty_block(block, hint);
            ctx.events
                .record(EventKind::BlockRemoved)
                .at(block)
                .message(format!("empty block bypassed into {succ}"));
            changed = true;
        }
        changed
    }

    fn remove_dead_code(graph: &mut Graph, ctx: &CompilerContext) -> bool {
        let mut live = graph.new_marker();
        let mut worklist: Vec<InstId> = Vec::new();
        for block in graph.blocks() {
            for inst in graph.all_insts(block) {
                if !graph.inst(inst).is_removable() && live.mark_inst(inst) {
                    worklist.push(inst);
                }
            }
        }
        while let Some(inst) = worklist.pop() {
            for &input in graph.inst(inst).inputs() {
                if live.mark_inst(input) {
                    worklist.push(input);
                }
            }
        }

        let dead: Vec<InstId> = graph
            .blocks()
            .flat_map(|b| graph.all_insts(b).collect::<Vec<_>>())
            .filter(|&inst| !live.is_inst_marked(inst))
            .collect();
        drop(live);
        if dead.is_empty() {
            return false;
        }

        for &inst in &dead {
            graph.remove_all_inputs(inst);
        }
        for inst in dead {
            let block = graph.inst(inst).block();
            graph.drop_thrower(inst);
            graph.erase_inst(inst);
            let event = ctx.events.record(EventKind::InstructionRemoved).inst(inst);
            match block {
                Some(block) => event.at(block).message("dead"),
                None => event.message("dead"),
            }
        }
        true
    }

    fn can_join(graph: &Graph, block: BlockId) -> Option<BlockId> {
        let b = graph.block(block);
        if b.is_start() || b.succs().len() != 1 {
            return None;
        }
        let succ = b.succs()[0];
        let s = graph.block(succ);
        let joinable = succ != block
            && s.preds() == [block]
            && !s.has_phis()
            && !s.is_end()
            && !s.is_catch_begin()
            && !s.flags().contains(BlockFlags::TRY_BEGIN)
            && s.try_id() == b.try_id()
            && !b
                .last_inst()
                .is_some_and(|last| graph.inst(last).opcode().is_terminator());
        joinable.then_some(succ)
    }

    fn join_blocks(graph: &mut Graph, ctx: &CompilerContext) -> bool {
        let mut changed = false;
        let candidates: Vec<BlockId> = graph.blocks().collect();
        for block in candidates {
            while graph.contains_block(block) {
                let Some(succ) = Self::can_join(graph, block) else {
                    break;
                };
                graph.join_successor_block(block);
                ctx.events
                    .record(EventKind::BlocksJoined)
                    .at(block)
                    .message(format!("absorbed {succ}"));
                changed = true;
            }
        }
        changed
    }
}

impl Pass for CleanupPass {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn description(&self) -> &'static str {
        "Removes dead phis, empty blocks and dead code, and joins straight-line blocks"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        let had_loops = graph.is_valid(AnalysisKind::Loops);
        let mut changed = false;
        let mut cfg_changed = false;
        loop {
            let mut round = Self::remove_dead_phis(graph, ctx);
            if Self::remove_empty_blocks(graph, ctx) {
                round = true;
                cfg_changed = true;
            }
            round |= Self::remove_dead_code(graph, ctx);
            if Self::join_blocks(graph, ctx) {
                round = true;
                cfg_changed = true;
            }
            if !round {
                break;
            }
            changed = true;
        }

        if cfg_changed {
            let keep = if graph.is_valid(AnalysisKind::Loops) && !graph.has_irreducible_loop() {
                AnalysisSet::LOOPS
            } else {
                AnalysisSet::empty()
            };
            graph.recompute_preserving(AnalysisKind::Dominators, keep)?;
            if had_loops || graph.has_irreducible_loop() {
                graph.ensure(AnalysisKind::Loops)?;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::LivenessAnalyzer,
        config::TargetInfo,
        ir::{
            builder::{GraphBuilder, EXIT},
            checker::GraphChecker,
            ConditionCode, DataType,
        },
    };

    #[test]
    fn test_removes_dead_code_and_phis() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Eq, x, one));
            f.block(2, &[4], |b| b.add(x, one));
            f.block(3, &[4], |_| ());
            f.block(4, &[EXIT], |b| {
                b.phi(DataType::Int64, &[(2, x), (3, one)]);
                b.ret_void()
            });
        })?;
        let ctx = CompilerContext::default();
        let before = built.graph.inst_count();

        assert!(CleanupPass::new().run(&mut built.graph, &ctx)?);
        assert!(built.graph.inst_count() < before);
        assert!(ctx.events.has(EventKind::PhiRemoved));
        assert!(ctx.events.has(EventKind::InstructionRemoved));
        GraphChecker::new(&built.graph).check()
    }

    #[test]
    fn test_dead_code_removal_makes_liveness_stale() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            f.block(1, &[EXIT], |b| {
                let dead = b.mul(x, x);
                b.ret(x);
                dead
            })
        })?;
        let dead = built.values;
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;
        assert!(liveness.is_current(graph));

        assert!(CleanupPass::new().run(graph, &CompilerContext::default())?);

        assert!(!graph.contains_inst(dead));
        assert!(!liveness.is_current(graph));
        assert!(!graph.is_valid(AnalysisKind::Liveness));
        assert!(graph.is_valid(AnalysisKind::LinearOrder));
        Ok(())
    }

    #[test]
    fn test_keeps_triangle_with_distinct_values() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, one));
            f.block(2, &[3], |_| ());
            f.block(3, &[EXIT], |b| {
                let phi = b.phi(DataType::Int64, &[(1, x), (2, one)]);
                b.ret(phi);
            });
        })?;
        let empty = built.block(2);
        let ctx = CompilerContext::default();
        CleanupPass::new().run(&mut built.graph, &ctx)?;
        assert!(built.graph.contains_block(empty));
        GraphChecker::new(&built.graph).check()
    }

    #[test]
    fn test_collapses_triangle_with_equal_values() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, one));
            f.block(2, &[3], |_| ());
            f.block(3, &[EXIT], |b| {
                let phi = b.phi(DataType::Int64, &[(1, x), (2, x)]);
                b.ret(phi);
            });
        })?;
        let (branch_block, empty) = (built.block(1), built.block(2));
        let ctx = CompilerContext::default();
        CleanupPass::new().run(&mut built.graph, &ctx)?;

        let graph = &built.graph;
        assert!(!graph.contains_block(empty));
        if graph.contains_block(branch_block) {
            assert_eq!(graph.block(branch_block).succs().len(), 1);
        }
        GraphChecker::new(graph).check()
    }
}
