//! Sinks constants out of the start block.
//!
//! Every constant starts life in the start block, which makes its life interval span the
//! whole method. This pass moves each constant to the closest block dominating all of its
//! uses, hoisted back out of loops to the pre-header of the outermost enclosing loop.
//!
//! A phi uses its input at the end of the matching predecessor, and a catch-phi uses its
//! input at the throwing instruction, so those are the positions that count.

use crate::{
    analysis::AnalysisKind,
    compiler::{pass::Pass, CompilerContext, EventKind},
    ir::{BlockId, Graph, InstId, Opcode},
    Result,
};

/// Moves each start-block constant next to its uses.
pub struct MoveConstantsPass;

impl Default for MoveConstantsPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a constant is consumed: the block, and the instruction it must precede if the
/// use is an ordinary instruction or a thrower.
struct UsePoint {
    block: BlockId,
    anchor: Option<InstId>,
}

impl MoveConstantsPass {
    /// Creates a new move-constants pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn use_points(graph: &Graph, constant: InstId) -> Vec<UsePoint> {
        graph
            .inst(constant)
            .users()
            .iter()
            .filter_map(|user| {
                let inst = graph.inst(user.inst);
                let block = inst.block()?;
                if inst.is_catch_phi() {
                    let thrower = *inst.throwers().get(user.index)?;
                    return Some(UsePoint {
                        block: graph.inst(thrower).block()?,
                        anchor: Some(thrower),
                    });
                }
                if inst.is_phi() {
                    return Some(UsePoint {
                        block: graph.block(block).pred(user.index),
                        anchor: None,
                    });
                }
                Some(UsePoint {
                    block,
                    anchor: Some(user.inst),
                })
            })
            .collect()
    }

    /// Picks the block the constant moves to, or `None` if it should stay.
    fn target_block(graph: &Graph, points: &[UsePoint]) -> Option<BlockId> {
        let start = graph.start_block();
        let mut target = graph.common_dominator_of(points.iter().map(|p| p.block))?;
        if let Some(lp) = graph.block(target).loop_id() {
            if !graph.get_loop(lp).is_root() {
                let outer = graph.outermost(lp);
                target = graph.get_loop(outer).preheader()?;
            }
        }
        (target != start).then_some(target)
    }

    fn move_constant(graph: &mut Graph, constant: InstId, target: BlockId, points: &[UsePoint]) {
        let first_use = graph.insts(target).find(|&inst| {
            points
                .iter()
                .any(|p| p.block == target && p.anchor == Some(inst))
        });
        graph.unlink_inst(constant);
        match first_use {
            Some(anchor) => graph.insert_before(anchor, constant),
            None => graph.insert_before_terminator(target, constant),
        }
    }
}

impl Pass for MoveConstantsPass {
    fn name(&self) -> &'static str {
        "move-constants"
    }

    fn description(&self) -> &'static str {
        "Moves constants from the start block to the common dominator of their uses"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        graph.ensure(AnalysisKind::Loops)?;
        let start = graph.start_block();
        let constants: Vec<InstId> = graph
            .insts(start)
            .filter(|&inst| {
                let i = graph.inst(inst);
                i.opcode() == Opcode::Constant && i.has_users()
            })
            .collect();

        let mut moved = 0usize;
        for constant in constants {
            let points = Self::use_points(graph, constant);
            let Some(target) = Self::target_block(graph, &points) else {
                log::trace!("{constant} stays in the start block");
                continue;
            };
            Self::move_constant(graph, constant, target, &points);
            ctx.events
                .record(EventKind::ConstantMoved)
                .at(target)
                .inst(constant)
                .message(format!("moved from {start}"));
            moved += 1;
        }

        if moved > 0 {
            log::debug!("moved {moved} constant(s) out of the start block");
        }
        Ok(moved > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::{GraphBuilder, EXIT},
        checker::GraphChecker,
        ConditionCode, ConstValue, DataType,
    };

    #[test]
    fn test_constant_moves_before_its_only_user() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let zero = f.int(0);
            let seven = f.int(7);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, zero));
            let sum = f.block(2, &[EXIT], |b| {
                let sum = b.add(x, seven);
                b.ret(sum);
                sum
            });
            f.block(3, &[EXIT], |b| b.ret(x));
            (seven, sum)
        })?;
        let (seven, sum) = built.values;
        let b2 = built.block(2);
        let ctx = CompilerContext::default();

        assert!(MoveConstantsPass::new().run(&mut built.graph, &ctx)?);
        let constants = built.graph.inst_count();
        let again = built
            .graph
            .find_or_create_const(ConstValue::Int(7), DataType::Int64);
        assert_eq!(again, seven);
        assert_eq!(built.graph.inst_count(), constants);

        let graph = &built.graph;
        assert_eq!(graph.inst(seven).block(), Some(b2));
        assert_eq!(graph.inst(seven).next(), Some(sum));
        assert!(ctx.events.has(EventKind::ConstantMoved));
        GraphChecker::new(graph).check()
    }

    #[test]
    fn test_phi_use_counts_at_predecessor() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let zero = f.int(0);
            let nine = f.int(9);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, zero));
            f.block(2, &[4], |_| ());
            f.block(3, &[4], |_| ());
            f.block(4, &[EXIT], |b| {
                let phi = b.phi(DataType::Int64, &[(2, nine), (3, x)]);
                b.ret(phi);
            });
            nine
        })?;
        let nine = built.values;
        let b2 = built.block(2);
        let ctx = CompilerContext::default();

        MoveConstantsPass::new().run(&mut built.graph, &ctx)?;
        assert_eq!(built.graph.inst(nine).block(), Some(b2));
        GraphChecker::new(&built.graph).check()
    }

    #[test]
    fn test_loop_use_goes_to_preheader() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let n = f.param(0, DataType::Int64);
            let zero = f.int(0);
            let step = f.int(3);
            f.block(1, &[2], |_| ());
            let i = f.block(2, &[3, 4], |b| {
                let i = b.phi(DataType::Int64, &[]);
                b.if_cmp(ConditionCode::Lt, i, n);
                i
            });
            let next = f.block(3, &[2], |b| b.add(i, step));
            f.phi_inputs(i, &[(1, zero), (3, next)]);
            f.block(4, &[EXIT], |b| b.ret(i));
            step
        })?;
        let step = built.values;
        let preheader = built.block(1);
        let ctx = CompilerContext::default();

        assert!(MoveConstantsPass::new().run(&mut built.graph, &ctx)?);
        assert_eq!(built.graph.inst(step).block(), Some(preheader));
        GraphChecker::new(&built.graph).check()
    }

    #[test]
    fn test_constant_used_in_start_block_stays() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            let start = f.block_id(0);
            let sum = f.graph().create_inst(Opcode::Add, DataType::Int64, 0);
            f.graph().append_input(sum, x);
            f.graph().append_input(sum, one);
            f.graph().append_inst(start, sum);
            f.block(1, &[EXIT], |b| b.ret(sum));
            one
        })?;
        let one = built.values;
        let start = built.graph.start_block();
        let ctx = CompilerContext::default();

        assert!(!MoveConstantsPass::new().run(&mut built.graph, &ctx)?);
        assert_eq!(built.graph.inst(one).block(), Some(start));
        Ok(())
    }
}
