//! Safepoint insertion.
//!
//! The runtime can only interrupt compiled code at a safepoint. Every reducible loop
//! gets one at the head of its header, after the phis, unless some block of the loop
//! (inner loops included) already polls.

use crate::{
    analysis::{AnalysisKind, LoopId},
    compiler::{pass::Pass, CompilerContext, EventKind},
    ir::{DataType, Graph, Opcode},
    Result,
};

/// Places a `SafePoint` in the header of every loop lacking one.
pub struct SafepointPass;

impl Default for SafepointPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SafepointPass {
    /// Creates a new safepoint insertion pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn has_safepoint(graph: &Graph, lp: LoopId) -> bool {
        graph.loop_members(lp).into_iter().any(|block| {
            graph
                .insts(block)
                .any(|inst| graph.inst(inst).opcode() == Opcode::SafePoint)
        })
    }
}

impl Pass for SafepointPass {
    fn name(&self) -> &'static str {
        "safepoint"
    }

    fn description(&self) -> &'static str {
        "Inserts a safepoint into every loop header that lacks one"
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        graph.ensure(AnalysisKind::Loops)?;
        let missing: Vec<_> = graph
            .loops()
            .filter(|l| !l.is_irreducible())
            .filter_map(|l| l.header().map(|h| (l.id(), h)))
            .filter(|&(lp, _)| !Self::has_safepoint(graph, lp))
            .collect();

        for &(lp, header) in &missing {
            let pc = graph.block(header).pc();
            let safepoint = graph.create_inst(Opcode::SafePoint, DataType::Void, pc);
            graph.prepend_inst(header, safepoint);
            ctx.events
                .record(EventKind::SafepointInserted)
                .at(header)
                .inst(safepoint)
                .message(format!("poll for {lp}"));
        }

        Ok(!missing.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::{GraphBuilder, EXIT},
        checker::GraphChecker,
        ConditionCode,
    };

    #[test]
    fn test_inserts_once_per_loop() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let n = f.param(0, DataType::Int64);
            let zero = f.int(0);
            let one = f.int(1);
            f.block(1, &[2], |_| ());
            let i = f.block(2, &[3, 4], |b| {
                let i = b.phi(DataType::Int64, &[]);
                b.if_cmp(ConditionCode::Lt, i, n);
                i
            });
            let next = f.block(3, &[2], |b| b.add(i, one));
            f.block(4, &[EXIT], |b| b.ret(i));
            f.phi_inputs(i, &[(1, zero), (3, next)]);
            i
        })?;
        let phi = built.values;
        let header = built.block(2);
        let ctx = CompilerContext::default();
        let pass = SafepointPass::new();

        assert!(pass.run(&mut built.graph, &ctx)?);
        let graph = &built.graph;
        let first = graph.block(header).first_inst();
        assert!(first.is_some_and(|inst| graph.inst(inst).opcode() == Opcode::SafePoint));
        assert_eq!(graph.block(header).first_phi(), Some(phi));

        assert!(!pass.run(&mut built.graph, &ctx)?);
        assert_eq!(ctx.events.count_kind(EventKind::SafepointInserted), 1);
        GraphChecker::new(&built.graph).check()
    }

    #[test]
    fn test_existing_poll_in_body_is_enough() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let n = f.param(0, DataType::Int64);
            let zero = f.int(0);
            let one = f.int(1);
            f.block(1, &[2], |_| ());
            let i = f.block(2, &[3, 4], |b| {
                let i = b.phi(DataType::Int64, &[]);
                b.if_cmp(ConditionCode::Lt, i, n);
                i
            });
            let next = f.block(3, &[2], |b| {
                b.safepoint();
                b.add(i, one)
            });
            f.block(4, &[EXIT], |b| b.ret(i));
            f.phi_inputs(i, &[(1, zero), (3, next)]);
        })?;
        let ctx = CompilerContext::default();
        assert!(!SafepointPass::new().run(&mut built.graph, &ctx)?);
        Ok(())
    }
}
