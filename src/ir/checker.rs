//! Structural invariant checks over a [`Graph`].
//!
//! The checker is run by the pipeline after every pass when
//! [`crate::CompilerOptions::verify_after_each_pass`] is set, and by tests after edits.
//! It never mutates the graph.
//!
//! # Checks
//!
//! The checks run in order and stop at the first violation:
//! 1. **Edges** - successor and predecessor lists are mutual, with equal multiplicity
//! 2. **Instruction lists** - every listed instruction names its block, links are
//!    symmetric, phis and non-phis are in their own lists, terminators end their block
//! 3. **Phis** - a phi has one input per predecessor; a catch-phi one thrower per input
//! 4. **Def-use** - every input has the matching user entry and vice versa
//! 5. **Dominators** (when valid) - the dominator tree links are symmetric
//! 6. **Loops** (when valid) - a reducible loop header dominates its members and
//!    back-edges, and members point back at their loop
//!
//! Violations are reported as [`crate::Error::GraphCheck`].
//!
//! ```rust,ignore
//! use vmopt::ir::checker::GraphChecker;
//!
//! GraphChecker::new(&graph).check()?;
//! ```

use crate::{
    analysis::AnalysisKind,
    error::check_error,
    ir::{BlockId, Graph, InstId, Opcode, User},
    Result,
};

/// Read-only validator of graph invariants.
pub struct GraphChecker<'a> {
    graph: &'a Graph,
}

impl<'a> GraphChecker<'a> {
    /// Creates a checker over `graph`.
    #[must_use]
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    /// Runs every check.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphCheck`] describing the first violated invariant.
    pub fn check(&self) -> Result<()> {
        self.check_edges()?;
        self.check_inst_lists()?;
        self.check_phis()?;
        self.check_def_use()?;
        if self.graph.is_valid(AnalysisKind::Dominators) {
            self.check_dominators()?;
        }
        if self.graph.is_valid(AnalysisKind::Loops) && self.graph.is_valid(AnalysisKind::Dominators)
        {
            self.check_loops()?;
        }
        Ok(())
    }

    fn check_edges(&self) -> Result<()> {
        let graph = self.graph;
        if !graph.block(graph.start_block()).preds().is_empty() {
            return Err(check_error!("start block {} has predecessors", graph.start_block()));
        }
        for block in graph.blocks() {
            let b = graph.block(block);
            for &succ in b.succs() {
                if !graph.contains_block(succ) {
                    return Err(check_error!("{block} links to removed block {succ}"));
                }
                let forward = b.succs().iter().filter(|&&s| s == succ).count();
                let backward = graph.block(succ).preds().iter().filter(|&&p| p == block).count();
                if forward != backward {
                    return Err(check_error!(
                        "edge {block} -> {succ} appears {forward} time(s) in successors but {backward} time(s) in predecessors"
                    ));
                }
            }
            for &pred in b.preds() {
                if !graph.contains_block(pred) {
                    return Err(check_error!("{block} has removed predecessor {pred}"));
                }
                if !graph.block(pred).succs().contains(&block) {
                    return Err(check_error!(
                        "{pred} is a predecessor of {block} but does not link to it"
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_inst_lists(&self) -> Result<()> {
        let graph = self.graph;
        for block in graph.blocks() {
            let phis: Vec<InstId> = graph.phis(block).collect();
            self.check_list(block, &phis, true)?;
            let insts: Vec<InstId> = graph.insts(block).collect();
            self.check_list(block, &insts, false)?;

            let Some((&last, body)) = insts.split_last() else {
                continue;
            };
            if let Some(&early) = body.iter().find(|&&i| graph.inst(i).opcode().is_terminator()) {
                return Err(check_error!("terminator {early} of {block} is not last"));
            }
            let opcode = graph.inst(last).opcode();
            let succs = graph.block(block).succs().len();
            if opcode.is_conditional_branch() && succs != 2 {
                return Err(check_error!(
                    "{block} ends with {opcode} but has {succs} successor(s)"
                ));
            }
        }
        Ok(())
    }

    fn check_list(&self, block: BlockId, list: &[InstId], phis: bool) -> Result<()> {
        let graph = self.graph;
        let mut prev = None;
        for &inst in list {
            let i = graph.inst(inst);
            if i.block() != Some(block) {
                return Err(check_error!("{inst} is listed in {block} but names {:?}", i.block()));
            }
            if i.is_phi() != phis {
                return Err(check_error!("{inst} is in the wrong sub-list of {block}"));
            }
            if i.prev() != prev {
                return Err(check_error!("{inst} in {block} has a broken back link"));
            }
            prev = Some(inst);
        }
        Ok(())
    }

    fn check_phis(&self) -> Result<()> {
        let graph = self.graph;
        for block in graph.blocks() {
            let preds = graph.block(block).preds().len();
            for phi in graph.phis(block) {
                let p = graph.inst(phi);
                if p.is_catch_phi() {
                    if p.throwers().len() != p.inputs().len() {
                        return Err(check_error!(
                            "catch-phi {phi} has {} input(s) but {} thrower(s)",
                            p.inputs().len(),
                            p.throwers().len()
                        ));
                    }
                } else if p.inputs().len() != preds {
                    return Err(check_error!(
                        "phi {phi} has {} input(s) but {block} has {preds} predecessor(s)",
                        p.inputs().len()
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_def_use(&self) -> Result<()> {
        let graph = self.graph;
        for block in graph.blocks() {
            for inst in graph.all_insts(block) {
                let i = graph.inst(inst);
                for (index, &input) in i.inputs().iter().enumerate() {
                    if !graph.contains_inst(input) {
                        return Err(check_error!("{inst} uses removed instruction {input}"));
                    }
                    if !graph.inst(input).users().contains(&User { inst, index }) {
                        return Err(check_error!(
                            "{input} does not record {inst} (input {index}) as a user"
                        ));
                    }
                    if graph.inst(input).block().is_none() {
                        return Err(check_error!("{inst} uses unlinked {input}"));
                    }
                }
                for user in i.users() {
                    let holds = graph.contains_inst(user.inst)
                        && graph.inst(user.inst).inputs().get(user.index) == Some(&inst);
                    if !holds {
                        return Err(check_error!(
                            "{inst} records {} (input {}) as a user that does not use it",
                            user.inst,
                            user.index
                        ));
                    }
                }
                if i.opcode() == Opcode::SaveState && i.has_users() {
                    let foreign = i.users().iter().find(|u| {
                        let user = graph.inst(u.inst);
                        !user.requires_state() && user.opcode() != Opcode::SaveState
                    });
                    if let Some(user) = foreign {
                        return Err(check_error!(
                            "save-state {inst} is used by {} which takes no state",
                            user.inst
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_dominators(&self) -> Result<()> {
        let graph = self.graph;
        for block in graph.blocks() {
            let Some(idom) = graph.block(block).dominator() else {
                continue;
            };
            if !graph.contains_block(idom) || !graph.block(idom).dominated().contains(&block) {
                return Err(check_error!(
                    "{block} names {idom} as dominator but is not in its dominated list"
                ));
            }
        }
        Ok(())
    }

    fn check_loops(&self) -> Result<()> {
        let graph = self.graph;
        for lp in graph.loops() {
            for &member in lp.blocks() {
                if graph.block(member).loop_id() != Some(lp.id()) {
                    return Err(check_error!(
                        "{member} is listed in {} but belongs to {:?}",
                        lp.id(),
                        graph.block(member).loop_id()
                    ));
                }
            }
            let Some(header) = lp.header() else {
                continue;
            };
            if lp.is_irreducible() {
                continue;
            }
            for member in graph.loop_members(lp.id()) {
                if !graph.dominates(header, member) {
                    return Err(check_error!(
                        "header {header} of {} does not dominate member {member}",
                        lp.id()
                    ));
                }
            }
            for &source in lp.back_edges() {
                if !graph.block(source).succs().contains(&header) {
                    return Err(check_error!(
                        "back-edge {source} of {} does not link to header {header}",
                        lp.id()
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{
            builder::{GraphBuilder, EXIT},
            ConditionCode, DataType,
        },
        Error,
    };

    fn diamond() -> Result<crate::ir::builder::BuiltGraph<InstId>> {
        GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Eq, x, one));
            f.block(2, &[4], |_| ());
            f.block(3, &[4], |_| ());
            f.block(4, &[EXIT], |b| {
                let phi = b.phi(DataType::Int64, &[(2, x), (3, one)]);
                b.ret(phi);
                phi
            })
        })
    }

    #[test]
    fn test_builder_output_is_consistent() -> Result<()> {
        let mut built = diamond()?;
        GraphChecker::new(&built.graph).check()?;
        built.graph.ensure(AnalysisKind::Loops)?;
        GraphChecker::new(&built.graph).check()
    }

    #[test]
    fn test_detects_one_sided_edge() -> Result<()> {
        let mut built = diamond()?;
        let (b2, b4) = (built.block(2), built.block(4));
        built.graph.block_mut(b4).preds.retain(|&p| p != b2);
        let err = GraphChecker::new(&built.graph).check().unwrap_err();
        assert!(matches!(err, Error::GraphCheck { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn test_detects_phi_arity() -> Result<()> {
        let mut built = diamond()?;
        let phi = built.values;
        built.graph.remove_input(phi, 1);
        match GraphChecker::new(&built.graph).check() {
            Err(Error::GraphCheck { message, .. }) => assert!(message.contains("predecessor")),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_detects_broken_user_link() -> Result<()> {
        let mut built = diamond()?;
        let phi = built.values;
        let input = built.graph.inst(phi).input(0);
        built.graph.inst_mut(input).users.clear();
        match GraphChecker::new(&built.graph).check() {
            Err(Error::GraphCheck { message, .. }) => assert!(message.contains("as a user")),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }
}
