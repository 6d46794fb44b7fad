//! Try/catch resolving.
//!
//! Exception edges are conservative: every handler of a try region is a successor of the
//! region's try-begin block, whether or not anything in the region can reach it. This
//! pass tightens that picture in three steps:
//!
//! 1. A `Throw` whose exception type is known is linked straight to the first handler
//!    that catches it (exact type or catch-all), provided the handler has no phis.
//! 2. Handlers that no remaining throwing instruction of the region can reach lose their
//!    catch edges; handlers left without predecessors are deleted.
//! 3. A region without handlers is dissolved: its `Try` instruction, its block flags and
//!    its table entry go away.

use rustc_hash::FxHashSet;

use crate::{
    compiler::{pass::Pass, CompilerContext, EventKind},
    ir::{BlockFlags, BlockId, Graph, GraphFlags, InstData, InstId, Opcode, TryRegion},
    Result,
};

/// Resolves throws to handlers and removes dead handlers and empty try regions.
pub struct TryCatchPass;

impl Default for TryCatchPass {
    fn default() -> Self {
        Self::new()
    }
}

impl TryCatchPass {
    /// Creates a new try/catch resolving pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the `Try` instruction of a region and its catch types.
    fn try_of(graph: &Graph, region: &TryRegion) -> Option<(InstId, Vec<Option<u32>>)> {
        if !graph.contains_block(region.begin) {
            return None;
        }
        let inst = graph.block(region.begin).last_inst()?;
        match graph.inst(inst).data() {
            InstData::Try(types) if graph.inst(inst).opcode() == Opcode::Try => {
                Some((inst, types.clone()))
            }
            _ => None,
        }
    }

    fn region_blocks(graph: &Graph, id: u32) -> Vec<BlockId> {
        graph
            .blocks()
            .filter(|&b| graph.block(b).try_id() == Some(id))
            .collect()
    }

    /// Returns the handler catching exceptions of type `ty` first.
    fn first_match(types: &[Option<u32>], handlers: &[BlockId], ty: u32) -> Option<BlockId> {
        let index = types.iter().position(|&t| t.is_none() || t == Some(ty))?;
        handlers.get(index).copied()
    }

    fn relink_throws(graph: &mut Graph, ctx: &CompilerContext) -> FxHashSet<(BlockId, BlockId)> {
        let mut relinked = FxHashSet::default();
        for region in graph.try_regions().to_vec() {
            let Some((_, types)) = Self::try_of(graph, &region) else {
                continue;
            };
            let throws: Vec<(InstId, u32)> = Self::region_blocks(graph, region.id)
                .into_iter()
                .filter_map(|b| graph.block(b).last_inst())
                .filter_map(|inst| match graph.inst(inst).data() {
                    InstData::Throw(Some(ty)) if graph.inst(inst).opcode() == Opcode::Throw => {
                        Some((inst, *ty))
                    }
                    _ => None,
                })
                .collect();

            for (throw, ty) in throws {
                let Some(handler) = Self::first_match(&types, &region.handlers, ty) else {
                    continue;
                };
                if !graph.contains_block(handler) || graph.block(handler).has_phis() {
                    log::trace!("{throw}: handler {handler} merges values, keeping the throw");
                    continue;
                }
                let Some(block) = graph.inst(throw).block() else {
                    continue;
                };
                for succ in graph.block(block).succs().to_vec() {
                    graph.remove_edge(block, succ);
                }
                graph.drop_thrower(throw);
                graph.remove_inst(throw);
                graph.connect(block, handler);
                relinked.insert((block, handler));
                ctx.events
                    .record(EventKind::ThrowRelinked)
                    .at(block)
                    .inst(throw)
                    .message(format!("exception type {ty} goes straight to {handler}"));
            }
        }
        relinked
    }

    /// Returns the handlers of `region` that some throwing instruction can still reach.
    fn reachable_handlers(graph: &Graph, region: &TryRegion, types: &[Option<u32>]) -> FxHashSet<BlockId> {
        let mut reachable = FxHashSet::default();
        for block in Self::region_blocks(graph, region.id) {
            for inst in graph.insts(block) {
                let i = graph.inst(inst);
                if !i.can_throw() {
                    continue;
                }
                match (i.opcode(), i.data()) {
                    (Opcode::Throw, &InstData::Throw(Some(ty))) => {
                        reachable.extend(Self::first_match(types, &region.handlers, ty));
                    }
                    _ => reachable.extend(region.handlers.iter().copied()),
                }
            }
        }
        reachable
    }

    fn remove_catch_edge(graph: &mut Graph, try_inst: InstId, from: BlockId, handler: BlockId) {
        let Some(index) = graph.block(from).succ_index(handler) else {
            return;
        };
        if graph.inst(try_inst).block() == Some(from) && index > 0 {
            if let InstData::Try(types) = graph.inst(try_inst).data() {
                let mut types = types.clone();
                if index - 1 < types.len() {
                    types.remove(index - 1);
                }
                graph.set_data(try_inst, InstData::Try(types));
            }
        }
        graph.remove_edge(from, handler);
    }

    fn remove_dead_handlers(
        graph: &mut Graph,
        ctx: &CompilerContext,
        relinked: &FxHashSet<(BlockId, BlockId)>,
    ) -> bool {
        let mut changed = false;
        for region in graph.try_regions().to_vec() {
            let Some((try_inst, types)) = Self::try_of(graph, &region) else {
                continue;
            };
            let reachable = Self::reachable_handlers(graph, &region, &types);
            let boundaries: Vec<BlockId> = Self::region_blocks(graph, region.id)
                .into_iter()
                .filter(|&b| graph.block(b).is_try_boundary())
                .collect();

            for &handler in &region.handlers {
                if reachable.contains(&handler) || !graph.contains_block(handler) {
                    continue;
                }
                for &from in &boundaries {
                    while graph.block(from).succs().contains(&handler)
                        && !relinked.contains(&(from, handler))
                    {
                        Self::remove_catch_edge(graph, try_inst, from, handler);
                    }
                }
                let dead_phis: Vec<InstId> = graph
                    .phis(handler)
                    .filter(|&p| graph.inst(p).is_catch_phi() && !graph.inst(p).has_users())
                    .collect();
                for phi in dead_phis {
                    graph.remove_inst(phi);
                }
                if let Some(entry) = graph.try_region_mut(region.id) {
                    entry.handlers.retain(|&h| h != handler);
                }
                let still_listed = graph.try_regions().iter().any(|r| r.handlers.contains(&handler));
                if !still_listed {
                    graph.clear_block_flags(handler, BlockFlags::CATCH_BEGIN);
                }
                ctx.events
                    .record(EventKind::HandlerRemoved)
                    .at(handler)
                    .message(format!("no thrower of try region {} reaches it", region.id));
                changed = true;
            }
        }
        changed
    }

    fn dissolve_empty_regions(graph: &mut Graph, ctx: &CompilerContext) -> bool {
        let empty: Vec<TryRegion> = graph
            .try_regions()
            .iter()
            .filter(|r| r.handlers.is_empty())
            .cloned()
            .collect();
        for region in &empty {
            if let Some((try_inst, _)) = Self::try_of(graph, region) {
                graph.remove_inst(try_inst);
            }
            for block in Self::region_blocks(graph, region.id) {
                graph.clear_block_flags(
                    block,
                    BlockFlags::TRY | BlockFlags::TRY_BEGIN | BlockFlags::TRY_END,
                );
                graph.set_try_id(block, None);
            }
            graph.try_regions.retain(|r| r.id != region.id);
            let event = ctx.events.record(EventKind::TryRegionRemoved);
            let event = if graph.contains_block(region.begin) {
                event.at(region.begin)
            } else {
                event
            };
            event.message(format!("try region {} has no handlers left", region.id));
        }
        if graph.try_regions().is_empty() {
            graph.set_flags(GraphFlags::HAS_TRY_CATCH, false);
        }
        !empty.is_empty()
    }
}

impl Pass for TryCatchPass {
    fn name(&self) -> &'static str {
        "try-catch"
    }

    fn description(&self) -> &'static str {
        "Links typed throws to their handlers and removes unreachable handlers"
    }

    fn should_run(&self, graph: &Graph, _ctx: &CompilerContext) -> bool {
        graph.has_try_catch()
    }

    fn run(&self, graph: &mut Graph, ctx: &CompilerContext) -> Result<bool> {
        let relinked = Self::relink_throws(graph, ctx);
        let mut changed = !relinked.is_empty();
        changed |= Self::remove_dead_handlers(graph, ctx, &relinked);

        let removed = graph.remove_unreachable_blocks();
        if removed > 0 {
            log::debug!("try-catch: removed {removed} unreachable block(s)");
            changed = true;
        }
        changed |= Self::dissolve_empty_regions(graph, ctx);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::AnalysisKind,
        ir::{
            builder::{GraphBuilder, EXIT},
            checker::GraphChecker,
            DataType,
        },
    };

    #[test]
    fn test_typed_throw_goes_to_handler_and_region_dissolves() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let exc = f.param(0, DataType::Reference);
            let zero = f.int(0);
            f.block(1, &[2, 4, 5], |b| {
                b.try_inst(&[Some(7), None]);
            });
            f.block(2, &[EXIT], |b| {
                let state = b.save_state(&[exc]);
                b.throw(exc, Some(7), state);
            });
            f.block(4, &[EXIT], |b| b.ret(zero));
            f.block(5, &[EXIT], |b| b.ret(exc));
            f.try_region(0, 1, 2, &[1, 2], &[4, 5]);
        })?;
        let (b1, b2, b4, b5) = (built.block(1), built.block(2), built.block(4), built.block(5));
        let ctx = CompilerContext::default();

        assert!(TryCatchPass::new().run(&mut built.graph, &ctx)?);

        let graph = &mut built.graph;
        assert_eq!(graph.block(b2).succs(), &[b4]);
        assert!(!graph.contains_block(b5));
        assert_eq!(graph.block(b1).succs(), &[b2]);
        assert!(graph.try_regions().is_empty());
        assert!(!graph.has_try_catch());
        assert!(!graph.block(b4).is_catch_begin());
        assert_eq!(graph.block(b2).try_id(), None);
        assert_eq!(ctx.events.count_kind(EventKind::ThrowRelinked), 1);
        assert_eq!(ctx.events.count_kind(EventKind::TryRegionRemoved), 1);
        graph.ensure(AnalysisKind::Loops)?;
        GraphChecker::new(graph).check()
    }

    #[test]
    fn test_call_keeps_every_handler() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            f.block(1, &[2, 3], |b| {
                b.try_inst(&[None]);
            });
            f.block(2, &[EXIT], |b| {
                let state = b.save_state(&[x]);
                let r = b.call(11, DataType::Int64, &[x], state);
                b.ret(r);
            });
            f.block(3, &[EXIT], |b| b.ret(x));
            f.try_region(0, 1, 2, &[1, 2], &[3]);
        })?;
        let ctx = CompilerContext::default();
        let pass = TryCatchPass::new();

        assert!(pass.should_run(&built.graph, &ctx));
        assert!(!pass.run(&mut built.graph, &ctx)?);
        assert_eq!(built.graph.try_regions().len(), 1);
        assert!(built.graph.has_try_catch());
        Ok(())
    }

    #[test]
    fn test_region_without_throwers_loses_its_handlers() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            f.block(1, &[2, 3], |b| {
                b.try_inst(&[None]);
            });
            f.block(2, &[EXIT], |b| {
                let y = b.add(x, x);
                b.ret(y);
            });
            f.block(3, &[EXIT], |b| b.ret(x));
            f.try_region(0, 1, 2, &[1, 2], &[3]);
        })?;
        let (b1, b3) = (built.block(1), built.block(3));
        let ctx = CompilerContext::default();

        assert!(TryCatchPass::new().run(&mut built.graph, &ctx)?);

        let graph = &built.graph;
        assert!(!graph.contains_block(b3));
        assert_eq!(graph.block(b1).succs().len(), 1);
        assert!(graph.insts(b1).all(|i| graph.inst(i).opcode() != Opcode::Try));
        assert!(ctx.events.has(EventKind::HandlerRemoved));
        GraphChecker::new(graph).check()
    }
}
