//! Inserts the moves required after the allocator split intervals and assigned locations.

use rustc_hash::FxHashSet;

use crate::{
    analysis::{
        assign_needs_jump, AnalysisKind, GraphChange, IntervalId, LifeNumber, LiveRange,
        Liveness, LIFE_NUMBER_GAP,
    },
    ir::{BlockId, DataType, Graph, InstData, InstId, Opcode, SpillFillKind, SpillFillMove},
    Error, Result,
};

/// What a [`SplitResolver`] run inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Moves joining adjacent split siblings.
    pub sibling_moves: usize,
    /// Moves reconciling locations across control-flow edges.
    pub edge_moves: usize,
    /// Blocks inserted on critical edges to hold moves.
    pub resolver_blocks: usize,
}

/// Connects split siblings and resolves locations along control-flow edges.
///
/// Moves are `SpillFill` instructions numbered with the odd life number in front of
/// their insertion point. A split at the odd number closing a block is connected at the
/// end of that block, before its terminator. The liveness result is kept current: inserted instructions are
/// numbered, resolver blocks are placed in its linear order, and it is restamped with the
/// new graph epoch.
pub struct SplitResolver<'a> {
    graph: &'a mut Graph,
    liveness: &'a mut Liveness,
    block_begins: FxHashSet<LifeNumber>,
    stats: ResolveStats,
    inserted: bool,
}

impl<'a> SplitResolver<'a> {
    /// Creates a resolver over a graph and the liveness result computed for it.
    pub fn new(graph: &'a mut Graph, liveness: &'a mut Liveness) -> Self {
        let block_begins = liveness
            .linear_order()
            .iter()
            .filter_map(|&b| liveness.block_range(b))
            .map(|r| r.begin)
            .collect();
        Self {
            graph,
            liveness,
            block_begins,
            stats: ResolveStats::default(),
            inserted: false,
        }
    }

    /// Inserts every required move.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleAnalysis`] if the liveness result no longer matches the
    /// graph, or propagates a failure to recompute the reverse postorder after resolver
    /// blocks were inserted.
    pub fn run(mut self) -> Result<ResolveStats> {
        if !self.liveness.is_current(self.graph) {
            return Err(Error::StaleAnalysis(AnalysisKind::Liveness));
        }
        self.connect_siblings();
        self.resolve_edges();
        self.finish()?;
        log::debug!("split resolver: {:?}", self.stats);
        Ok(self.stats)
    }

    fn connect_siblings(&mut self) {
        let pairs: Vec<(IntervalId, IntervalId)> = self
            .liveness
            .intervals()
            .filter(|iv| !iv.is_physical())
            .filter_map(|iv| iv.sibling().map(|next| (iv.id(), next)))
            .collect();

        for (prev, next) in pairs {
            let (p, n) = (self.liveness.interval(prev), self.liveness.interval(next));
            if p.ranges().is_empty() || n.ranges().is_empty() || p.end() != n.begin() {
                continue;
            }
            let (src, dst) = (p.location(), n.location());
            if !src.is_valid() || !dst.is_valid() || src == dst {
                continue;
            }
            let split = n.begin();
            if self.block_begins.contains(&split) {
                continue;
            }
            let mv = SpillFillMove { src, dst, ty: p.ty() };
            let position = split.next_multiple_of(LIFE_NUMBER_GAP);
            if let Some(before) = self.liveness.inst_at(position) {
                self.add_sibling_move(before, mv, position - 1);
            } else if let Some(block) = self.block_ending_at(position) {
                self.add_sibling_move_at_end(block, mv, split);
            } else {
                log::warn!("no insertion point for the split of {prev} at {split}");
            }
        }
    }

    fn block_ending_at(&self, ln: LifeNumber) -> Option<BlockId> {
        self.liveness
            .linear_order()
            .iter()
            .copied()
            .find(|&b| self.liveness.block_range(b).is_some_and(|r| r.end == ln))
    }

    fn add_sibling_move(&mut self, before: InstId, mv: SpillFillMove, ln: LifeNumber) {
        self.stats.sibling_moves += 1;
        let prev = self.graph.inst(before).prev();
        if self.merge_sibling_move(prev, mv) {
            return;
        }
        let pc = self.graph.inst(before).pc();
        let spill_fill = self.create_spill_fill(SpillFillKind::ConnectSiblings, vec![mv], pc);
        self.graph.insert_before(before, spill_fill);
        self.liveness.record_inst(spill_fill, ln);
    }

    /// Connects siblings split at the last life number of `block`.
    fn add_sibling_move_at_end(&mut self, block: BlockId, mv: SpillFillMove, split: LifeNumber) {
        match self.graph.block(block).last_inst() {
            Some(last) if self.graph.inst(last).opcode().is_terminator() => {
                let ln = self.liveness.life_number(last).map_or(split, |n| n - 1);
                self.add_sibling_move(last, mv, ln);
            }
            last => {
                self.stats.sibling_moves += 1;
                if self.merge_sibling_move(last, mv) {
                    return;
                }
                let pc = self.graph.block(block).pc();
                let spill_fill =
                    self.create_spill_fill(SpillFillKind::ConnectSiblings, vec![mv], pc);
                self.graph.append_inst(block, spill_fill);
                self.liveness.record_inst(spill_fill, split);
            }
        }
    }

    /// Adds `mv` to `candidate` if it is a connect-siblings `SpillFill`.
    fn merge_sibling_move(&mut self, candidate: Option<InstId>, mv: SpillFillMove) -> bool {
        let Some(inst) = candidate else {
            return false;
        };
        let InstData::SpillFill {
            kind: SpillFillKind::ConnectSiblings,
            moves,
        } = self.graph.inst(inst).data()
        else {
            return false;
        };
        let mut moves = moves.clone();
        moves.push(mv);
        self.graph.set_data(
            inst,
            InstData::SpillFill {
                kind: SpillFillKind::ConnectSiblings,
                moves,
            },
        );
        true
    }

    fn resolve_edges(&mut self) {
        let order = self.liveness.linear_order().to_vec();
        for pred in order {
            let succs = self.graph.block(pred).succs().to_vec();
            for succ in succs {
                if self.graph.block(succ).is_catch_begin() {
                    continue;
                }
                let moves = self.edge_moves(pred, succ);
                if moves.is_empty() {
                    continue;
                }
                log::trace!("{pred} -> {succ}: {} move(s)", moves.len());
                self.stats.edge_moves += moves.len();
                self.place_edge_moves(pred, succ, moves);
            }
        }
    }

    fn edge_moves(&self, pred: BlockId, succ: BlockId) -> Vec<SpillFillMove> {
        let (Some(pred_range), Some(succ_range)) =
            (self.liveness.block_range(pred), self.liveness.block_range(succ))
        else {
            return Vec::new();
        };
        let out = pred_range.end - 1;
        let entry = succ_range.begin;
        let mut moves = Vec::new();

        for &value in self.liveness.live_in(succ) {
            self.push_move(&mut moves, value, out, value, entry);
        }
        if let Some(index) = self.graph.block(succ).pred_index(pred) {
            for phi in self.graph.phis(succ) {
                let data = self.graph.inst(phi);
                if data.is_catch_phi() {
                    continue;
                }
                if let Some(&input) = data.inputs().get(index) {
                    self.push_move(&mut moves, input, out, phi, entry);
                }
            }
        }
        moves
    }

    fn push_move(
        &self,
        moves: &mut Vec<SpillFillMove>,
        src_value: InstId,
        src_ln: LifeNumber,
        dst_value: InstId,
        dst_ln: LifeNumber,
    ) {
        let (Some(src), Some(dst)) = (
            self.liveness.location_at(src_value, src_ln),
            self.liveness.location_at(dst_value, dst_ln),
        ) else {
            return;
        };
        if src.is_valid() && dst.is_valid() && src != dst {
            moves.push(SpillFillMove {
                src,
                dst,
                ty: self.graph.inst(dst_value).ty(),
            });
        }
    }

    fn place_edge_moves(&mut self, pred: BlockId, succ: BlockId, moves: Vec<SpillFillMove>) {
        let pc = self.graph.block(pred).pc();
        let pred_end = self
            .liveness
            .block_range(pred)
            .map_or(LIFE_NUMBER_GAP, |r| r.end);
        let spill_fill = self.create_spill_fill(SpillFillKind::ResolveEdge, moves, pc);

        if self.graph.block(pred).succs().len() == 1 {
            let ln = match self.graph.block(pred).last_inst() {
                Some(last) if self.graph.inst(last).opcode().is_terminator() => self
                    .liveness
                    .life_number(last)
                    .map_or(pred_end - 1, |n| n - 1),
                _ => pred_end - 1,
            };
            self.graph.insert_before_terminator(pred, spill_fill);
            self.liveness.record_inst(spill_fill, ln);
        } else if self.graph.block(succ).preds().len() == 1 {
            let ln = self
                .liveness
                .block_range(succ)
                .map_or(pred_end + 1, |r| r.begin + 1);
            self.graph.prepend_inst(succ, spill_fill);
            self.liveness.record_inst(spill_fill, ln);
        } else {
            let block = self.graph.insert_block_between(pred, succ);
            self.graph.append_inst(block, spill_fill);
            self.liveness.record_inst(spill_fill, pred_end - 1);
            self.liveness
                .record_block(block, pred, LiveRange::new(pred_end - 1, pred_end));
            self.stats.resolver_blocks += 1;
        }
    }

    fn create_spill_fill(
        &mut self,
        kind: SpillFillKind,
        moves: Vec<SpillFillMove>,
        pc: u32,
    ) -> InstId {
        self.inserted = true;
        let inst = self.graph.create_inst_with(
            Opcode::SpillFill,
            DataType::Void,
            InstData::SpillFill { kind, moves },
            &[],
        );
        self.graph.inst_mut(inst).pc = pc;
        inst
    }

    /// Brings the graph's analysis state back in line with the patched liveness result.
    fn finish(&mut self) -> Result<()> {
        if !self.inserted {
            return Ok(());
        }
        self.graph.notify(GraphChange::Instructions);
        if self.stats.resolver_blocks > 0 {
            self.graph.force_recompute(AnalysisKind::Rpo)?;
            if !self.graph.is_valid(AnalysisKind::Loops) {
                return Ok(());
            }
            let order = self.liveness.linear_order().to_vec();
            assign_needs_jump(self.graph, &order);
            self.graph.linear_order = order;
            self.graph.mark_valid(AnalysisKind::LinearOrder);
        }
        self.graph.mark_valid(AnalysisKind::Liveness);
        self.liveness.restamp(self.graph);
        Ok(())
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
            ConditionCode,
        },
        regalloc::Location,
    };

    fn assign(liveness: &mut Liveness, inst: InstId, location: Location) {
        let id = liveness.interval_of(inst).unwrap();
        liveness.interval_mut(id).set_location(location);
    }

    #[test]
    fn test_connect_siblings_inserts_one_spill_fill() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let c = f.block(1, &[EXIT], |b| {
                let a = b.add(x, x);
                let c = b.add(a, x);
                let d = b.add(c, x);
                b.ret(d);
                c
            });
            (x, c)
        })?;
        let (x, c) = built.values;
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

        let c_ln = liveness.life_number(c).unwrap();
        let head = liveness.interval_of(x).unwrap();
        let tail = liveness.split_at(head, c_ln);
        liveness.interval_mut(head).set_location(Location::Register(0));
        liveness.interval_mut(tail).set_location(Location::Register(1));

        let stats = SplitResolver::new(graph, &mut liveness).run()?;
        assert_eq!(stats.sibling_moves, 1);
        assert_eq!(stats.edge_moves, 0);

        let spill_fill = graph.inst(c).prev().unwrap();
        assert_eq!(graph.inst(spill_fill).opcode(), Opcode::SpillFill);
        match graph.inst(spill_fill).data() {
            InstData::SpillFill { kind, moves } => {
                assert_eq!(*kind, SpillFillKind::ConnectSiblings);
                assert_eq!(moves.len(), 1);
                assert_eq!(moves[0].src, Location::Register(0));
                assert_eq!(moves[0].dst, Location::Register(1));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(liveness.life_number(spill_fill), Some(c_ln - 1));
        assert!(liveness.is_current(graph));
        Ok(())
    }

    fn connect_siblings_moves(graph: &Graph, spill_fill: InstId) -> Vec<SpillFillMove> {
        assert_eq!(graph.inst(spill_fill).opcode(), Opcode::SpillFill);
        match graph.inst(spill_fill).data() {
            InstData::SpillFill {
                kind: SpillFillKind::ConnectSiblings,
                moves,
            } => moves.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_split_closing_a_block_moves_at_block_end() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let a = f.block(1, &[2], |b| b.add(x, x));
            f.block(2, &[EXIT], |b| {
                let c = b.add(a, x);
                b.ret(c);
            });
            x
        })?;
        let x = built.values;
        let bb1 = built.block(1);
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

        let split = liveness.block_range(bb1).unwrap().end - 1;
        let head = liveness.interval_of(x).unwrap();
        let tail = liveness.split_at(head, split);
        liveness.interval_mut(head).set_location(Location::Register(0));
        liveness.interval_mut(tail).set_location(Location::Register(1));

        let stats = SplitResolver::new(graph, &mut liveness).run()?;
        assert_eq!(stats.sibling_moves, 1);
        assert_eq!(stats.edge_moves, 0);

        let spill_fill = graph.block(bb1).last_inst().unwrap();
        let moves = connect_siblings_moves(graph, spill_fill);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].src, Location::Register(0));
        assert_eq!(moves[0].dst, Location::Register(1));
        assert_eq!(liveness.life_number(spill_fill), Some(split));
        assert!(liveness.is_current(graph));
        Ok(())
    }

    #[test]
    fn test_split_closing_a_block_moves_before_terminator() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let zero = f.int(0);
            let branch = f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, zero));
            f.block(2, &[EXIT], |b| b.ret(x));
            f.block(3, &[EXIT], |b| b.ret(zero));
            (x, branch)
        })?;
        let (x, branch) = built.values;
        let bb1 = built.block(1);
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

        let split = liveness.block_range(bb1).unwrap().end - 1;
        let head = liveness.interval_of(x).unwrap();
        let tail = liveness.split_at(head, split);
        liveness.interval_mut(head).set_location(Location::Register(0));
        liveness.interval_mut(tail).set_location(Location::StackSlot(2));
        let branch_ln = liveness.life_number(branch).unwrap();

        let stats = SplitResolver::new(graph, &mut liveness).run()?;
        assert_eq!(stats.sibling_moves, 1);
        assert_eq!(stats.edge_moves, 0);

        let spill_fill = graph.inst(branch).prev().unwrap();
        let moves = connect_siblings_moves(graph, spill_fill);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].src, Location::Register(0));
        assert_eq!(moves[0].dst, Location::StackSlot(2));
        assert_eq!(liveness.life_number(spill_fill), Some(branch_ln - 1));
        assert_eq!(graph.block(bb1).last_inst(), Some(branch));
        assert!(liveness.is_current(graph));
        Ok(())
    }

    #[test]
    fn test_critical_edge_gets_resolver_block() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let y = f.param(1, DataType::Int64);
            let p = f.param(2, DataType::Bool);
            f.block(1, &[2, 3], |b| {
                b.if_imm(p);
            });
            f.block(2, &[3], |_| ());
            let phi = f.block(3, &[EXIT], |b| {
                let phi = b.phi(DataType::Int64, &[(1, x), (2, y)]);
                b.ret(phi);
                phi
            });
            (x, y, phi)
        })?;
        let (x, y, phi) = built.values;
        let (bb1, bb2, bb3) = (built.block(1), built.block(2), built.block(3));
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;
        assign(&mut liveness, x, Location::Register(0));
        assign(&mut liveness, y, Location::Register(1));
        assign(&mut liveness, phi, Location::Register(2));

        let stats = SplitResolver::new(graph, &mut liveness).run()?;
        assert_eq!(stats.edge_moves, 2);
        assert_eq!(stats.resolver_blocks, 1);

        let resolver = graph.block(bb1).succ(1);
        assert_ne!(resolver, bb3);
        assert_eq!(graph.block(resolver).succs(), &[bb3]);
        assert_eq!(graph.block(bb3).preds(), &[resolver, bb2]);
        let moves: Vec<InstId> = graph.insts(resolver).collect();
        assert_eq!(moves.len(), 1);
        assert_eq!(graph.inst(moves[0]).opcode(), Opcode::SpillFill);

        let tail = graph.block(bb2).last_inst().unwrap();
        assert_eq!(graph.inst(tail).opcode(), Opcode::SpillFill);

        let order = liveness.linear_order();
        let at = order.iter().position(|&b| b == bb1).unwrap();
        assert_eq!(order[at + 1], resolver);
        assert_eq!(graph.linear_order()?, order);
        assert!(liveness.is_current(graph));
        Ok(())
    }

    #[test]
    fn test_equal_locations_need_no_moves() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let p = f.param(1, DataType::Bool);
            f.block(1, &[2, 3], |b| {
                b.if_imm(p);
            });
            f.block(2, &[3], |_| ());
            let phi = f.block(3, &[EXIT], |b| {
                let phi = b.phi(DataType::Int64, &[(1, x), (2, x)]);
                b.ret(phi);
                phi
            });
            (x, phi)
        })?;
        let (x, phi) = built.values;
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;
        assign(&mut liveness, x, Location::Register(4));
        assign(&mut liveness, phi, Location::Register(4));
        let blocks = graph.block_count();

        let stats = SplitResolver::new(graph, &mut liveness).run()?;
        assert_eq!(stats, ResolveStats::default());
        assert_eq!(graph.block_count(), blocks);
        Ok(())
    }

    #[test]
    fn test_stale_liveness_is_rejected() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            f.block(1, &[EXIT], |b| b.ret_void());
        })?;
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::LinearOrder)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;
        graph.notify(GraphChange::Instructions);

        let result = SplitResolver::new(graph, &mut liveness).run();
        assert!(matches!(
            result,
            Err(Error::StaleAnalysis(AnalysisKind::Liveness))
        ));
        Ok(())
    }
}
