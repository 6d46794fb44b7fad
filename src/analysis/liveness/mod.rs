//! Liveness analysis: life numbers and life intervals for register allocation.
//!
//! The analyzer walks the blocks of the linear order once to number instructions, then
//! once backwards to build one [`LifeInterval`] per value-producing instruction.
//!
//! # Life numbers
//!
//! Phis share the number of their block's entry. Every other instruction gets the
//! previous number plus [`LIFE_NUMBER_GAP`], so instruction numbers are even and the odd
//! number in front of each instruction is free for moves inserted by the resolver. A
//! block covers `[entry, last + LIFE_NUMBER_GAP)` and the next block starts where it ends.
//!
//! # Intervals
//!
//! Walking backwards, every value live at the end of a block is given the whole block,
//! a definition cuts its interval, and an input is extended from the block entry to its
//! user. Deoptimization state is kept alive up to every instruction that may need it,
//! catch-phi inputs up to their throwing instruction, and values live into a loop header
//! across the whole loop. Calls block every caller-saved register of the target for one
//! life number.
//!
//! The result is a standalone [`Liveness`] value stamped with the graph epoch it was
//! computed at; any later graph change makes it stale.

mod interval;

use rustc_hash::FxHashMap;

use crate::{
    analysis::AnalysisKind,
    config::TargetInfo,
    ir::{BlockId, DataType, Graph, InstFlags, InstId, Opcode},
    regalloc::Location,
    utils::BitSet,
    Error, Result,
};

pub use interval::{IntervalId, IntervalOwner, LifeInterval, LifeNumber, LiveRange};

/// Distance between the life numbers of two consecutive instructions.
pub const LIFE_NUMBER_GAP: LifeNumber = 2;

/// Life numbers and intervals of one graph, valid for a single graph epoch.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    epoch: u64,
    linear_order: Vec<BlockId>,
    block_ranges: FxHashMap<BlockId, LiveRange>,
    life_numbers: FxHashMap<InstId, LifeNumber>,
    insts_by_number: FxHashMap<LifeNumber, InstId>,
    intervals: Vec<LifeInterval>,
    inst_intervals: FxHashMap<InstId, IntervalId>,
    physical: Vec<IntervalId>,
    live_ins: FxHashMap<BlockId, Vec<InstId>>,
}

impl Liveness {
    /// Returns the graph epoch the result was computed for.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `true` if the graph has not changed since the result was computed.
    #[must_use]
    pub fn is_current(&self, graph: &Graph) -> bool {
        graph.epoch() == self.epoch && graph.is_valid(AnalysisKind::Liveness)
    }

    /// Returns the block order the life numbers follow.
    #[must_use]
    pub fn linear_order(&self) -> &[BlockId] {
        &self.linear_order
    }

    /// Returns the life number range of a block.
    #[must_use]
    pub fn block_range(&self, block: BlockId) -> Option<LiveRange> {
        self.block_ranges.get(&block).copied()
    }

    /// Returns the life number of an instruction.
    #[must_use]
    pub fn life_number(&self, inst: InstId) -> Option<LifeNumber> {
        self.life_numbers.get(&inst).copied()
    }

    /// Returns the non-phi instruction numbered `ln`.
    #[must_use]
    pub fn inst_at(&self, ln: LifeNumber) -> Option<InstId> {
        self.insts_by_number.get(&ln).copied()
    }

    /// Returns the interval behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this result.
    #[must_use]
    pub fn interval(&self, id: IntervalId) -> &LifeInterval {
        &self.intervals[id.index()]
    }

    /// Mutable access to an interval, for location assignment.
    pub fn interval_mut(&mut self, id: IntervalId) -> &mut LifeInterval {
        &mut self.intervals[id.index()]
    }

    /// Returns the interval of the value produced by `inst`.
    #[must_use]
    pub fn interval_of(&self, inst: InstId) -> Option<IntervalId> {
        self.inst_intervals.get(&inst).copied()
    }

    /// Iterates every interval, split siblings and physical intervals included.
    pub fn intervals(&self) -> impl Iterator<Item = &LifeInterval> + '_ {
        self.intervals.iter()
    }

    /// Returns the blocking intervals of caller-saved registers.
    #[must_use]
    pub fn physical_intervals(&self) -> &[IntervalId] {
        &self.physical
    }

    /// Returns the values live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> &[InstId] {
        self.live_ins.get(&block).map_or(&[], Vec::as_slice)
    }

    /// Splits an interval at `ln` and returns the new sibling.
    ///
    /// Ranges and use positions from `ln` on move to the sibling, which is linked right
    /// after `id` in the sibling chain and starts without a location.
    ///
    /// # Panics
    ///
    /// Panics unless `begin < ln < end` holds for the interval.
    pub fn split_at(&mut self, id: IntervalId, ln: LifeNumber) -> IntervalId {
        let new_id = IntervalId::from_index(self.intervals.len());
        let iv = &mut self.intervals[id.index()];
        assert!(
            iv.begin() < ln && ln < iv.end(),
            "cannot split {id} at {ln}: outside ({}, {})",
            iv.begin(),
            iv.end()
        );

        let index = iv.ranges.partition_point(|r| r.end <= ln);
        let mut tail = iv.ranges.split_off(index);
        if let Some(first) = tail.first_mut() {
            if first.begin < ln {
                iv.ranges.push(LiveRange::new(first.begin, ln));
                first.begin = ln;
            }
        }
        let use_index = iv.uses.partition_point(|&u| u < ln);
        let uses = iv.uses.split_off(use_index);

        let mut sibling = LifeInterval::new(new_id, iv.owner, iv.ty);
        sibling.location = Location::Invalid;
        sibling.ranges = tail;
        sibling.uses = uses;
        sibling.sibling = iv.sibling;
        sibling.split_parent = Some(iv.split_parent.unwrap_or(id));
        sibling.finalized = true;
        iv.sibling = Some(new_id);

        self.intervals.push(sibling);
        new_id
    }

    /// Folds the next sibling of `id` back into it.
    ///
    /// The folded sibling is left detached with no ranges.
    ///
    /// # Panics
    ///
    /// Panics if `id` has no sibling.
    pub fn merge_sibling(&mut self, id: IntervalId) {
        let Some(next) = self.intervals[id.index()].sibling else {
            panic!("{id} has no sibling to merge");
        };
        let (ranges, uses, after) = {
            let n = &mut self.intervals[next.index()];
            n.split_parent = None;
            (
                std::mem::take(&mut n.ranges),
                std::mem::take(&mut n.uses),
                n.sibling.take(),
            )
        };
        let iv = &mut self.intervals[id.index()];
        for range in ranges {
            match iv.ranges.last_mut() {
                Some(last) if last.end == range.begin => last.end = range.end,
                _ => iv.ranges.push(range),
            }
        }
        iv.uses.extend(uses);
        iv.sibling = after;
    }

    /// Iterates `id` and the siblings split off after it.
    pub fn siblings(&self, id: IntervalId) -> impl Iterator<Item = IntervalId> + '_ {
        std::iter::successors(Some(id), |&current| self.intervals[current.index()].sibling)
    }

    /// Returns the sibling of `id`'s chain whose span contains `ln`.
    #[must_use]
    pub fn sibling_at(&self, id: IntervalId, ln: LifeNumber) -> Option<IntervalId> {
        let head = self.intervals[id.index()].split_parent.unwrap_or(id);
        self.siblings(head)
            .find(|&sibling| self.intervals[sibling.index()].spans(ln))
    }

    /// Returns the location holding `inst`'s value at `ln`.
    #[must_use]
    pub fn location_at(&self, inst: InstId, ln: LifeNumber) -> Option<Location> {
        let id = self.interval_of(inst)?;
        let sibling = self.sibling_at(id, ln)?;
        Some(self.intervals[sibling.index()].location)
    }

    pub(crate) fn record_inst(&mut self, inst: InstId, ln: LifeNumber) {
        self.life_numbers.insert(inst, ln);
    }

    /// Places `block` right after `after` in the order, covering `range`.
    pub(crate) fn record_block(&mut self, block: BlockId, after: BlockId, range: LiveRange) {
        let position = self
            .linear_order
            .iter()
            .position(|&b| b == after)
            .map_or(self.linear_order.len(), |p| p + 1);
        self.linear_order.insert(position, block);
        self.block_ranges.insert(block, range);
    }

    pub(crate) fn restamp(&mut self, graph: &Graph) {
        self.epoch = graph.epoch();
    }
}

/// Builds a [`Liveness`] result from a graph with a valid linear order.
pub struct LivenessAnalyzer<'a> {
    graph: &'a Graph,
    target: &'a TargetInfo,
    result: Liveness,
    live_sets: FxHashMap<BlockId, BitSet>,
    catch_inputs: FxHashMap<InstId, Vec<InstId>>,
    physical_by_location: FxHashMap<Location, IntervalId>,
}

impl<'a> LivenessAnalyzer<'a> {
    /// Computes liveness and marks [`AnalysisKind::Liveness`] valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleAnalysis`] if the linear order or loop analysis is stale,
    /// or [`Error::UnresolvedCatchPhi`] if catch-phi inputs name a throwing instruction
    /// outside the linear order.
    pub fn run(graph: &mut Graph, target: &TargetInfo) -> Result<Liveness> {
        graph.require(AnalysisKind::LinearOrder)?;
        graph.require(AnalysisKind::Loops)?;
        let liveness = LivenessAnalyzer::new(graph, target).analyze()?;
        graph.mark_valid(AnalysisKind::Liveness);
        log::debug!(
            "liveness: {} intervals over {} blocks",
            liveness.intervals.len(),
            liveness.linear_order.len()
        );
        Ok(liveness)
    }

    fn new(graph: &'a Graph, target: &'a TargetInfo) -> Self {
        Self {
            graph,
            target,
            result: Liveness {
                epoch: graph.epoch(),
                linear_order: graph.linear_order.clone(),
                ..Liveness::default()
            },
            live_sets: FxHashMap::default(),
            catch_inputs: FxHashMap::default(),
            physical_by_location: FxHashMap::default(),
        }
    }

    fn analyze(mut self) -> Result<Liveness> {
        self.number_insts();
        self.collect_catch_inputs();

        let order = self.result.linear_order.clone();
        for &block in order.iter().rev() {
            self.process_block(block);
        }

        let unresolved: usize = self.catch_inputs.values().map(Vec::len).sum();
        if unresolved > 0 {
            return Err(Error::UnresolvedCatchPhi(unresolved));
        }

        for interval in &mut self.result.intervals {
            interval.finalize();
        }
        for (block, set) in self.live_sets {
            let values = set
                .iter()
                .filter_map(|index| self.graph.inst_at(index))
                .collect();
            self.result.live_ins.insert(block, values);
        }
        Ok(self.result)
    }

    fn number_insts(&mut self) {
        let graph = self.graph;
        let mut ln: LifeNumber = 0;
        for &block in &self.result.linear_order.clone() {
            let begin = ln;
            for phi in graph.phis(block) {
                self.result.life_numbers.insert(phi, begin);
                self.create_interval(phi);
            }
            for inst in graph.insts(block) {
                ln += LIFE_NUMBER_GAP;
                self.result.life_numbers.insert(inst, ln);
                self.result.insts_by_number.insert(ln, inst);
                self.create_interval(inst);
            }
            ln += LIFE_NUMBER_GAP;
            self.result
                .block_ranges
                .insert(block, LiveRange::new(begin, ln));
        }
    }

    fn create_interval(&mut self, inst: InstId) {
        let data = self.graph.inst(inst);
        if !data.has_dst() {
            return;
        }
        let id = IntervalId::from_index(self.result.intervals.len());
        self.result
            .intervals
            .push(LifeInterval::new(id, IntervalOwner::Inst(inst), data.ty()));
        self.result.inst_intervals.insert(inst, id);
    }

    fn collect_catch_inputs(&mut self) {
        let graph = self.graph;
        for &block in &self.result.linear_order {
            for phi in graph.phis(block) {
                let phi = graph.inst(phi);
                if !phi.is_catch_phi() {
                    continue;
                }
                for (&input, &thrower) in phi.inputs().iter().zip(phi.throwers()) {
                    self.catch_inputs.entry(thrower).or_default().push(input);
                }
            }
        }
    }

    fn process_block(&mut self, block: BlockId) {
        let graph = self.graph;
        let Some(range) = self.result.block_range(block) else {
            return;
        };
        let mut live = BitSet::new(graph.inst_capacity());

        for &succ in graph.block(block).succs() {
            if let Some(set) = self.live_sets.get(&succ) {
                live.union_with(set);
            }
            let Some(pred_index) = graph.block(succ).pred_index(block) else {
                continue;
            };
            for phi in graph.phis(succ) {
                let phi = graph.inst(phi);
                if phi.is_catch_phi() {
                    continue;
                }
                if let Some(&input) = phi.inputs().get(pred_index) {
                    if self.result.inst_intervals.contains_key(&input) {
                        live.insert(input.index());
                    }
                }
            }
        }
        if let Some(try_id) = graph.block(block).try_id() {
            let throws = graph.insts(block).any(|inst| graph.inst(inst).can_throw());
            if throws {
                if let Some(region) = graph.try_region(try_id) {
                    for handler in &region.handlers {
                        if let Some(set) = self.live_sets.get(handler) {
                            live.union_with(set);
                        }
                    }
                }
            }
        }

        for index in live.iter() {
            if let Some(inst) = graph.inst_at(index) {
                self.extend(inst, range.begin, range.end);
            }
        }

        for inst in graph.insts_rev(block) {
            let ln = self.number(inst);
            if let Some(id) = self.result.interval_of(inst) {
                self.result.intervals[id.index()].start_from(ln);
                live.remove(inst.index());
            }
            let data = graph.inst(inst);
            if data.opcode() != Opcode::SaveState {
                for &input in data.inputs() {
                    if graph.inst(input).opcode() == Opcode::SaveState {
                        continue;
                    }
                    if self.use_at(input, range.begin, ln, &mut live) {
                        self.add_use(input, ln);
                    }
                }
            }
            if let Some(state) = graph.save_state_of(inst) {
                let end = if data.flags().contains(InstFlags::IMPLICIT_NULL_CHECK) {
                    self.nearest_user_after(inst, ln)
                } else {
                    ln
                };
                self.extend_save_state(state, range.begin, end, &mut live);
            }
            if let Some(values) = self.catch_inputs.remove(&inst) {
                for value in values {
                    self.use_at(value, range.begin, ln, &mut live);
                }
            }
            if data.is_call() {
                self.block_caller_saved(ln);
            }
        }

        for phi in graph.phis(block) {
            if let Some(id) = self.result.interval_of(phi) {
                self.result.intervals[id.index()].start_from(range.begin);
                live.remove(phi.index());
            }
        }

        if let Some(lp) = graph.block(block).loop_id() {
            let lp_data = graph.get_loop(lp);
            if lp_data.header() == Some(block) && !lp_data.is_root() {
                let members = graph.loop_members(lp);
                let loop_end = members
                    .iter()
                    .filter_map(|&m| self.result.block_range(m))
                    .map(|r| r.end)
                    .max()
                    .unwrap_or(range.end);
                for index in live.iter() {
                    if let Some(inst) = graph.inst_at(index) {
                        self.extend(inst, range.begin, loop_end);
                    }
                }
                for member in members {
                    if member != block {
                        if let Some(set) = self.live_sets.get_mut(&member) {
                            set.union_with(&live);
                        }
                    }
                }
            }
        }

        log::trace!("{block}: live-in {live:?}");
        self.live_sets.insert(block, live);
    }

    fn number(&self, inst: InstId) -> LifeNumber {
        self.result.life_number(inst).unwrap_or_default()
    }

    fn extend(&mut self, inst: InstId, begin: LifeNumber, end: LifeNumber) {
        if begin >= end {
            return;
        }
        if let Some(id) = self.result.interval_of(inst) {
            self.result.intervals[id.index()].add_range(begin, end);
        }
    }

    /// Keeps `value` alive from `begin` up to `ln`. Returns `false` for values without
    /// an interval.
    fn use_at(&mut self, value: InstId, begin: LifeNumber, ln: LifeNumber, live: &mut BitSet) -> bool {
        if self.result.interval_of(value).is_none() {
            return false;
        }
        self.extend(value, begin, ln);
        live.insert(value.index());
        true
    }

    fn add_use(&mut self, value: InstId, ln: LifeNumber) {
        if let Some(id) = self.result.interval_of(value) {
            self.result.intervals[id.index()].add_use(ln);
        }
    }

    fn extend_save_state(
        &mut self,
        state: InstId,
        begin: LifeNumber,
        end: LifeNumber,
        live: &mut BitSet,
    ) {
        let graph = self.graph;
        let mut visited = BitSet::new(graph.inst_capacity());
        let mut worklist = vec![state];
        while let Some(state) = worklist.pop() {
            if !visited.insert(state.index()) {
                continue;
            }
            for &input in graph.inst(state).inputs() {
                if graph.inst(input).opcode() == Opcode::SaveState {
                    worklist.push(input);
                } else {
                    self.use_at(input, begin, end, live);
                }
            }
        }
    }

    fn nearest_user_after(&self, inst: InstId, ln: LifeNumber) -> LifeNumber {
        self.graph
            .inst(inst)
            .users()
            .iter()
            .filter_map(|user| self.result.life_number(user.inst))
            .filter(|&user_ln| user_ln > ln)
            .min()
            .unwrap_or(ln)
    }

    fn block_caller_saved(&mut self, ln: LifeNumber) {
        let registers: Vec<Location> = self
            .target
            .caller_saved_gp
            .iter()
            .map(|&r| Location::Register(r))
            .chain(
                self.target
                    .caller_saved_fp
                    .iter()
                    .map(|&r| Location::FpRegister(r)),
            )
            .collect();
        for location in registers {
            let id = match self.physical_by_location.get(&location) {
                Some(&id) => id,
                None => {
                    let id = IntervalId::from_index(self.result.intervals.len());
                    let ty = match location {
                        Location::FpRegister(_) => DataType::Float64,
                        _ => DataType::Any,
                    };
                    self.result.intervals.push(LifeInterval::new(
                        id,
                        IntervalOwner::Physical(location),
                        ty,
                    ));
                    self.result.physical.push(id);
                    self.physical_by_location.insert(location, id);
                    id
                }
            };
            self.result.intervals[id.index()].add_range(ln, ln + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::{GraphBuilder, EXIT},
        DataType,
    };

    fn prepare(graph: &mut Graph) -> Result<()> {
        graph.ensure(AnalysisKind::LinearOrder)
    }

    #[test]
    fn test_life_numbers_leave_odd_gaps() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            let sum = f.block(1, &[EXIT], |b| {
                let sum = b.add(x, one);
                b.ret(sum);
                sum
            });
            (x, one, sum)
        })?;
        let (x, one, sum) = built.values;
        let bb1 = built.block(1);
        let graph = &mut built.graph;
        prepare(graph)?;
        let liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

        assert_eq!(liveness.life_number(x), Some(2));
        assert_eq!(liveness.life_number(one), Some(4));
        assert_eq!(liveness.life_number(sum), Some(8));
        assert_eq!(liveness.block_range(bb1), Some(LiveRange::new(6, 12)));
        assert_eq!(liveness.inst_at(8), Some(sum));
        assert_eq!(liveness.inst_at(7), None);

        let x_iv = liveness.interval(liveness.interval_of(x).unwrap());
        assert_eq!(x_iv.ranges(), &[LiveRange::new(2, 8)]);
        assert_eq!(x_iv.use_positions(), &[8]);
        let sum_iv = liveness.interval(liveness.interval_of(sum).unwrap());
        assert_eq!(sum_iv.ranges(), &[LiveRange::new(8, 10)]);
        assert_eq!(sum_iv.use_positions(), &[10]);

        let mut live_in = liveness.live_in(bb1).to_vec();
        live_in.sort();
        let mut expected = vec![x, one];
        expected.sort();
        assert_eq!(live_in, expected);
        assert!(liveness.is_current(graph));
        Ok(())
    }

    #[test]
    fn test_instruction_edits_make_result_stale() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let one = f.int(1);
            f.block(1, &[EXIT], |b| {
                let dead = b.add(x, one);
                let sum = b.add(x, x);
                b.ret(sum);
                (dead, sum)
            })
        })?;
        let (dead, sum) = built.values;
        let graph = &mut built.graph;
        prepare(graph)?;

        let liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;
        graph.erase_inst(dead);
        assert!(!liveness.is_current(graph));
        assert!(!graph.is_valid(AnalysisKind::Liveness));
        assert!(graph.is_valid(AnalysisKind::LinearOrder));

        let liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;
        assert!(liveness.is_current(graph));
        let x = graph.inst(sum).input(0);
        graph.set_input(sum, 1, x);
        assert!(liveness.is_current(graph));
        let one = graph.find_or_create_const(crate::ir::ConstValue::Int(1), DataType::Int64);
        graph.set_input(sum, 1, one);
        assert!(!liveness.is_current(graph));
        Ok(())
    }

    #[test]
    fn test_calls_block_caller_saved_registers() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            f.block(1, &[EXIT], |b| {
                let state = b.save_state(&[x]);
                let call = b.call(7, DataType::Int64, &[x], state);
                b.ret(call);
                (x, call)
            })
        })?;
        let (x, call) = built.values;
        let graph = &mut built.graph;
        prepare(graph)?;
        let target = TargetInfo::default().with_caller_saved(&[0, 1], &[0]);
        let liveness = LivenessAnalyzer::run(graph, &target)?;

        let call_ln = liveness.life_number(call).unwrap();
        assert_eq!(liveness.physical_intervals().len(), 3);
        for &id in liveness.physical_intervals() {
            let iv = liveness.interval(id);
            assert!(iv.is_physical());
            assert_eq!(iv.ranges(), &[LiveRange::new(call_ln, call_ln + 1)]);
            assert!(iv.location().is_register());
        }
        let x_iv = liveness.interval(liveness.interval_of(x).unwrap());
        assert_eq!(x_iv.end(), call_ln);
        assert_eq!(x_iv.use_positions(), &[call_ln]);
        Ok(())
    }

    #[test]
    fn test_save_state_keeps_values_alive() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Reference);
            let y = f.param(1, DataType::Int64);
            f.block(1, &[EXIT], |b| {
                let state = b.save_state(&[y]);
                let outer = b.save_state(&[state]);
                let check = b.null_check(x, outer);
                b.ret_void();
                check
            });
            y
        })?;
        let y = built.values;
        let graph = &mut built.graph;
        prepare(graph)?;
        let liveness = LivenessAnalyzer::run(graph, &TargetInfo::callee_saved_only())?;

        let check = liveness.inst_at(liveness.life_number(y).unwrap() + 8);
        let check_ln = liveness.life_number(check.unwrap()).unwrap();
        let y_iv = liveness.interval(liveness.interval_of(y).unwrap());
        assert_eq!(y_iv.end(), check_ln);
        assert!(y_iv.use_positions().is_empty());
        Ok(())
    }

    #[test]
    fn test_unresolved_catch_phi_input() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let ghost = f.graph().create_inst(Opcode::Throw, DataType::Void, 0);
            f.block(1, &[EXIT], |b| {
                let phi = b.catch_phi(DataType::Int64, &[(x, ghost)]);
                b.ret(phi);
            });
        })?;
        let graph = &mut built.graph;
        prepare(graph)?;
        let result = LivenessAnalyzer::run(graph, &TargetInfo::default());
        assert!(matches!(result, Err(Error::UnresolvedCatchPhi(1))));
        Ok(())
    }

    #[test]
    fn test_stale_linear_order_is_rejected() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            f.block(1, &[EXIT], |b| b.ret_void());
        })?;
        let result = LivenessAnalyzer::run(&mut built.graph, &TargetInfo::default());
        assert!(matches!(result, Err(Error::StaleAnalysis(_))));
        Ok(())
    }

    #[test]
    fn test_split_and_merge_round_trip() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            f.block(1, &[EXIT], |b| {
                let a = b.add(x, x);
                let c = b.add(a, x);
                b.ret(c);
            });
            x
        })?;
        let x = built.values;
        let graph = &mut built.graph;
        prepare(graph)?;
        let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

        let id = liveness.interval_of(x).unwrap();
        let original = liveness.interval(id).clone();
        let mid = original.begin() + 3;
        let sibling = liveness.split_at(id, mid);

        assert_eq!(liveness.interval(id).end(), mid);
        assert_eq!(liveness.interval(sibling).begin(), mid);
        assert_eq!(liveness.siblings(id).collect::<Vec<_>>(), vec![id, sibling]);
        assert_eq!(liveness.sibling_at(sibling, original.begin()), Some(id));
        assert_eq!(liveness.sibling_at(id, mid), Some(sibling));
        assert_eq!(liveness.interval(sibling).location(), Location::Invalid);

        liveness.merge_sibling(id);
        assert_eq!(liveness.interval(id).ranges(), original.ranges());
        assert_eq!(
            liveness.interval(id).use_positions(),
            original.use_positions()
        );
        assert_eq!(liveness.interval(id).sibling(), None);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "cannot split")]
    fn test_split_outside_interval_panics() {
        let mut liveness = Liveness::default();
        let id = IntervalId::from_index(0);
        let owner = IntervalOwner::Physical(Location::Register(0));
        let mut iv = LifeInterval::new(id, owner, DataType::Any);
        iv.add_range(4, 5);
        liveness.intervals.push(iv);
        liveness.split_at(id, 4);
    }
}
