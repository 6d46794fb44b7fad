//! The control-flow graph: block and instruction arenas plus graph-wide state.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::{
    analysis::{AnalysisKind, AnalysisSet, Loop, LoopId},
    ir::{
        arena::Arena,
        block::{BasicBlock, BlockFlags, BlockId},
        instruction::{ConstValue, InstData, InstId, Instruction, User},
        marker::MarkerPool,
        opcode::{DataType, InstFlags, Opcode},
    },
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
};

bitflags! {
    /// Graph-wide facts recorded by the analyses and consulted by later passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GraphFlags: u8 {
        /// Loop analysis found at least one irreducible loop.
        const HAS_IRREDUCIBLE_LOOP = 1 << 0;
        /// Loop analysis found at least one loop without exits.
        const HAS_INFINITE_LOOP = 1 << 1;
        /// The method has try regions.
        const HAS_TRY_CATCH = 1 << 2;
        /// Compiling for the bytecode optimizer: linearize in guest pc order.
        const BYTECODE_OPTIMIZER = 1 << 3;
        /// Order branch successors by profile weight when linearizing.
        const FREQ_BRANCH_REORDER = 1 << 4;
    }
}

/// A try region: the block holding its `Try` instruction, the closing block and handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryRegion {
    /// Region identifier, shared by every block of the region.
    pub id: u32,
    /// Block holding the `Try` instruction.
    pub begin: BlockId,
    /// Block closing the region, if the front end recorded one.
    pub end: Option<BlockId>,
    /// Catch-begin blocks in handler order.
    pub handlers: Vec<BlockId>,
}

/// The mutable IR of one compilation unit.
///
/// A graph always has a start block, created by [`Graph::new`], that holds constants and
/// parameters and has no predecessors. The end block is optional: a method that never
/// returns normally (an outer infinite loop) has none.
///
/// Structural primitives keep edge lists, phi inputs and def-use links consistent and
/// report what they changed to the analysis table (see [`crate::analysis`]), which patches
/// the analyses that support an incremental update and invalidates the others. Edits of
/// instruction lists and def-use links bump the epoch and invalidate liveness. Nothing is
/// ever recomputed implicitly.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) blocks: Arena<BasicBlock, BlockId>,
    pub(crate) insts: Arena<Instruction, InstId>,
    pub(crate) start: BlockId,
    pub(crate) end: Option<BlockId>,
    pub(crate) loops: Vec<Loop>,
    pub(crate) root_loop: Option<LoopId>,
    pub(crate) try_regions: Vec<TryRegion>,
    pub(crate) flags: GraphFlags,
    pub(crate) rpo: Vec<BlockId>,
    pub(crate) linear_order: Vec<BlockId>,
    pub(crate) valid: AnalysisSet,
    pub(crate) epoch: u64,
    pub(crate) markers: MarkerPool,
    pub(crate) constants: FxHashMap<(DataType, ConstValue), InstId>,
    pub(crate) bytecode_size: usize,
    pub(crate) vreg_count: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates a graph holding only its start block.
    #[must_use]
    pub fn new() -> Self {
        let mut blocks = Arena::new();
        let start = blocks.alloc_with(|id| {
            let mut block = BasicBlock::new(id, 0);
            block.flags |= BlockFlags::START;
            block
        });
        Self {
            blocks,
            insts: Arena::new(),
            start,
            end: None,
            loops: Vec::new(),
            root_loop: None,
            try_regions: Vec::new(),
            flags: GraphFlags::empty(),
            rpo: Vec::new(),
            linear_order: Vec::new(),
            valid: AnalysisSet::empty(),
            epoch: 0,
            markers: MarkerPool::default(),
            constants: FxHashMap::default(),
            bytecode_size: 0,
            vreg_count: 0,
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Creates an unconnected block.
    pub fn create_block(&mut self, pc: u32) -> BlockId {
        self.blocks.alloc_with(|id| BasicBlock::new(id, pc))
    }

    /// Creates the end block.
    ///
    /// # Panics
    ///
    /// Panics if the graph already has an end block.
    pub fn create_end_block(&mut self, pc: u32) -> BlockId {
        assert!(self.end.is_none(), "graph already has an end block");
        let end = self.create_block(pc);
        self.blocks[end].flags |= BlockFlags::END;
        self.end = Some(end);
        end
    }

    /// Returns the start block.
    #[must_use]
    pub fn start_block(&self) -> BlockId {
        self.start
    }

    /// Returns the end block, if any.
    #[must_use]
    pub fn end_block(&self) -> Option<BlockId> {
        self.end
    }

    /// Returns the block behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Returns the block behind `id`, or [`crate::Error::StaleHandle`].
    ///
    /// # Errors
    ///
    /// Returns an error if the block was removed.
    pub fn try_block(&self, id: BlockId) -> crate::Result<&BasicBlock> {
        self.blocks
            .get(id)
            .ok_or_else(|| crate::Error::StaleHandle(id.to_string()))
    }

    /// Returns `true` if `id` refers to a live block.
    #[must_use]
    pub fn contains_block(&self, id: BlockId) -> bool {
        self.blocks.contains(id)
    }

    /// Iterates live blocks in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.handles()
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the size of the block index space, tombstones included.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.capacity()
    }

    /// Returns the live block stored at a slot index.
    #[must_use]
    pub fn block_at(&self, index: usize) -> Option<BlockId> {
        self.blocks.handle_at(index)
    }

    /// Sets additional classification flags on a block.
    pub fn add_block_flags(&mut self, block: BlockId, flags: BlockFlags) {
        self.blocks[block].flags |= flags;
    }

    /// Clears classification flags of a block.
    pub fn clear_block_flags(&mut self, block: BlockId, flags: BlockFlags) {
        self.blocks[block].flags.remove(flags);
    }

    /// Assigns a block to a try region.
    pub fn set_try_id(&mut self, block: BlockId, try_id: Option<u32>) {
        self.blocks[block].try_id = try_id;
    }

    /// Sets the profile weight of a block.
    pub fn set_frequency(&mut self, block: BlockId, frequency: u32) {
        self.blocks[block].frequency = frequency;
    }

    // ── Instructions ────────────────────────────────────────────────────

    /// Creates an unlinked instruction.
    pub fn create_inst(&mut self, opcode: Opcode, ty: DataType, pc: u32) -> InstId {
        self.insts
            .alloc_with(|id| Instruction::new(id, opcode, ty, pc))
    }

    /// Creates an unlinked instruction with a payload and inputs.
    pub fn create_inst_with(
        &mut self,
        opcode: Opcode,
        ty: DataType,
        data: InstData,
        inputs: &[InstId],
    ) -> InstId {
        let inst = self.create_inst(opcode, ty, 0);
        self.insts[inst].data = data;
        for &input in inputs {
            self.append_input(inst, input);
        }
        inst
    }

    /// Returns the constant `value` of type `ty`, creating it in the start block if the
    /// graph has none.
    ///
    /// Constants are shared through a per-graph table, so a constant that was moved out
    /// of the start block is still found. Entries whose instruction was deleted or
    /// unlinked are replaced.
    pub fn find_or_create_const(&mut self, value: ConstValue, ty: DataType) -> InstId {
        let key = (ty, value);
        if let Some(&existing) = self.constants.get(&key) {
            let usable = self.insts.get(existing).is_some_and(|inst| {
                inst.block.is_some() && inst.const_value() == Some(value) && inst.ty == ty
            });
            if usable {
                return existing;
            }
        }
        let inst = self.create_inst_with(Opcode::Constant, ty, InstData::Constant(value), &[]);
        self.append_inst(self.start, inst);
        self.constants.insert(key, inst);
        inst
    }

    /// Creates a parameter in the start block.
    pub fn create_param(&mut self, index: u16, ty: DataType) -> InstId {
        let inst = self.create_inst_with(Opcode::Parameter, ty, InstData::Parameter(index), &[]);
        self.append_inst(self.start, inst);
        inst
    }

    /// Returns the instruction behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale.
    #[must_use]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id]
    }

    pub(crate) fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id]
    }

    /// Returns `true` if `id` refers to a live instruction.
    #[must_use]
    pub fn contains_inst(&self, id: InstId) -> bool {
        self.insts.contains(id)
    }

    /// Returns the live instruction stored at a slot index.
    #[must_use]
    pub(crate) fn inst_at(&self, index: usize) -> Option<InstId> {
        self.insts.handle_at(index)
    }

    /// Returns the size of the instruction index space, tombstones included.
    #[must_use]
    pub fn inst_capacity(&self) -> usize {
        self.insts.capacity()
    }

    /// Returns the number of live instructions, linked or not.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Replaces the payload of an instruction.
    pub fn set_data(&mut self, inst: InstId, data: InstData) {
        self.insts[inst].data = data;
    }

    /// Adds per-instruction flags.
    pub fn add_inst_flags(&mut self, inst: InstId, flags: InstFlags) {
        self.insts[inst].extra_flags |= flags;
    }

    /// Iterates the phis of a block in order.
    pub fn phis(&self, block: BlockId) -> InstIter<'_> {
        InstIter {
            graph: self,
            next: self.blocks[block].first_phi,
            forward: true,
        }
    }

    /// Iterates the non-phi instructions of a block in order.
    pub fn insts(&self, block: BlockId) -> InstIter<'_> {
        InstIter {
            graph: self,
            next: self.blocks[block].first_inst,
            forward: true,
        }
    }

    /// Iterates the non-phi instructions of a block from last to first.
    pub fn insts_rev(&self, block: BlockId) -> InstIter<'_> {
        InstIter {
            graph: self,
            next: self.blocks[block].last_inst,
            forward: false,
        }
    }

    /// Iterates phis, then non-phi instructions of a block.
    pub fn all_insts(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        self.phis(block).chain(self.insts(block))
    }

    /// Returns the save-state attached to an instruction that requires one.
    ///
    /// The save-state is the last input by convention.
    #[must_use]
    pub fn save_state_of(&self, inst: InstId) -> Option<InstId> {
        let inst = &self.insts[inst];
        if !inst.requires_state() {
            return None;
        }
        let last = *inst.inputs.last()?;
        (self.insts[last].opcode == Opcode::SaveState).then_some(last)
    }

    // ── Def-use links ───────────────────────────────────────────────────

    /// Appends an input to `inst`.
    pub fn append_input(&mut self, inst: InstId, input: InstId) {
        self.touch_insts();
        let index = self.insts[inst].inputs.len();
        self.insts[inst].inputs.push(input);
        self.insts[input].users.push(User { inst, index });
    }

    /// Appends an input to a catch-phi together with the instruction that throws it.
    pub fn append_catch_phi_input(&mut self, phi: InstId, input: InstId, thrower: InstId) {
        assert!(self.insts[phi].is_catch_phi(), "{phi} is not a catch-phi");
        self.append_input(phi, input);
        self.insts[phi].throwers.push(thrower);
    }

    /// Replaces the input at `index` of `inst`.
    pub fn set_input(&mut self, inst: InstId, index: usize, input: InstId) {
        let old = self.insts[inst].inputs[index];
        if old == input {
            return;
        }
        self.touch_insts();
        self.drop_user(old, User { inst, index });
        self.insts[inst].inputs[index] = input;
        self.insts[input].users.push(User { inst, index });
    }

    /// Removes the input at `index` of `inst`, shifting later inputs down.
    pub fn remove_input(&mut self, inst: InstId, index: usize) {
        self.touch_insts();
        let old = self.insts[inst].inputs.remove(index);
        self.drop_user(old, User { inst, index });
        if self.insts[inst].is_catch_phi() {
            self.insts[inst].throwers.remove(index);
        }
        let shifted: Vec<(usize, InstId)> = self.insts[inst].inputs[index..]
            .iter()
            .copied()
            .enumerate()
            .map(|(offset, input)| (index + offset, input))
            .collect();
        for (new_index, input) in shifted {
            let users = &mut self.insts[input].users;
            if let Some(user) = users
                .iter_mut()
                .find(|u| u.inst == inst && u.index == new_index + 1)
            {
                user.index = new_index;
            }
        }
    }

    /// Removes every input of `inst`.
    pub fn remove_all_inputs(&mut self, inst: InstId) {
        self.touch_insts();
        let inputs = std::mem::take(&mut self.insts[inst].inputs);
        for (index, input) in inputs.into_iter().enumerate() {
            self.drop_user(input, User { inst, index });
        }
        self.insts[inst].throwers.clear();
    }

    /// Redirects every use of `old` to `new`.
    pub fn replace_users(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        self.touch_insts();
        let users = std::mem::take(&mut self.insts[old].users);
        for user in users {
            self.insts[user.inst].inputs[user.index] = new;
            self.insts[new].users.push(user);
        }
    }

    /// Records an instruction-level change: life numbers and intervals no longer match.
    fn touch_insts(&mut self) {
        self.epoch += 1;
        self.invalidate(AnalysisKind::Liveness);
    }

    fn drop_user(&mut self, input: InstId, user: User) {
        let users = &mut self.insts[input].users;
        if let Some(pos) = users.iter().position(|&u| u == user) {
            users.swap_remove(pos);
        }
    }

    // ── Instruction lists ───────────────────────────────────────────────

    /// Appends an unlinked instruction at the end of its sub-list in `block`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction is already linked into a block.
    pub fn append_inst(&mut self, block: BlockId, inst: InstId) {
        let tail = if self.insts[inst].is_phi() {
            self.blocks[block].last_phi
        } else {
            self.blocks[block].last_inst
        };
        self.link(block, inst, tail);
    }

    /// Inserts an unlinked instruction at the head of its sub-list in `block`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction is already linked into a block.
    pub fn prepend_inst(&mut self, block: BlockId, inst: InstId) {
        self.link(block, inst, None);
    }

    /// Inserts an unlinked instruction right before `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is unlinked, `inst` is linked, or exactly one of them is a phi.
    pub fn insert_before(&mut self, pos: InstId, inst: InstId) {
        let block = self.linked_block(pos);
        self.check_same_list(pos, inst);
        let prev = self.insts[pos].prev;
        self.link(block, inst, prev);
    }

    /// Inserts an unlinked instruction right after `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is unlinked, `inst` is linked, or exactly one of them is a phi.
    pub fn insert_after(&mut self, pos: InstId, inst: InstId) {
        let block = self.linked_block(pos);
        self.check_same_list(pos, inst);
        self.link(block, inst, Some(pos));
    }

    /// Inserts a non-phi instruction before the terminator of `block`, or appends it.
    pub fn insert_before_terminator(&mut self, block: BlockId, inst: InstId) {
        match self.blocks[block].last_inst {
            Some(last) if self.insts[last].opcode.is_terminator() => {
                self.insert_before(last, inst);
            }
            _ => self.append_inst(block, inst),
        }
    }

    /// Detaches an instruction from its block, keeping inputs and users.
    ///
    /// # Panics
    ///
    /// Panics if the instruction is not linked.
    pub fn unlink_inst(&mut self, inst: InstId) {
        let block = self.linked_block(inst);
        self.touch_insts();
        let (prev, next, is_phi) = {
            let i = &self.insts[inst];
            (i.prev, i.next, i.is_phi())
        };
        match prev {
            Some(prev) => self.insts[prev].next = next,
            None if is_phi => self.blocks[block].first_phi = next,
            None => self.blocks[block].first_inst = next,
        }
        match next {
            Some(next) => self.insts[next].prev = prev,
            None if is_phi => self.blocks[block].last_phi = prev,
            None => self.blocks[block].last_inst = prev,
        }
        let i = &mut self.insts[inst];
        i.prev = None;
        i.next = None;
        i.block = None;
    }

    /// Deletes an instruction that has no users: drops its inputs, unlinks and
    /// tombstones it.
    ///
    /// # Panics
    ///
    /// Panics if the instruction still has users.
    pub fn erase_inst(&mut self, inst: InstId) {
        assert!(
            !self.insts[inst].has_users(),
            "cannot erase {inst}: it still has users"
        );
        self.remove_inst(inst);
    }

    /// Deletes an instruction, cascading to its def-use links: its inputs forget it as a
    /// user and every user loses the input slot that referenced it.
    ///
    /// Meant for bulk deletion where the users are deleted as well.
    pub fn remove_inst(&mut self, inst: InstId) {
        self.remove_all_inputs(inst);
        while let Some(user) = self.insts[inst].users.last().copied() {
            self.remove_input(user.inst, user.index);
        }
        if self.insts[inst].block.is_some() {
            self.unlink_inst(inst);
        }
        self.touch_insts();
        self.insts.remove(inst);
    }

    /// Puts `new` (unlinked) in place of `old`, redirects users, and deletes `old`.
    pub fn replace_inst(&mut self, old: InstId, new: InstId) {
        self.insert_before(old, new);
        self.replace_users(old, new);
        self.remove_inst(old);
    }

    fn linked_block(&self, inst: InstId) -> BlockId {
        match self.insts[inst].block {
            Some(block) => block,
            None => panic!("{inst} is not linked into a block"),
        }
    }

    fn check_same_list(&self, pos: InstId, inst: InstId) {
        assert_eq!(
            self.insts[pos].is_phi(),
            self.insts[inst].is_phi(),
            "phis and non-phi instructions live in separate lists ({pos}, {inst})"
        );
    }

    /// Links `inst` into `block` after `after` (or at the head of its sub-list).
    fn link(&mut self, block: BlockId, inst: InstId, after: Option<InstId>) {
        assert!(
            self.insts[inst].block.is_none(),
            "{inst} is already linked into a block"
        );
        self.touch_insts();
        let is_phi = self.insts[inst].is_phi();
        let next = match after {
            Some(after) => self.insts[after].next,
            None if is_phi => self.blocks[block].first_phi,
            None => self.blocks[block].first_inst,
        };
        {
            let i = &mut self.insts[inst];
            i.prev = after;
            i.next = next;
            i.block = Some(block);
        }
        match after {
            Some(after) => self.insts[after].next = Some(inst),
            None if is_phi => self.blocks[block].first_phi = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
        match next {
            Some(next) => self.insts[next].prev = Some(inst),
            None if is_phi => self.blocks[block].last_phi = Some(inst),
            None => self.blocks[block].last_inst = Some(inst),
        }
    }

    // ── Graph-wide state ────────────────────────────────────────────────

    /// Returns the graph flags.
    #[must_use]
    pub fn flags(&self) -> GraphFlags {
        self.flags
    }

    /// Sets or clears graph flags.
    pub fn set_flags(&mut self, flags: GraphFlags, value: bool) {
        self.flags.set(flags, value);
    }

    /// Returns `true` if loop analysis found an irreducible loop.
    #[must_use]
    pub fn has_irreducible_loop(&self) -> bool {
        self.flags.contains(GraphFlags::HAS_IRREDUCIBLE_LOOP)
    }

    /// Returns `true` if loop analysis found a loop without exits.
    #[must_use]
    pub fn has_infinite_loop(&self) -> bool {
        self.flags.contains(GraphFlags::HAS_INFINITE_LOOP)
    }

    /// Returns `true` if the method has try regions.
    #[must_use]
    pub fn has_try_catch(&self) -> bool {
        self.flags.contains(GraphFlags::HAS_TRY_CATCH)
    }

    /// Returns `true` when linearizing in guest pc order.
    #[must_use]
    pub fn is_bytecode_optimizer(&self) -> bool {
        self.flags.contains(GraphFlags::BYTECODE_OPTIMIZER)
    }

    /// Returns the try regions.
    #[must_use]
    pub fn try_regions(&self) -> &[TryRegion] {
        &self.try_regions
    }

    /// Returns the try region with the given id.
    #[must_use]
    pub fn try_region(&self, id: u32) -> Option<&TryRegion> {
        self.try_regions.iter().find(|r| r.id == id)
    }

    /// Registers a try region and sets [`GraphFlags::HAS_TRY_CATCH`].
    pub fn add_try_region(&mut self, region: TryRegion) {
        self.try_regions.retain(|r| r.id != region.id);
        self.try_regions.push(region);
        self.flags |= GraphFlags::HAS_TRY_CATCH;
    }

    pub(crate) fn try_region_mut(&mut self, id: u32) -> Option<&mut TryRegion> {
        self.try_regions.iter_mut().find(|r| r.id == id)
    }

    /// Returns the size of the guest bytecode the graph was built from.
    #[must_use]
    pub fn bytecode_size(&self) -> usize {
        self.bytecode_size
    }

    /// Returns the number of guest virtual registers.
    #[must_use]
    pub fn vreg_count(&self) -> usize {
        self.vreg_count
    }

    /// Records the guest method dimensions checked before compilation.
    pub fn set_method_info(&mut self, bytecode_size: usize, vreg_count: usize) {
        self.bytecode_size = bytecode_size;
        self.vreg_count = vreg_count;
    }

    /// Returns the modification counter, bumped by every change notification.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn node(block: BlockId) -> NodeId {
        NodeId::new(block.index())
    }

    pub(crate) fn block_of_node(&self, node: NodeId) -> BlockId {
        match self.blocks.handle_at(node.index()) {
            Some(block) => block,
            None => panic!("no live block at {node}"),
        }
    }
}

/// Iterator over one instruction sub-list of a block.
pub struct InstIter<'a> {
    graph: &'a Graph,
    next: Option<InstId>,
    forward: bool,
}

impl Iterator for InstIter<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<InstId> {
        let current = self.next?;
        let inst = &self.graph.insts[current];
        self.next = if self.forward { inst.next } else { inst.prev };
        Some(current)
    }
}

impl GraphBase for Graph {
    fn node_count(&self) -> usize {
        self.blocks.capacity()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.blocks.handles().map(Graph::node)
    }
}

impl Successors for Graph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        let block = self.block_of_node(node);
        self.blocks[block].succs.iter().map(|&s| Graph::node(s))
    }
}

impl Predecessors for Graph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        let block = self.block_of_node(node);
        self.blocks[block].preds.iter().map(|&p| Graph::node(p))
    }
}

impl RootedGraph for Graph {
    fn entry(&self) -> NodeId {
        Graph::node(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(graph: &mut Graph, a: InstId, b: InstId) -> InstId {
        graph.create_inst_with(Opcode::Add, DataType::Int64, InstData::None, &[a, b])
    }

    #[test]
    fn test_new_graph_has_start_block() {
        let graph = Graph::new();
        assert_eq!(graph.block_count(), 1);
        assert!(graph.block(graph.start_block()).is_start());
        assert!(graph.end_block().is_none());
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut graph = Graph::new();
        let a = graph.find_or_create_const(ConstValue::Int(1), DataType::Int64);
        let b = graph.find_or_create_const(ConstValue::Int(1), DataType::Int64);
        let c = graph.find_or_create_const(ConstValue::Int(1), DataType::Int32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(graph.insts(graph.start_block()).count(), 2);
    }

    #[test]
    fn test_constant_table_follows_moves_and_deletions() {
        let mut graph = Graph::new();
        let block = graph.create_block(0);
        let seven = graph.find_or_create_const(ConstValue::Int(7), DataType::Int64);
        graph.unlink_inst(seven);
        graph.append_inst(block, seven);
        assert_eq!(
            graph.find_or_create_const(ConstValue::Int(7), DataType::Int64),
            seven
        );

        graph.erase_inst(seven);
        let fresh = graph.find_or_create_const(ConstValue::Int(7), DataType::Int64);
        assert_ne!(fresh, seven);
        assert_eq!(graph.inst(fresh).block(), Some(graph.start_block()));
        let float = graph.find_or_create_const(ConstValue::float(7.0), DataType::Float64);
        assert_ne!(float, fresh);
    }

    #[test]
    fn test_list_edits_bump_epoch_and_drop_liveness() {
        let mut graph = Graph::new();
        graph.valid = AnalysisSet::all();
        let epoch = graph.epoch();
        let x = graph.create_param(0, DataType::Int64);
        assert!(graph.epoch() > epoch);
        assert_eq!(graph.valid_analyses(), AnalysisSet::all() - AnalysisSet::LIVENESS);

        graph.valid = AnalysisSet::all();
        let sum = add(&mut graph, x, x);
        assert!(!graph.is_valid(AnalysisKind::Liveness));
        graph.valid = AnalysisSet::all();
        graph.insert_before_terminator(graph.start_block(), sum);
        assert!(!graph.is_valid(AnalysisKind::Liveness));
        assert!(graph.is_valid(AnalysisKind::Dominators));
    }

    #[test]
    fn test_def_use_links_follow_inputs() {
        let mut graph = Graph::new();
        let x = graph.create_param(0, DataType::Int64);
        let y = graph.create_param(1, DataType::Int64);
        let sum = add(&mut graph, x, y);

        assert_eq!(graph.inst(x).users(), &[User { inst: sum, index: 0 }]);
        graph.set_input(sum, 0, y);
        assert!(!graph.inst(x).has_users());
        assert_eq!(graph.inst(y).users().len(), 2);

        graph.remove_input(sum, 0);
        assert_eq!(graph.inst(sum).inputs(), &[y]);
        assert_eq!(graph.inst(y).users(), &[User { inst: sum, index: 0 }]);
    }

    #[test]
    fn test_list_ops_keep_phis_first() {
        let mut graph = Graph::new();
        let block = graph.create_block(0);
        let x = graph.create_param(0, DataType::Int64);
        let a = add(&mut graph, x, x);
        let b = add(&mut graph, x, x);
        let phi = graph.create_inst(Opcode::Phi, DataType::Int64, 0);

        graph.append_inst(block, a);
        graph.prepend_inst(block, phi);
        graph.insert_after(a, b);

        assert_eq!(graph.phis(block).collect::<Vec<_>>(), vec![phi]);
        assert_eq!(graph.insts(block).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(graph.insts_rev(block).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(graph.all_insts(block).collect::<Vec<_>>(), vec![phi, a, b]);

        graph.unlink_inst(a);
        assert_eq!(graph.block(block).first_inst(), Some(b));
        assert_eq!(graph.block(block).last_inst(), Some(b));
        graph.insert_before(b, a);
        assert_eq!(graph.insts(block).collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_replace_inst_redirects_users() {
        let mut graph = Graph::new();
        let block = graph.create_block(0);
        let x = graph.create_param(0, DataType::Int64);
        let a = add(&mut graph, x, x);
        let user = add(&mut graph, a, x);
        graph.append_inst(block, a);
        graph.append_inst(block, user);

        let b = graph.create_inst_with(Opcode::Sub, DataType::Int64, InstData::None, &[x, x]);
        graph.replace_inst(a, b);

        assert!(!graph.contains_inst(a));
        assert_eq!(graph.inst(user).input(0), b);
        assert_eq!(graph.insts(block).collect::<Vec<_>>(), vec![b, user]);
    }

    #[test]
    #[should_panic(expected = "still has users")]
    fn test_erase_with_users_panics() {
        let mut graph = Graph::new();
        let x = graph.create_param(0, DataType::Int64);
        let _ = add(&mut graph, x, x);
        graph.erase_inst(x);
    }

    #[test]
    #[should_panic(expected = "separate lists")]
    fn test_insert_phi_among_insts_panics() {
        let mut graph = Graph::new();
        let block = graph.create_block(0);
        let x = graph.create_param(0, DataType::Int64);
        let a = add(&mut graph, x, x);
        graph.append_inst(block, a);
        let phi = graph.create_inst(Opcode::Phi, DataType::Int64, 0);
        graph.insert_before(a, phi);
    }

    #[test]
    fn test_graph_traits_expose_cfg() {
        let mut graph = Graph::new();
        let b = graph.create_block(0);
        graph.connect(graph.start_block(), b);
        let succs: Vec<_> = graph.successors(graph.entry()).collect();
        assert_eq!(succs, vec![Graph::node(b)]);
        assert_eq!(graph.node_ids().count(), 2);
    }
}
