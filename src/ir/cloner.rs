//! Loop cloning, unrolling and header peeling.
//!
//! [`GraphCloner`] duplicates parts of a reducible loop with a single back-edge. Every
//! cloning operation returns a [`CloneMap`] from original to cloned blocks and
//! instructions, recomputes dominators from scratch and leaves loop analysis invalid;
//! callers run [`Graph::ensure`] before looking at loops again.
//!
//! Loops whose blocks belong to a try region or an exception handler are rejected with
//! [`Error::Precondition`], as are loops of any other unsupported shape. Nothing is
//! modified in that case.
//!
//! ```rust,ignore
//! use vmopt::ir::cloner::GraphCloner;
//!
//! graph.ensure(AnalysisKind::Loops)?;
//! let mut cloner = GraphCloner::new(&mut graph);
//! if cloner.is_loop_single_back_edge_exit_point(lp) {
//!     let copies = cloner.unroll_loop_body(lp, 4, true)?;
//! }
//! ```

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::{AnalysisKind, GraphChange, LoopId},
    ir::{BlockFlags, BlockId, Graph, InstId, Opcode, User},
    Error, Result,
};

/// One-to-one map from original blocks and instructions to their clones.
#[derive(Debug, Clone, Default)]
pub struct CloneMap {
    blocks: FxHashMap<BlockId, BlockId>,
    insts: FxHashMap<InstId, InstId>,
}

impl CloneMap {
    /// Returns the clone of `block`.
    #[must_use]
    pub fn block(&self, block: BlockId) -> Option<BlockId> {
        self.blocks.get(&block).copied()
    }

    /// Returns the value standing for `inst` in the cloned region.
    ///
    /// Header phis that were folded away map to the value they would have taken.
    #[must_use]
    pub fn inst(&self, inst: InstId) -> Option<InstId> {
        self.insts.get(&inst).copied()
    }

    /// Returns the mapped value of `inst`, or `inst` itself if it was defined outside the
    /// cloned region.
    #[must_use]
    pub fn resolve(&self, inst: InstId) -> InstId {
        self.inst(inst).unwrap_or(inst)
    }

    /// Iterates `(original, clone)` block pairs.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, BlockId)> + '_ {
        self.blocks.iter().map(|(&k, &v)| (k, v))
    }

    /// Iterates `(original, value)` instruction pairs.
    pub fn insts(&self) -> impl Iterator<Item = (InstId, InstId)> + '_ {
        self.insts.iter().map(|(&k, &v)| (k, v))
    }

    /// Returns the number of cloned blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the number of mapped instructions.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    fn copy_of(&self, block: BlockId) -> Result<BlockId> {
        self.block(block)
            .ok_or_else(|| Error::Precondition(format!("{block} was not cloned")))
    }
}

/// The parts of a loop every operation needs.
struct LoopShape {
    header: BlockId,
    back_edge: BlockId,
    members: Vec<BlockId>,
    member_set: FxHashSet<BlockId>,
}

/// Structural loop transformations over a graph with valid loop analysis.
pub struct GraphCloner<'a> {
    graph: &'a mut Graph,
}

impl<'a> GraphCloner<'a> {
    /// Creates a cloner working on `graph`.
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph }
    }

    /// Returns `true` if `lp` has exactly one back-edge, the back-edge block is the only
    /// block (inner loops included) with a successor outside the loop, and it has
    /// exactly two successors.
    ///
    /// Returns `false` when loop analysis is not valid.
    #[must_use]
    pub fn is_loop_single_back_edge_exit_point(&self, lp: LoopId) -> bool {
        let graph = &*self.graph;
        if !graph.is_valid(AnalysisKind::Loops) || lp.index() >= graph.loops.len() {
            return false;
        }
        let l = graph.get_loop(lp);
        if l.is_root() || l.is_irreducible() {
            return false;
        }
        let &[back_edge] = l.back_edges() else {
            return false;
        };
        if graph.block(back_edge).succs().len() != 2 {
            return false;
        }
        let mut exits = false;
        for member in graph.loop_members(lp) {
            let leaves = graph
                .block(member)
                .succs()
                .iter()
                .any(|&succ| !graph.is_block_in_loop(succ, lp));
            if leaves {
                if member != back_edge {
                    return false;
                }
                exits = true;
            }
        }
        exits
    }

    /// Moves the exit test at the end of the back-edge block into a block of its own and
    /// returns the block now holding it, which becomes the loop's back-edge.
    ///
    /// The exit test is the terminating branch plus, for an `IfImm`, the compare it
    /// tests. A compare that is not right before the branch, or that has other users, is
    /// cloned next to the branch. If the exit test already starts the back-edge block,
    /// the block is returned unchanged.
    ///
    /// Loop analysis and dominators are patched in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if the loop is not a reducible single back-edge
    /// loop, the back-edge block does not end with a conditional branch, or nothing but
    /// phis precede the exit test of the header.
    pub fn split_back_edge(&mut self, lp: LoopId) -> Result<BlockId> {
        let shape = self.shape(lp)?;
        let back_edge = shape.back_edge;
        let graph = &mut *self.graph;

        let Some(branch) = graph
            .block(back_edge)
            .last_inst()
            .filter(|&last| graph.inst(last).opcode().is_conditional_branch())
        else {
            return Err(Error::Precondition(format!(
                "back-edge {back_edge} of {lp} does not end with a conditional branch"
            )));
        };

        let mut first = branch;
        if graph.inst(branch).opcode() == Opcode::IfImm {
            let cond = graph.inst(branch).input(0);
            let c = graph.inst(cond);
            if c.opcode() == Opcode::Compare {
                let adjacent = c.block() == Some(back_edge)
                    && c.next() == Some(branch)
                    && c.users().len() == 1;
                first = if adjacent {
                    cond
                } else {
                    let copy = clone_inst(graph, cond);
                    let inputs = graph.inst(cond).inputs().to_vec();
                    for input in inputs {
                        graph.append_input(copy, input);
                    }
                    graph.insert_before(branch, copy);
                    graph.set_input(branch, 0, copy);
                    copy
                };
            }
        }

        match graph.inst(first).prev() {
            Some(prev) => {
                let new_back_edge = graph.split_block_after(prev, true);
                log::trace!("split exit test of {lp} into {new_back_edge}");
                Ok(new_back_edge)
            }
            None if back_edge != shape.header && !graph.block(back_edge).has_phis() => {
                Ok(back_edge)
            }
            None => Err(exit_test_error(back_edge)),
        }
    }

    /// Unrolls `lp` so that its body runs `factor` times per trip around the back-edge.
    ///
    /// With `side_exits`, the whole loop is cloned `factor - 1` times. Each copy keeps its
    /// exit test; the copies are chained through their back-edge and the last one closes
    /// the loop. A new exit block merges, with phis, the value of each copy for every
    /// value used after the loop.
    ///
    /// Without side exits, the exit test is split off first (see
    /// [`GraphCloner::split_back_edge`]) and only the body above it is repeated, so the
    /// test runs once per `factor` iterations. The caller guarantees that the trip count
    /// is a multiple of `factor`.
    ///
    /// Returns one map per copy, in chain order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if `factor < 2`, the loop is not a single
    /// back-edge exit point, or, without side exits, the exit test cannot be isolated.
    pub fn unroll_loop_body(
        &mut self,
        lp: LoopId,
        factor: usize,
        side_exits: bool,
    ) -> Result<Vec<CloneMap>> {
        if factor < 2 {
            return Err(Error::Precondition(format!(
                "unroll factor {factor} leaves nothing to clone"
            )));
        }
        if !self.is_loop_single_back_edge_exit_point(lp) {
            return Err(Error::Precondition(format!(
                "{lp} is not a single back-edge exit point"
            )));
        }
        let maps = if side_exits {
            self.unroll_with_side_exits(lp, factor)?
        } else {
            self.unroll_without_side_exits(lp, factor)?
        };
        self.finish()?;
        log::debug!(
            "unrolled {lp} by {factor} ({} block(s) per copy)",
            maps.first().map_or(0, CloneMap::block_count)
        );
        Ok(maps)
    }

    /// Duplicates `lp` right after itself.
    ///
    /// The original exit edge enters the clone header, whose phis take the original's
    /// back-edge values on that edge. Users after the loop switch to the clone's values.
    /// Exactly one block is created per loop block, so every back-edge of the loop and
    /// its inner loops gets a copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if the loop is not a single back-edge exit point
    /// or its header has more than one entry.
    pub fn clone_loop(&mut self, lp: LoopId) -> Result<CloneMap> {
        if !self.is_loop_single_back_edge_exit_point(lp) {
            return Err(Error::Precondition(format!(
                "{lp} is not a single back-edge exit point"
            )));
        }
        let shape = self.shape(lp)?;
        let (header, back_edge) = (shape.header, shape.back_edge);
        let header_preds = self.graph.block(header).preds().to_vec();
        let (be_slot, entry_slot) = entry_and_back_edge(&header_preds, back_edge)
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "header {header} of {lp} needs one entry and one back-edge"
                ))
            })?;
        let exit = self.exit_of(&shape, back_edge)?;
        let escaping: Vec<(InstId, User)> = self
            .users_of(&shape.members)
            .into_iter()
            .filter(|(_, user)| {
                self.graph
                    .inst(user.inst)
                    .block()
                    .is_some_and(|b| !shape.member_set.contains(&b))
            })
            .collect();

        let mut map = CloneMap::default();
        self.clone_blocks(&shape.members, header, &mut map);
        let copy_header = map.copy_of(header)?;
        let copy_back_edge = map.copy_of(back_edge)?;
        let graph = &mut *self.graph;

        let mut preds = vec![back_edge; 2];
        preds[be_slot] = copy_back_edge;
        graph.block_mut(copy_header).preds = preds;
        let header_phis: Vec<InstId> = graph.phis(header).collect();
        for phi in header_phis {
            let value = graph.inst(phi).input(be_slot);
            if let Some(copy) = map.inst(phi) {
                graph.set_input(copy, entry_slot, value);
            }
        }

        if let Some(index) = graph.block(back_edge).succ_index(exit) {
            graph.block_mut(back_edge).succs[index] = copy_header;
        }
        graph.replace_predecessor(exit, back_edge, copy_back_edge);

        for (value, user) in escaping {
            if let Some(copy) = map.inst(value) {
                graph.set_input(user.inst, user.index, copy);
            }
        }

        self.finish()?;
        log::debug!(
            "cloned {lp} after itself: {} block(s), {} instruction(s)",
            map.block_count(),
            map.inst_count()
        );
        Ok(map)
    }

    /// Peels the header of `lp` in front of the loop.
    ///
    /// The header clone becomes the pre-header's target. A resolver block on the exit
    /// edge merges the values of the original header and of its clone for users after
    /// the loop, and the body entry gets phis for header values used inside the body.
    /// The original header keeps only its back-edge predecessor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] unless the loop has a pre-header, one back-edge
    /// distinct from the header, and a header ending in a conditional branch that is the
    /// loop's only exit.
    pub fn peel_loop_header(&mut self, lp: LoopId) -> Result<CloneMap> {
        let shape = self.shape(lp)?;
        let (header, back_edge) = (shape.header, shape.back_edge);
        if header == back_edge {
            return Err(Error::Precondition(format!("{lp} is a single-block loop")));
        }
        let graph = &*self.graph;
        let Some(preheader) = graph
            .get_loop(lp)
            .preheader()
            .filter(|&p| graph.block(p).succs() == [header])
        else {
            return Err(Error::Precondition(format!("{lp} has no pre-header")));
        };
        let header_preds = graph.block(header).preds().to_vec();
        let (_, entry_slot) = entry_and_back_edge(&header_preds, back_edge)
            .filter(|&(_, entry)| header_preds[entry] == preheader)
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "header {header} of {lp} needs one entry and one back-edge"
                ))
            })?;
        let ends_in_branch = graph
            .block(header)
            .last_inst()
            .is_some_and(|last| graph.inst(last).opcode().is_conditional_branch());
        let (inside, outside): (Vec<BlockId>, Vec<BlockId>) = graph
            .block(header)
            .succs()
            .iter()
            .copied()
            .partition(|s| shape.member_set.contains(s));
        let (&[body_entry], &[exit]) = (inside.as_slice(), outside.as_slice()) else {
            return Err(Error::Precondition(format!(
                "header {header} of {lp} is not the loop's exit test"
            )));
        };
        if !ends_in_branch {
            return Err(Error::Precondition(format!(
                "header {header} of {lp} does not end with a conditional branch"
            )));
        }
        if let Some(&other) = shape.members.iter().find(|&&b| {
            b != header
                && graph
                    .block(b)
                    .succs()
                    .iter()
                    .any(|s| !shape.member_set.contains(s))
        }) {
            return Err(Error::Precondition(format!(
                "{lp} also exits from {other}"
            )));
        }

        let resolver = self.graph.insert_block_between(header, exit);
        let mut map = CloneMap::default();
        let header_phis: Vec<InstId> = self.graph.phis(header).collect();
        for &phi in &header_phis {
            map.insts.insert(phi, self.graph.inst(phi).input(entry_slot));
        }
        self.clone_blocks(&[header], header, &mut map);
        let copy = map.copy_of(header)?;
        let graph = &mut *self.graph;

        graph.block_mut(preheader).succs = vec![copy];
        graph.block_mut(copy).preds = vec![preheader];
        for &phi in &header_phis {
            graph.remove_input(phi, entry_slot);
        }
        graph.block_mut(header).preds.remove(entry_slot);
        graph.block_mut(body_entry).preds.push(copy);
        graph.block_mut(resolver).preds.push(copy);

        if let Some(slot) = graph.block(body_entry).pred_index(header) {
            let phis: Vec<InstId> = graph
                .phis(body_entry)
                .filter(|&p| !graph.inst(p).is_catch_phi())
                .collect();
            for phi in phis {
                let value = map.resolve(graph.inst(phi).input(slot));
                graph.append_input(phi, value);
            }
        }

        let body: FxHashSet<BlockId> = shape
            .member_set
            .iter()
            .copied()
            .filter(|&b| b != header)
            .collect();
        let mut body_phis: FxHashMap<InstId, InstId> = FxHashMap::default();
        let mut exit_phis: FxHashMap<InstId, InstId> = FxHashMap::default();
        for (value, user) in self.users_of(&[header]) {
            let Some(at) = self.use_block(user) else {
                continue;
            };
            if at == header || at == copy {
                continue;
            }
            let merged = if body.contains(&at) {
                // Inner back-edges into the body entry carry the merged value unchanged.
                self.merge_phi(&mut body_phis, body_entry, value, |pred, phi| {
                    if pred == copy {
                        map.resolve(value)
                    } else if pred == header {
                        value
                    } else {
                        phi
                    }
                })
            } else {
                self.merge_phi(&mut exit_phis, resolver, value, |pred, _| {
                    if pred == copy {
                        map.resolve(value)
                    } else {
                        value
                    }
                })
            };
            self.graph.set_input(user.inst, user.index, merged);
        }

        self.finish()?;
        log::debug!("peeled header {header} of {lp} into {copy}");
        Ok(map)
    }

    fn unroll_with_side_exits(&mut self, lp: LoopId, factor: usize) -> Result<Vec<CloneMap>> {
        let shape = self.shape(lp)?;
        let (header, back_edge) = (shape.header, shape.back_edge);
        let be_slot = self.pred_slot(header, back_edge)?;
        let cont = self.succ_slot(back_edge, header)?;
        let exit = self.exit_of(&shape, back_edge)?;

        let exit_block = self.graph.insert_block_between(back_edge, exit);
        let header_phis: Vec<InstId> = self.graph.phis(header).collect();
        let escaping: Vec<(InstId, User)> = self
            .users_of(&shape.members)
            .into_iter()
            .filter(|&(_, user)| {
                self.use_block(user)
                    .is_some_and(|b| !shape.member_set.contains(&b))
            })
            .collect();

        let mut maps: Vec<CloneMap> = Vec::with_capacity(factor - 1);
        let mut tail = back_edge;
        for _ in 1..factor {
            let map = self.clone_iteration(&shape.members, header, &header_phis, be_slot, maps.last());
            let copy_header = map.copy_of(header)?;
            let copy_tail = map.copy_of(back_edge)?;
            self.graph.block_mut(tail).succs[cont] = copy_header;
            self.graph.block_mut(copy_header).preds = vec![tail];
            self.graph.block_mut(exit_block).preds.push(copy_tail);
            tail = copy_tail;
            maps.push(map);
        }
        self.close_loop(&maps, header, &header_phis, be_slot, tail, cont);

        let mut merged: FxHashMap<InstId, InstId> = FxHashMap::default();
        for (value, user) in escaping {
            let phi = match merged.get(&value) {
                Some(&phi) => phi,
                None => {
                    let (ty, pc) = (self.graph.inst(value).ty(), self.graph.inst(value).pc());
                    let phi = self.graph.create_inst(Opcode::Phi, ty, pc);
                    self.graph.append_inst(exit_block, phi);
                    self.graph.append_input(phi, value);
                    for map in &maps {
                        self.graph.append_input(phi, map.resolve(value));
                    }
                    merged.insert(value, phi);
                    phi
                }
            };
            self.graph.set_input(user.inst, user.index, phi);
        }
        Ok(maps)
    }

    fn unroll_without_side_exits(&mut self, lp: LoopId, factor: usize) -> Result<Vec<CloneMap>> {
        let latch = self.split_back_edge(lp)?;
        let shape = self.shape(lp)?;
        let header = shape.header;
        if latch == header {
            return Err(Error::Precondition(format!(
                "{lp} has no body above its exit test"
            )));
        }
        let &[tail] = self.graph.block(latch).preds() else {
            return Err(Error::Precondition(format!(
                "exit test {latch} of {lp} must have a single predecessor"
            )));
        };
        if self.graph.block(latch).has_phis() {
            return Err(exit_test_error(latch));
        }
        let body: Vec<BlockId> = shape.members.iter().copied().filter(|&b| b != latch).collect();
        let body_set: FxHashSet<BlockId> = body.iter().copied().collect();
        let be_slot = self.pred_slot(header, latch)?;
        let slot = self.succ_slot(tail, latch)?;
        let header_phis: Vec<InstId> = self.graph.phis(header).collect();
        let escaping: Vec<(InstId, User)> = self
            .users_of(&body)
            .into_iter()
            .filter(|&(_, user)| self.use_block(user).is_some_and(|b| !body_set.contains(&b)))
            .collect();

        let mut maps: Vec<CloneMap> = Vec::with_capacity(factor - 1);
        let mut prev_tail = tail;
        for _ in 1..factor {
            let map = self.clone_iteration(&body, header, &header_phis, be_slot, maps.last());
            let copy_header = map.copy_of(header)?;
            let copy_tail = map.copy_of(tail)?;
            self.graph.block_mut(prev_tail).succs[slot] = copy_header;
            self.graph.block_mut(copy_header).preds = vec![prev_tail];
            prev_tail = copy_tail;
            maps.push(map);
        }
        self.graph.block_mut(prev_tail).succs[slot] = latch;
        self.graph.block_mut(latch).preds = vec![prev_tail];

        if let Some(last) = maps.last() {
            for (value, user) in escaping {
                self.graph.set_input(user.inst, user.index, last.resolve(value));
            }
        }
        Ok(maps)
    }

    /// Clones `blocks` as one more iteration: header phis fold into the value they take
    /// on the back-edge of the previous iteration.
    fn clone_iteration(
        &mut self,
        blocks: &[BlockId],
        header: BlockId,
        header_phis: &[InstId],
        be_slot: usize,
        prev: Option<&CloneMap>,
    ) -> CloneMap {
        let mut map = CloneMap::default();
        for &phi in header_phis {
            let value = self.graph.inst(phi).input(be_slot);
            let folded = prev.map_or(value, |p| p.resolve(value));
            map.insts.insert(phi, folded);
        }
        self.clone_blocks(blocks, header, &mut map);
        map
    }

    /// Sends the last copy back to the header and feeds its values to the header phis.
    fn close_loop(
        &mut self,
        maps: &[CloneMap],
        header: BlockId,
        header_phis: &[InstId],
        be_slot: usize,
        tail: BlockId,
        cont: usize,
    ) {
        let Some(last) = maps.last() else {
            return;
        };
        self.graph.block_mut(tail).succs[cont] = header;
        self.graph.block_mut(header).preds[be_slot] = tail;
        for &phi in header_phis {
            let value = last.resolve(self.graph.inst(phi).input(be_slot));
            self.graph.set_input(phi, be_slot, value);
        }
    }

    /// Creates clones of `blocks` and their instructions, resolving inputs through `map`.
    ///
    /// Instructions already present in `map` are not cloned. Successor lists are copied
    /// with targets inside the region mapped; predecessor lists are copied for every
    /// block but `header`, whose clone is wired by the caller.
    fn clone_blocks(&mut self, blocks: &[BlockId], header: BlockId, map: &mut CloneMap) {
        let graph = &mut *self.graph;
        for &block in blocks {
            let (pc, frequency) = (graph.block(block).pc(), graph.block(block).frequency());
            let copy = graph.create_block(pc);
            graph.set_frequency(copy, frequency);
            map.blocks.insert(block, copy);
        }

        let mut cloned = Vec::new();
        for &block in blocks {
            let Some(copy) = map.block(block) else {
                continue;
            };
            let insts: Vec<InstId> = graph.all_insts(block).collect();
            for inst in insts {
                if map.insts.contains_key(&inst) {
                    continue;
                }
                let clone = clone_inst(graph, inst);
                graph.append_inst(copy, clone);
                map.insts.insert(inst, clone);
                cloned.push((inst, clone));
            }
        }
        for (inst, clone) in cloned {
            let inputs: Vec<InstId> = graph
                .inst(inst)
                .inputs()
                .iter()
                .map(|&input| map.resolve(input))
                .collect();
            for input in inputs {
                graph.append_input(clone, input);
            }
        }

        for &block in blocks {
            let Some(copy) = map.block(block) else {
                continue;
            };
            let succs: Vec<BlockId> = graph
                .block(block)
                .succs()
                .iter()
                .map(|&s| map.block(s).unwrap_or(s))
                .collect();
            graph.block_mut(copy).succs = succs;
            if block != header {
                let preds: Vec<BlockId> = graph
                    .block(block)
                    .preds()
                    .iter()
                    .map(|&p| map.block(p).unwrap_or(p))
                    .collect();
                graph.block_mut(copy).preds = preds;
            }
        }
    }

    /// Returns the phi of `block` merging `value`, creating it on first use.
    fn merge_phi(
        &mut self,
        cache: &mut FxHashMap<InstId, InstId>,
        block: BlockId,
        value: InstId,
        input_for: impl Fn(BlockId, InstId) -> InstId,
    ) -> InstId {
        if let Some(&phi) = cache.get(&value) {
            return phi;
        }
        let (ty, pc) = (self.graph.inst(value).ty(), self.graph.inst(value).pc());
        let phi = self.graph.create_inst(Opcode::Phi, ty, pc);
        self.graph.append_inst(block, phi);
        let preds = self.graph.block(block).preds().to_vec();
        for pred in preds {
            let input = input_for(pred, phi);
            self.graph.append_input(phi, input);
        }
        cache.insert(value, phi);
        phi
    }

    fn finish(&mut self) -> Result<()> {
        self.graph.notify(GraphChange::Cfg);
        self.graph.force_recompute(AnalysisKind::Dominators)
    }

    fn shape(&self, lp: LoopId) -> Result<LoopShape> {
        let graph = &*self.graph;
        graph.require(AnalysisKind::Loops)?;
        if lp.index() >= graph.loops.len() {
            return Err(Error::Precondition(format!("unknown loop {lp}")));
        }
        let l = graph.get_loop(lp);
        let Some(header) = l.header() else {
            return Err(Error::Precondition("the root loop cannot be cloned".to_string()));
        };
        if l.is_irreducible() {
            return Err(Error::Precondition(format!("{lp} is irreducible")));
        }
        let &[back_edge] = l.back_edges() else {
            return Err(Error::Precondition(format!(
                "{lp} has {} back-edges",
                l.back_edges().len()
            )));
        };
        let members = graph.loop_members(lp);
        let in_handler = BlockFlags::CATCH | BlockFlags::CATCH_BEGIN;
        if let Some(&block) = members.iter().find(|&&b| {
            let b = graph.block(b);
            b.is_in_try() || b.flags().intersects(in_handler)
        }) {
            return Err(Error::Precondition(format!(
                "{block} of {lp} is part of a try region or handler"
            )));
        }
        Ok(LoopShape {
            header,
            back_edge,
            member_set: members.iter().copied().collect(),
            members,
        })
    }

    fn exit_of(&self, shape: &LoopShape, block: BlockId) -> Result<BlockId> {
        self.graph
            .block(block)
            .succs()
            .iter()
            .copied()
            .find(|s| !shape.member_set.contains(s))
            .ok_or_else(|| Error::Precondition(format!("{block} does not leave the loop")))
    }

    fn pred_slot(&self, block: BlockId, pred: BlockId) -> Result<usize> {
        self.graph
            .block(block)
            .pred_index(pred)
            .ok_or_else(|| Error::Precondition(format!("{pred} is not a predecessor of {block}")))
    }

    fn succ_slot(&self, block: BlockId, succ: BlockId) -> Result<usize> {
        self.graph
            .block(block)
            .succ_index(succ)
            .ok_or_else(|| Error::Precondition(format!("{succ} is not a successor of {block}")))
    }

    /// Every use of a value defined in `blocks`.
    fn users_of(&self, blocks: &[BlockId]) -> Vec<(InstId, User)> {
        let mut users = Vec::new();
        for &block in blocks {
            for inst in self.graph.all_insts(block) {
                for &user in self.graph.inst(inst).users() {
                    users.push((inst, user));
                }
            }
        }
        users
    }

    /// The block where a use happens: the user's block, or for a phi the predecessor
    /// the input arrives from.
    fn use_block(&self, user: User) -> Option<BlockId> {
        let inst = self.graph.inst(user.inst);
        let block = inst.block()?;
        if inst.is_phi() && !inst.is_catch_phi() {
            self.graph.block(block).preds().get(user.index).copied()
        } else {
            Some(block)
        }
    }
}

fn exit_test_error(block: BlockId) -> Error {
    Error::Precondition(format!("the exit test of {block} cannot be split off"))
}

/// Returns `(back-edge slot, entry slot)` of a header with exactly two predecessors.
fn entry_and_back_edge(preds: &[BlockId], back_edge: BlockId) -> Option<(usize, usize)> {
    match preds {
        [a, b] if *a == back_edge && *b != back_edge => Some((0, 1)),
        [a, b] if *b == back_edge && *a != back_edge => Some((1, 0)),
        _ => None,
    }
}

/// Creates an unlinked copy of `inst` without inputs.
fn clone_inst(graph: &mut Graph, inst: InstId) -> InstId {
    let (opcode, ty, pc, data, flags) = {
        let i = graph.inst(inst);
        (i.opcode(), i.ty(), i.pc(), i.data().clone(), i.extra_flags)
    };
    let clone = graph.create_inst(opcode, ty, pc);
    graph.set_data(clone, data);
    graph.add_inst_flags(clone, flags);
    clone
}
