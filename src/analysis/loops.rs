//! Loop analysis: natural loops, the loop tree and pre-headers.
//!
//! The analyzer finds back-edges with a depth-first search, grows each reducible loop
//! backwards from its back-edges, nests loops into a tree under a synthetic root loop
//! and guarantees every reducible, non-handler loop a pre-header block.
//!
//! # Irreducible loops
//!
//! A back-edge whose target does not dominate its source belongs to an irreducible
//! region. Such a loop is flagged (and so is the graph) but its body is not searched:
//! only its header and back-edge blocks are recorded as members. In-place fix-ups refuse
//! to touch graphs with irreducible loops, which then always take a full recompute.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::{
    analysis::{Analysis, AnalysisKind, CfgEdit, RpoAnalysis},
    ir::{BlockFlags, BlockId, Graph, GraphFlags, InstData, Opcode},
    Result,
};

/// Identifier of a loop. Identifiers are reassigned by every full recompute.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);

impl LoopId {
    /// Returns the position of the loop in the graph's loop table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

impl fmt::Debug for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A natural loop, or the root loop holding every block outside loops.
#[derive(Debug, Clone)]
pub struct Loop {
    id: LoopId,
    header: Option<BlockId>,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) back_edges: Vec<BlockId>,
    pub(crate) preheader: Option<BlockId>,
    pub(crate) outer: Option<LoopId>,
    pub(crate) inner: Vec<LoopId>,
    depth: u32,
    irreducible: bool,
    infinite: bool,
    try_catch: bool,
}

impl Loop {
    fn new(id: LoopId, header: Option<BlockId>) -> Self {
        Self {
            id,
            header,
            blocks: Vec::new(),
            back_edges: Vec::new(),
            preheader: None,
            outer: None,
            inner: Vec::new(),
            depth: 0,
            irreducible: false,
            infinite: false,
            try_catch: false,
        }
    }

    /// Returns the loop identifier.
    #[must_use]
    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Returns the header, `None` for the root loop.
    #[must_use]
    pub fn header(&self) -> Option<BlockId> {
        self.header
    }

    /// Returns the member blocks, header first. Members of inner loops are not included.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Returns the sources of the back-edges in discovery order.
    #[must_use]
    pub fn back_edges(&self) -> &[BlockId] {
        &self.back_edges
    }

    /// Returns the pre-header.
    #[must_use]
    pub fn preheader(&self) -> Option<BlockId> {
        self.preheader
    }

    /// Returns the enclosing loop, `None` for the root loop.
    #[must_use]
    pub fn outer(&self) -> Option<LoopId> {
        self.outer
    }

    /// Returns the directly nested loops.
    #[must_use]
    pub fn inner(&self) -> &[LoopId] {
        &self.inner
    }

    /// Returns the nesting depth; the root loop has depth 0.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns `true` for the root loop.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.header.is_none()
    }

    /// Returns `true` if the header does not dominate every back-edge.
    #[must_use]
    pub fn is_irreducible(&self) -> bool {
        self.irreducible
    }

    /// Returns `true` if no member has a successor outside the loop.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.infinite
    }

    /// Returns `true` if the header is the entry of an exception handler.
    #[must_use]
    pub fn is_try_catch(&self) -> bool {
        self.try_catch
    }
}

/// Loop tree stored in the graph and its blocks.
pub struct LoopAnalysis;

impl Analysis for LoopAnalysis {
    const KIND: AnalysisKind = AnalysisKind::Loops;

    fn try_incremental_update(graph: &mut Graph, edit: &CfgEdit) -> bool {
        if !graph.is_valid(Self::KIND) || graph.has_irreducible_loop() {
            return false;
        }
        match edit {
            CfgEdit::BlockSplit { block, new_block } => {
                let Some(owner) = graph.block(*block).loop_id else {
                    return false;
                };
                graph.add_to_loop(*new_block, owner);
                for lp in &mut graph.loops {
                    replace_all(&mut lp.back_edges, *block, &[*new_block]);
                    if lp.preheader == Some(*block) {
                        lp.preheader = Some(*new_block);
                    }
                }
                true
            }
            CfgEdit::BlockInsertedBetween {
                pred,
                succ,
                new_block,
            } => {
                let (Some(pred_loop), Some(succ_loop)) =
                    (graph.block(*pred).loop_id, graph.block(*succ).loop_id)
                else {
                    return false;
                };
                let header_of_succ = graph.loops[succ_loop.index()].header == Some(*succ);
                if header_of_succ && graph.loops[succ_loop.index()].back_edges.contains(pred) {
                    graph.add_to_loop(*new_block, succ_loop);
                    replace_all(
                        &mut graph.loops[succ_loop.index()].back_edges,
                        *pred,
                        &[*new_block],
                    );
                    return true;
                }
                let mut owner = pred_loop;
                while !graph.is_inside(succ_loop, owner) {
                    match graph.loops[owner.index()].outer {
                        Some(outer) => owner = outer,
                        None => break,
                    }
                }
                graph.add_to_loop(*new_block, owner);
                if header_of_succ && graph.loops[succ_loop.index()].preheader == Some(*pred) {
                    graph.loops[succ_loop.index()].preheader = Some(*new_block);
                }
                true
            }
            CfgEdit::EmptyBlockRemoved { block, preds, .. } => {
                let Some(owner) = graph.block(*block).loop_id else {
                    return false;
                };
                if graph.loops[owner.index()].header == Some(*block) {
                    return false;
                }
                graph.loops[owner.index()].blocks.retain(|b| b != block);
                for index in 0..graph.loops.len() {
                    let id = LoopId::from_index(index);
                    if graph.loops[index].back_edges.contains(block) {
                        let inside: Vec<BlockId> = preds
                            .iter()
                            .copied()
                            .filter(|&p| {
                                graph
                                    .block(p)
                                    .loop_id
                                    .is_some_and(|l| graph.is_inside(l, id))
                            })
                            .collect();
                        replace_all(&mut graph.loops[index].back_edges, *block, &inside);
                    }
                    if graph.loops[index].preheader == Some(*block) {
                        graph.loops[index].preheader = None;
                    }
                }
                true
            }
            CfgEdit::SuccessorJoined { block, succ } => {
                if let Some(owner) = graph.block(*succ).loop_id {
                    graph.loops[owner.index()].blocks.retain(|b| b != succ);
                }
                for lp in &mut graph.loops {
                    replace_all(&mut lp.back_edges, *succ, &[*block]);
                    if lp.preheader == Some(*succ) {
                        lp.preheader = Some(*block);
                    }
                }
                true
            }
        }
    }

    fn force_recompute(graph: &mut Graph) -> Result<()> {
        LoopAnalyzer::new(graph).run()
    }
}

/// One run of the loop analyzer over a graph with valid dominators and RPO.
struct LoopAnalyzer<'a> {
    graph: &'a mut Graph,
    header_loops: FxHashMap<BlockId, LoopId>,
}

impl<'a> LoopAnalyzer<'a> {
    fn new(graph: &'a mut Graph) -> Self {
        Self {
            graph,
            header_loops: FxHashMap::default(),
        }
    }

    fn run(mut self) -> Result<()> {
        self.reset();
        self.find_back_edges();
        self.populate();
        self.attach_to_root();
        let created = self.ensure_preheaders();
        if created > 0 {
            log::trace!("created {created} pre-header(s)");
            RpoAnalysis::force_recompute(self.graph)?;
            self.graph.epoch += 1;
            self.graph.invalidate(AnalysisKind::LinearOrder);
        }
        self.compute_depth_and_exits();
        log::debug!(
            "loop analysis: {} loop(s), irreducible: {}, infinite: {}",
            self.graph.loops.len() - 1,
            self.graph.has_irreducible_loop(),
            self.graph.has_infinite_loop()
        );
        Ok(())
    }

    fn reset(&mut self) {
        let blocks: Vec<BlockId> = self.graph.blocks().collect();
        for block in blocks {
            self.graph.block_mut(block).loop_id = None;
        }
        self.graph.loops.clear();
        self.graph.flags.remove(GraphFlags::HAS_IRREDUCIBLE_LOOP | GraphFlags::HAS_INFINITE_LOOP);
        let root = LoopId::from_index(0);
        self.graph.loops.push(Loop::new(root, None));
        self.graph.root_loop = Some(root);
    }

    fn find_back_edges(&mut self) {
        let start = self.graph.start_block();
        let mut grey = self.graph.new_marker();
        let mut black = self.graph.new_marker();
        let mut stack = vec![(start, 0usize)];
        grey.mark_block(start);

        while let Some(top) = stack.last_mut() {
            let (block, index) = *top;
            let succs = &self.graph.block(block).succs;
            if index < succs.len() {
                top.1 += 1;
                let succ = succs[index];
                if grey.is_block_marked(succ) {
                    self.record_back_edge(block, succ);
                } else if !black.is_block_marked(succ) {
                    grey.mark_block(succ);
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                grey.unmark_block(block);
                black.mark_block(block);
            }
        }
    }

    fn record_back_edge(&mut self, source: BlockId, header: BlockId) {
        let id = match self.header_loops.get(&header) {
            Some(&id) => id,
            None => {
                let id = LoopId::from_index(self.graph.loops.len());
                let mut lp = Loop::new(id, Some(header));
                lp.try_catch = self.graph.block(header).is_catch_begin();
                self.graph.loops.push(lp);
                self.header_loops.insert(header, id);
                id
            }
        };
        let irreducible = !self.graph.dominates(header, source);
        let lp = &mut self.graph.loops[id.index()];
        if !lp.back_edges.contains(&source) {
            lp.back_edges.push(source);
        }
        if irreducible {
            lp.irreducible = true;
            self.graph.flags |= GraphFlags::HAS_IRREDUCIBLE_LOOP;
        }
    }

    fn populate(&mut self) {
        let rpo = self.graph.rpo.clone();
        for &header in rpo.iter().rev() {
            let Some(&id) = self.header_loops.get(&header) else {
                continue;
            };
            self.graph.add_to_loop(header, id);
            if self.graph.loops[id.index()].irreducible {
                let back_edges = self.graph.loops[id.index()].back_edges.clone();
                for source in back_edges {
                    if self.graph.block(source).loop_id.is_none() {
                        self.graph.add_to_loop(source, id);
                    }
                }
                continue;
            }
            let mut worklist = self.graph.loops[id.index()].back_edges.clone();
            while let Some(block) = worklist.pop() {
                if block == header {
                    continue;
                }
                match self.graph.block(block).loop_id {
                    None => {
                        self.graph.add_to_loop(block, id);
                        worklist.extend_from_slice(&self.graph.block(block).preds);
                    }
                    Some(owner) => {
                        let outermost = self.graph.outermost(owner);
                        if outermost != id {
                            self.graph.loops[outermost.index()].outer = Some(id);
                            self.graph.loops[id.index()].inner.push(outermost);
                            if let Some(inner_header) = self.graph.loops[outermost.index()].header {
                                worklist.extend_from_slice(&self.graph.block(inner_header).preds);
                            }
                        }
                    }
                }
            }
        }
    }

    fn attach_to_root(&mut self) {
        let root = LoopId::from_index(0);
        let mut order = self.graph.rpo.clone();
        order.extend(
            self.graph
                .blocks()
                .filter(|b| !self.graph.rpo.contains(b))
                .collect::<Vec<_>>(),
        );
        for block in order {
            if self.graph.block(block).loop_id.is_none() {
                self.graph.add_to_loop(block, root);
            }
        }
        for index in 1..self.graph.loops.len() {
            if self.graph.loops[index].outer.is_none() {
                self.graph.loops[index].outer = Some(root);
                self.graph.loops[0].inner.push(LoopId::from_index(index));
            }
        }
    }

    /// Returns the number of pre-headers created.
    fn ensure_preheaders(&mut self) -> usize {
        let mut created = 0;
        for index in 1..self.graph.loops.len() {
            let lp = &self.graph.loops[index];
            if lp.irreducible || lp.try_catch {
                continue;
            }
            let Some(header) = lp.header else {
                continue;
            };
            let entries: Vec<BlockId> = self
                .graph
                .block(header)
                .preds
                .iter()
                .copied()
                .filter(|p| !lp.back_edges.contains(p))
                .collect();
            if entries.is_empty() {
                continue;
            }
            if let [single] = entries.as_slice() {
                let pred = self.graph.block(*single);
                if pred.succs.len() == 1 && !pred.is_start() {
                    self.graph.loops[index].preheader = Some(*single);
                    continue;
                }
            }
            let preheader = self.create_preheader(LoopId::from_index(index), header, &entries);
            self.graph.loops[index].preheader = Some(preheader);
            created += 1;
        }
        created
    }

    fn create_preheader(&mut self, id: LoopId, header: BlockId, entries: &[BlockId]) -> BlockId {
        let graph = &mut *self.graph;
        let preheader = graph.create_block(graph.block(header).pc);
        let header_try = graph.block(header).try_id;
        if header_try.is_some() && entries.iter().all(|&e| graph.block(e).try_id == header_try) {
            graph.block_mut(preheader).try_id = header_try;
            graph.add_block_flags(preheader, BlockFlags::TRY);
        }
        let frequency = entries
            .iter()
            .map(|&e| graph.block(e).frequency)
            .fold(0u32, u32::saturating_add);
        graph.set_frequency(preheader, frequency);

        let entry_slots: Vec<usize> = graph
            .block(header)
            .preds
            .iter()
            .enumerate()
            .filter(|(_, p)| entries.contains(p))
            .map(|(i, _)| i)
            .collect();

        let phis: Vec<_> = graph
            .phis(header)
            .filter(|&p| !graph.inst(p).is_catch_phi())
            .collect();
        for phi in phis {
            let values: Vec<_> = entry_slots
                .iter()
                .map(|&slot| graph.inst(phi).inputs[slot])
                .collect();
            for &slot in entry_slots.iter().rev() {
                graph.remove_input(phi, slot);
            }
            let merged = if values.len() > 1 {
                let ty = graph.inst(phi).ty();
                let pc = graph.inst(phi).pc();
                let merged =
                    graph.create_inst_with(Opcode::Phi, ty, InstData::None, &values);
                graph.inst_mut(merged).pc = pc;
                graph.append_inst(preheader, merged);
                merged
            } else {
                values[0]
            };
            graph.append_input(phi, merged);
        }

        for &slot in entry_slots.iter().rev() {
            graph.block_mut(header).preds.remove(slot);
        }
        for &entry in entries {
            for succ in &mut graph.block_mut(entry).succs {
                if *succ == header {
                    *succ = preheader;
                }
            }
            graph.block_mut(preheader).preds.push(entry);
        }
        graph.block_mut(preheader).succs.push(header);
        graph.block_mut(header).preds.push(preheader);

        // The pre-header takes the header's place in the dominator tree.
        let idom = graph.block(header).dominator;
        if let Some(idom) = idom {
            for d in &mut graph.block_mut(idom).dominated {
                if *d == header {
                    *d = preheader;
                }
            }
        }
        graph.block_mut(preheader).dominator = idom;
        graph.block_mut(preheader).dominated = vec![header];
        graph.block_mut(header).dominator = Some(preheader);

        let owner = graph.loops[id.index()].outer.unwrap_or(LoopId::from_index(0));
        graph.add_to_loop(preheader, owner);
        log::trace!("created pre-header {preheader} for {id}");
        preheader
    }

    fn compute_depth_and_exits(&mut self) {
        let root = LoopId::from_index(0);
        let mut stack = vec![(root, 0u32)];
        while let Some((id, depth)) = stack.pop() {
            self.graph.loops[id.index()].depth = depth;
            for &inner in &self.graph.loops[id.index()].inner {
                stack.push((inner, depth + 1));
            }
        }

        for index in 1..self.graph.loops.len() {
            let id = LoopId::from_index(index);
            let members = self.graph.loop_members(id);
            let has_exit = members.iter().any(|&block| {
                self.graph.block(block).succs.iter().any(|&succ| {
                    self.graph
                        .block(succ)
                        .loop_id
                        .is_none_or(|l| !self.graph.is_inside(l, id))
                })
            });
            if !has_exit {
                self.graph.loops[index].infinite = true;
                self.graph.flags |= GraphFlags::HAS_INFINITE_LOOP;
            }
        }
    }
}

/// Replaces every occurrence of `old` in `list` by `new`, in place.
fn replace_all(list: &mut Vec<BlockId>, old: BlockId, new: &[BlockId]) {
    while let Some(pos) = list.iter().position(|&b| b == old) {
        list.splice(pos..=pos, new.iter().copied().filter(|b| *b != old));
    }
    let mut seen = Vec::with_capacity(list.len());
    list.retain(|b| {
        if seen.contains(b) {
            false
        } else {
            seen.push(*b);
            true
        }
    });
}

impl Graph {
    /// Returns the loop with identifier `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to the current loop table.
    #[must_use]
    pub fn get_loop(&self, id: LoopId) -> &Loop {
        &self.loops[id.index()]
    }

    /// Returns the root loop, once loop analysis has run.
    #[must_use]
    pub fn root_loop(&self) -> Option<LoopId> {
        self.root_loop
    }

    /// Iterates every loop, the root loop first.
    pub fn loops(&self) -> impl Iterator<Item = &Loop> + '_ {
        self.loops.iter()
    }

    /// Returns `true` if `inner` is `outer` or nested in it.
    #[must_use]
    pub fn is_inside(&self, inner: LoopId, outer: LoopId) -> bool {
        let mut current = Some(inner);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.loops[id.index()].outer;
        }
        false
    }

    /// Returns `true` if `block` belongs to `lp` or one of its inner loops.
    #[must_use]
    pub fn is_block_in_loop(&self, block: BlockId, lp: LoopId) -> bool {
        self.block(block)
            .loop_id
            .is_some_and(|owner| self.is_inside(owner, lp))
    }

    /// Returns the outermost non-root loop containing `id`.
    #[must_use]
    pub fn outermost(&self, id: LoopId) -> LoopId {
        let mut current = id;
        while let Some(outer) = self.loops[current.index()].outer {
            if self.loops[outer.index()].is_root() {
                break;
            }
            current = outer;
        }
        current
    }

    /// Returns every block of `lp` including the blocks of its inner loops.
    #[must_use]
    pub fn loop_members(&self, lp: LoopId) -> Vec<BlockId> {
        let mut members = Vec::new();
        let mut stack = vec![lp];
        while let Some(id) = stack.pop() {
            members.extend_from_slice(&self.loops[id.index()].blocks);
            stack.extend_from_slice(&self.loops[id.index()].inner);
        }
        members
    }

    pub(crate) fn add_to_loop(&mut self, block: BlockId, lp: LoopId) {
        self.block_mut(block).loop_id = Some(lp);
        let blocks = &mut self.loops[lp.index()].blocks;
        if !blocks.contains(&block) {
            blocks.push(block);
        }
    }
}
