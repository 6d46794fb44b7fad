//! Structural CFG edits.
//!
//! These primitives keep predecessor/successor lists mutual, keep phi inputs parallel
//! to predecessor lists, and report every change to the analysis table. They never
//! recompute an analysis; edits with a known local effect go through
//! [`Graph::notify_edit`] so dominators and loops can be patched in place.

use crate::{
    analysis::{AnalysisKind, CfgEdit, GraphChange},
    ir::{
        block::{BlockFlags, BlockId},
        graph::Graph,
        instruction::InstId,
    },
};

impl Graph {
    /// Appends the edge `from -> to`.
    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
        self.notify(GraphChange::Cfg);
    }

    /// Appends `succ` as a successor of `block`.
    ///
    /// If the edge already exists and `allow_duplicate_edge` is set, a synthetic empty
    /// block is placed on the second edge so every (pred, succ) pair stays unique. Returns
    /// the block that became the new predecessor of `succ`.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate edge when `allow_duplicate_edge` is not set.
    pub fn add_successor(
        &mut self,
        block: BlockId,
        succ: BlockId,
        allow_duplicate_edge: bool,
    ) -> BlockId {
        if !self.blocks[block].succs.contains(&succ) {
            self.connect(block, succ);
            return block;
        }
        assert!(
            allow_duplicate_edge,
            "duplicate edge {block} -> {succ} is not allowed"
        );
        let synthetic = self.create_block(self.blocks[block].pc);
        self.inherit_try_membership(synthetic, block, succ);
        self.connect(block, synthetic);
        self.connect(synthetic, succ);
        synthetic
    }

    /// Removes the edge `pred -> succ` together with the phi inputs of `succ` for `pred`.
    ///
    /// # Panics
    ///
    /// Panics if the edge does not exist.
    pub fn remove_edge(&mut self, pred: BlockId, succ: BlockId) {
        let Some(succ_index) = self.blocks[pred].succ_index(succ) else {
            panic!("no edge {pred} -> {succ}");
        };
        let Some(pred_index) = self.blocks[succ].pred_index(pred) else {
            panic!("edge {pred} -> {succ} is missing from the predecessor list");
        };
        let phis: Vec<InstId> = self.phis(succ).filter(|&p| !self.insts[p].is_catch_phi()).collect();
        for phi in phis {
            self.remove_input(phi, pred_index);
        }
        self.blocks[pred].succs.remove(succ_index);
        self.blocks[succ].preds.remove(pred_index);
        self.notify(GraphChange::Cfg);
    }

    /// Retargets the edge `block -> old` to `block -> new`, keeping the successor index.
    ///
    /// Phi inputs of `old` for `block` are dropped. `block` is appended to the
    /// predecessors of `new`; the caller appends the matching phi inputs.
    ///
    /// # Panics
    ///
    /// Panics if the edge `block -> old` does not exist.
    pub fn replace_successor(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let Some(succ_index) = self.blocks[block].succ_index(old) else {
            panic!("no edge {block} -> {old}");
        };
        let pred_index = self.blocks[old].pred_index(block);
        if let Some(pred_index) = pred_index {
            let phis: Vec<InstId> = self.phis(old).filter(|&p| !self.insts[p].is_catch_phi()).collect();
            for phi in phis {
                self.remove_input(phi, pred_index);
            }
            self.blocks[old].preds.remove(pred_index);
        }
        self.blocks[block].succs[succ_index] = new;
        self.blocks[new].preds.push(block);
        self.notify(GraphChange::Cfg);
    }

    /// Replaces `old_pred` by `new_pred` in the predecessor list of `block`, keeping its
    /// index and therefore the phi inputs. Successor lists are left to the caller.
    pub(crate) fn replace_predecessor(&mut self, block: BlockId, old_pred: BlockId, new_pred: BlockId) {
        let Some(index) = self.blocks[block].pred_index(old_pred) else {
            panic!("{old_pred} is not a predecessor of {block}");
        };
        self.blocks[block].preds[index] = new_pred;
    }

    /// Places a new empty block on the edge `pred -> succ` and returns it.
    ///
    /// The new block takes `pred`'s slot in the predecessor list of `succ`, so phi inputs
    /// are unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the edge does not exist.
    pub fn insert_block_between(&mut self, pred: BlockId, succ: BlockId) -> BlockId {
        let Some(succ_index) = self.blocks[pred].succ_index(succ) else {
            panic!("no edge {pred} -> {succ}");
        };
        let new_block = self.create_block(self.blocks[succ].pc);
        self.inherit_try_membership(new_block, pred, succ);
        self.blocks[pred].succs[succ_index] = new_block;
        self.replace_predecessor(succ, pred, new_block);
        self.blocks[new_block].preds.push(pred);
        self.blocks[new_block].succs.push(succ);
        self.notify_edit(&CfgEdit::BlockInsertedBetween {
            pred,
            succ,
            new_block,
        });
        new_block
    }

    /// Moves every instruction after `inst` and all successor edges of its block into a
    /// new block, and returns the new block.
    ///
    /// With `make_edge`, the original block falls through to the new block. Successor phi
    /// inputs keep their index: the new block takes the original's predecessor slot.
    ///
    /// # Panics
    ///
    /// Panics if `inst` is a phi, is not linked, or lives in the start or end block.
    pub fn split_block_after(&mut self, inst: InstId, make_edge: bool) -> BlockId {
        let Some(block) = self.insts[inst].block else {
            panic!("cannot split after unlinked {inst}");
        };
        assert!(!self.insts[inst].is_phi(), "cannot split after phi {inst}");
        assert!(
            !self.blocks[block].is_start() && !self.blocks[block].is_end(),
            "cannot split the start or end block ({block})"
        );

        let tail_pc = self.insts[inst]
            .next
            .map_or(self.insts[inst].pc, |next| self.insts[next].pc);
        let new_block = self.create_block(tail_pc);
        {
            let src = &self.blocks[block];
            let (try_id, frequency, loop_id) = (src.try_id, src.frequency, src.loop_id);
            let moved = src.flags & (BlockFlags::TRY | BlockFlags::CATCH | BlockFlags::TRY_END);
            let dst = &mut self.blocks[new_block];
            dst.try_id = try_id;
            dst.frequency = frequency;
            dst.loop_id = loop_id;
            dst.flags |= moved;
        }
        self.blocks[block].flags.remove(BlockFlags::TRY_END);
        self.retarget_try_end(block, new_block);

        let mut cursor = self.insts[inst].next;
        while let Some(current) = cursor {
            cursor = self.insts[current].next;
            self.unlink_inst(current);
            self.append_inst(new_block, current);
        }

        let succs = std::mem::take(&mut self.blocks[block].succs);
        for &succ in &succs {
            self.replace_predecessor(succ, block, new_block);
        }
        self.blocks[new_block].succs = succs;

        if make_edge {
            self.blocks[block].succs.push(new_block);
            self.blocks[new_block].preds.push(block);
            self.notify_edit(&CfgEdit::BlockSplit { block, new_block });
        } else {
            self.notify(GraphChange::Cfg);
        }
        new_block
    }

    /// Returns `true` if `block` may be bypassed by [`Graph::remove_empty_block`].
    ///
    /// The block must have no non-phi instructions, exactly one successor, and not be the
    /// start or end block. Its phis may only feed phis of the successor unless the
    /// successor has no other predecessor.
    #[must_use]
    pub fn can_remove_empty_block(&self, block: BlockId) -> bool {
        let b = &self.blocks[block];
        if !b.is_empty() || b.succs.len() != 1 || b.is_start() || b.is_end() {
            return false;
        }
        let succ = b.succs[0];
        if succ == block {
            return false;
        }
        if self.blocks[succ].preds.len() == 1 {
            return true;
        }
        self.phis(block).all(|phi| {
            self.insts[phi].users.iter().all(|user| {
                let user = &self.insts[user.inst];
                user.is_phi() && !user.is_catch_phi() && user.block == Some(succ)
            })
        })
    }

    /// Bypasses an empty single-successor block and deletes it.
    ///
    /// Every predecessor is re-wired to the successor: the first one takes the removed
    /// block's predecessor slot, the others are appended. Each successor phi receives, per
    /// arriving predecessor, the removed block's phi input for that predecessor when the
    /// value came from a phi of the removed block, or the value itself otherwise. If the
    /// successor had no other predecessor, the removed block's phis move to it.
    ///
    /// Loop membership, back-edges and pre-headers are fixed in place unless
    /// `irreducible_loop_hint` is set or the owning loop is irreducible, in which case loop
    /// analysis is invalidated. Returns `true` if loop analysis is still valid.
    ///
    /// # Panics
    ///
    /// Panics if [`Graph::can_remove_empty_block`] does not hold or a predecessor already
    /// links to the successor.
    pub fn remove_empty_block(&mut self, block: BlockId, irreducible_loop_hint: bool) -> bool {
        assert!(
            self.can_remove_empty_block(block),
            "{block} is not a removable empty block"
        );
        let succ = self.blocks[block].succs[0];
        let preds = self.blocks[block].preds.clone();
        for &pred in &preds {
            assert!(
                !self.blocks[pred].succs.contains(&succ),
                "{pred} already links to {succ}; removing {block} would duplicate the edge"
            );
        }
        let Some(slot) = self.blocks[succ].pred_index(block) else {
            panic!("{block} is missing from the predecessors of {succ}");
        };
        let succ_had_single_pred = self.blocks[succ].preds.len() == 1;

        // Values each successor phi receives from every re-wired predecessor.
        let succ_phis: Vec<InstId> = self
            .phis(succ)
            .filter(|&p| !self.insts[p].is_catch_phi())
            .collect();
        let incoming: Vec<Vec<InstId>> = succ_phis
            .iter()
            .map(|&phi| {
                let value = self.insts[phi].inputs[slot];
                let from_block = self.insts[value].is_phi() && self.insts[value].block == Some(block);
                (0..preds.len())
                    .map(|i| if from_block { self.insts[value].inputs[i] } else { value })
                    .collect()
            })
            .collect();

        if preds.is_empty() {
            for &phi in &succ_phis {
                self.remove_input(phi, slot);
            }
            self.blocks[succ].preds.remove(slot);
        } else {
            self.blocks[succ].preds[slot] = preds[0];
            self.blocks[succ].preds.extend_from_slice(&preds[1..]);
            for (&phi, values) in succ_phis.iter().zip(&incoming) {
                self.set_input(phi, slot, values[0]);
                for &value in &values[1..] {
                    self.append_input(phi, value);
                }
            }
        }
        for &pred in &preds {
            for s in &mut self.blocks[pred].succs {
                if *s == block {
                    *s = succ;
                }
            }
        }

        let block_phis: Vec<InstId> = self.phis(block).collect();
        if succ_had_single_pred {
            for phi in block_phis {
                self.unlink_inst(phi);
                self.append_inst(succ, phi);
            }
        } else {
            for phi in block_phis {
                self.remove_inst(phi);
            }
        }

        if irreducible_loop_hint {
            self.invalidate(AnalysisKind::Loops);
        }
        self.notify_edit(&CfgEdit::EmptyBlockRemoved { block, succ, preds });
        self.retarget_try_end(block, succ);
        self.tombstone_block(block);
        self.is_valid(AnalysisKind::Loops)
    }

    /// Merges the unique successor of `block` into it.
    ///
    /// The successor's instructions, successor edges and try/catch flags move to `block`;
    /// the successor leaves its loop and is deleted.
    ///
    /// # Panics
    ///
    /// Panics if `block` does not have exactly one successor, or that successor has other
    /// predecessors, has phis, or is the end block.
    pub fn join_successor_block(&mut self, block: BlockId) {
        assert_eq!(
            self.blocks[block].succs.len(),
            1,
            "{block} must have exactly one successor to be joined"
        );
        let succ = self.blocks[block].succs[0];
        assert!(succ != block, "cannot join {block} with itself");
        assert_eq!(
            self.blocks[succ].preds.as_slice(),
            &[block],
            "{succ} must have {block} as its only predecessor"
        );
        assert!(!self.blocks[succ].has_phis(), "cannot join {succ}: it has phis");
        assert!(!self.blocks[succ].is_end(), "cannot join the end block");

        let moved: Vec<InstId> = self.insts(succ).collect();
        for inst in moved {
            self.unlink_inst(inst);
            self.append_inst(block, inst);
        }

        let succs = std::mem::take(&mut self.blocks[succ].succs);
        for &next in &succs {
            self.replace_predecessor(next, succ, block);
        }
        self.blocks[block].succs = succs;
        self.blocks[succ].preds.clear();

        let inherited = self.blocks[succ].flags
            & (BlockFlags::TRY | BlockFlags::TRY_END | BlockFlags::CATCH);
        self.blocks[block].flags |= inherited;
        if self.blocks[block].try_id.is_none() {
            self.blocks[block].try_id = self.blocks[succ].try_id;
        }

        self.notify_edit(&CfgEdit::SuccessorJoined { block, succ });
        self.retarget_try_end(succ, block);
        self.tombstone_block(succ);
    }

    /// Disconnects `block` from the CFG and deletes it with its instructions.
    ///
    /// Predecessors keep their terminators; a conditional branch losing an edge must be
    /// rewritten by the caller.
    pub fn remove_block(&mut self, block: BlockId) {
        self.remove_blocks(&[block]);
    }

    /// Deletes every block not reachable from the start block. Returns how many were
    /// removed.
    pub fn remove_unreachable_blocks(&mut self) -> usize {
        let mut reachable = self.new_marker();
        let mut stack = vec![self.start];
        reachable.mark_block(self.start);
        while let Some(block) = stack.pop() {
            for &succ in &self.blocks[block].succs {
                if reachable.mark_block(succ) {
                    stack.push(succ);
                }
            }
        }
        let dead: Vec<BlockId> = self
            .blocks()
            .filter(|&b| !reachable.is_block_marked(b))
            .collect();
        drop(reachable);
        if !dead.is_empty() {
            log::trace!("removing unreachable blocks {dead:?}");
            self.remove_blocks(&dead);
        }
        dead.len()
    }

    /// Deletes a set of blocks whose values are only used inside the set or by phis
    /// across the removed edges.
    pub(crate) fn remove_blocks(&mut self, dead: &[BlockId]) {
        for &block in dead {
            for succ in self.blocks[block].succs.clone() {
                self.remove_edge(block, succ);
            }
            for pred in self.blocks[block].preds.clone() {
                self.remove_edge(pred, block);
            }
        }

        let insts: Vec<InstId> = dead
            .iter()
            .flat_map(|&b| self.all_insts(b).collect::<Vec<_>>())
            .collect();
        for &inst in &insts {
            self.remove_all_inputs(inst);
        }
        for &inst in &insts {
            self.drop_thrower(inst);
            self.remove_inst(inst);
        }

        for &block in dead {
            for region in &mut self.try_regions {
                region.handlers.retain(|&h| h != block);
                if region.end == Some(block) {
                    region.end = None;
                }
            }
            if self.end == Some(block) {
                self.end = None;
            }
            self.tombstone_block(block);
        }
        self.notify(GraphChange::Cfg);
    }

    /// Removes the catch-phi inputs attributed to `thrower`.
    pub(crate) fn drop_thrower(&mut self, thrower: InstId) {
        if !self.insts[thrower].can_throw() {
            return;
        }
        let Some(try_id) = self.insts[thrower].block.and_then(|b| self.blocks[b].try_id) else {
            return;
        };
        let handlers = self
            .try_region(try_id)
            .map(|r| r.handlers.clone())
            .unwrap_or_default();
        for handler in handlers {
            if !self.blocks.contains(handler) {
                continue;
            }
            let phis: Vec<InstId> = self
                .phis(handler)
                .filter(|&p| self.insts[p].is_catch_phi())
                .collect();
            for phi in phis {
                while let Some(index) = self.insts[phi].throwers.iter().position(|&t| t == thrower) {
                    self.remove_input(phi, index);
                }
            }
        }
    }

    fn tombstone_block(&mut self, block: BlockId) {
        if let Some(dominator) = self.blocks[block].dominator {
            if let Some(parent) = self.blocks.get_mut(dominator) {
                parent.dominated.retain(|&d| d != block);
            }
        }
        self.blocks.remove(block);
    }

    fn retarget_try_end(&mut self, from: BlockId, to: BlockId) {
        for region in &mut self.try_regions {
            if region.end == Some(from) {
                region.end = Some(to);
            }
        }
    }

    /// Gives a block placed on the edge `pred -> succ` the try membership both ends share.
    fn inherit_try_membership(&mut self, block: BlockId, pred: BlockId, succ: BlockId) {
        let (p, s) = (&self.blocks[pred], &self.blocks[succ]);
        if p.try_id.is_some() && p.try_id == s.try_id && s.is_in_try() {
            let try_id = p.try_id;
            let b = &mut self.blocks[block];
            b.try_id = try_id;
            b.flags |= BlockFlags::TRY;
        }
        if self.blocks[pred].flags.contains(BlockFlags::CATCH)
            && self.blocks[succ].flags.contains(BlockFlags::CATCH)
        {
            self.blocks[block].flags |= BlockFlags::CATCH;
        }
        let frequency = self.blocks[pred].frequency.min(self.blocks[succ].frequency);
        self.blocks[block].frequency = frequency;
    }
}
