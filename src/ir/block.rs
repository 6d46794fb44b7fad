//! Basic blocks.

use bitflags::bitflags;

use crate::{
    analysis::LoopId,
    ir::{arena::define_handle, InstId},
};

define_handle!(
    /// Handle of a basic block in a [`crate::ir::Graph`].
    BlockId,
    "bb"
);

bitflags! {
    /// Classification of a basic block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u16 {
        /// The unique entry block holding constants and parameters.
        const START = 1 << 0;
        /// The unique exit block; all returns and throws lead here.
        const END = 1 << 1;
        /// Holds the `Try` instruction opening a try region.
        const TRY_BEGIN = 1 << 2;
        /// Closes a try region.
        const TRY_END = 1 << 3;
        /// Inside a try region.
        const TRY = 1 << 4;
        /// Entry of an exception handler.
        const CATCH_BEGIN = 1 << 5;
        /// Inside an exception handler.
        const CATCH = 1 << 6;
        /// Its fall-through successor is not next in the linear order.
        const NEEDS_JUMP = 1 << 7;
    }
}

/// A basic block: a phi sub-list, an instruction sub-list, and CFG edges.
///
/// Edge lists are mutual: `a.succs[i] == b` implies `b.preds` contains `a`, and the
/// position of `a` in `b.preds` is the input index used by every phi of `b` for values
/// arriving from `a`. A block with two successors branches to `succs[0]` when its
/// condition holds and to `succs[1]` otherwise.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) preds: Vec<BlockId>,
    pub(crate) succs: Vec<BlockId>,
    pub(crate) first_phi: Option<InstId>,
    pub(crate) last_phi: Option<InstId>,
    pub(crate) first_inst: Option<InstId>,
    pub(crate) last_inst: Option<InstId>,
    pub(crate) dominator: Option<BlockId>,
    pub(crate) dominated: Vec<BlockId>,
    pub(crate) loop_id: Option<LoopId>,
    pub(crate) try_id: Option<u32>,
    pub(crate) pc: u32,
    pub(crate) frequency: u32,
    pub(crate) flags: BlockFlags,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, pc: u32) -> Self {
        Self {
            id,
            preds: Vec::new(),
            succs: Vec::new(),
            first_phi: None,
            last_phi: None,
            first_inst: None,
            last_inst: None,
            dominator: None,
            dominated: Vec::new(),
            loop_id: None,
            try_id: None,
            pc,
            frequency: 0,
            flags: BlockFlags::empty(),
        }
    }

    /// Returns the handle of this block.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the predecessors in phi-input order.
    #[must_use]
    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    /// Returns the successors; for a conditional block `(taken, not taken)`.
    #[must_use]
    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    /// Returns the successor at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn succ(&self, index: usize) -> BlockId {
        self.succs[index]
    }

    /// Returns the predecessor at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn pred(&self, index: usize) -> BlockId {
        self.preds[index]
    }

    /// Returns the index of `pred` among the predecessors.
    #[must_use]
    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&p| p == pred)
    }

    /// Returns the index of `succ` among the successors.
    #[must_use]
    pub fn succ_index(&self, succ: BlockId) -> Option<usize> {
        self.succs.iter().position(|&s| s == succ)
    }

    /// Returns the first phi.
    #[must_use]
    pub fn first_phi(&self) -> Option<InstId> {
        self.first_phi
    }

    /// Returns the last phi.
    #[must_use]
    pub fn last_phi(&self) -> Option<InstId> {
        self.last_phi
    }

    /// Returns the first non-phi instruction.
    #[must_use]
    pub fn first_inst(&self) -> Option<InstId> {
        self.first_inst
    }

    /// Returns the last non-phi instruction.
    #[must_use]
    pub fn last_inst(&self) -> Option<InstId> {
        self.last_inst
    }

    /// Returns `true` if the block holds no non-phi instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first_inst.is_none()
    }

    /// Returns `true` if the block holds at least one phi.
    #[must_use]
    pub fn has_phis(&self) -> bool {
        self.first_phi.is_some()
    }

    /// Returns the immediate dominator as of the last dominator computation.
    #[must_use]
    pub fn dominator(&self) -> Option<BlockId> {
        self.dominator
    }

    /// Returns the blocks immediately dominated by this one.
    #[must_use]
    pub fn dominated(&self) -> &[BlockId] {
        &self.dominated
    }

    /// Returns the innermost loop containing this block.
    #[must_use]
    pub fn loop_id(&self) -> Option<LoopId> {
        self.loop_id
    }

    /// Returns the try region this block belongs to.
    #[must_use]
    pub fn try_id(&self) -> Option<u32> {
        self.try_id
    }

    /// Returns the guest program counter of the first instruction.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Returns the profile weight, 0 when unknown.
    #[must_use]
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Returns the classification flags.
    #[must_use]
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Returns `true` for the start block.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.flags.contains(BlockFlags::START)
    }

    /// Returns `true` for the end block.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.flags.contains(BlockFlags::END)
    }

    /// Returns `true` for the entry block of an exception handler.
    #[must_use]
    pub fn is_catch_begin(&self) -> bool {
        self.flags.contains(BlockFlags::CATCH_BEGIN)
    }

    /// Returns `true` for blocks opening or closing a try region.
    #[must_use]
    pub fn is_try_boundary(&self) -> bool {
        self.flags
            .intersects(BlockFlags::TRY_BEGIN | BlockFlags::TRY_END)
    }

    /// Returns `true` for blocks inside a try region, boundaries included.
    #[must_use]
    pub fn is_in_try(&self) -> bool {
        self.flags
            .intersects(BlockFlags::TRY | BlockFlags::TRY_BEGIN | BlockFlags::TRY_END)
    }

    /// Returns `true` if the block must end with an explicit jump.
    #[must_use]
    pub fn needs_jump(&self) -> bool {
        self.flags.contains(BlockFlags::NEEDS_JUMP)
    }
}
