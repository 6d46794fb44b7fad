//! Analyses over the IR and the table that keeps them coherent with graph edits.
//!
//! Every analysis result cached in a [`Graph`] is tracked by an [`AnalysisKind`] bit in
//! the graph's validity set. Structural primitives report what they changed through
//! [`Graph::notify`] or [`Graph::notify_edit`]; the table fans an invalidation out to the
//! analyses that depend on the changed one, so a pass never has to remember which caches
//! a given edit touches.
//!
//! # Dependencies
//!
//! | Analysis        | Requires                  | Invalidates on change  |
//! |-----------------|---------------------------|------------------------|
//! | `Rpo`           | -                         | `LinearOrder`          |
//! | `Dominators`    | -                         | `Loops`                |
//! | `Loops`         | `Rpo`, `Dominators`       | `LinearOrder`          |
//! | `LinearOrder`   | `Rpo`, `Loops`            | `Liveness`             |
//! | `Liveness`      | `LinearOrder`, `Loops`    | -                      |
//!
//! Passes read analyses through [`Graph::require`], which fails with
//! [`crate::Error::StaleAnalysis`] instead of silently handing out stale data, and bring
//! them up to date with [`Graph::ensure`].
//!
//! # Incremental updates
//!
//! Some edits have a known local fix-up. [`Analysis::try_incremental_update`] applies it
//! and reports whether the analysis is still valid; [`Graph::notify_edit`] tries every
//! analysis that supports it and invalidates the rest.

mod dominators;
mod linear_order;
pub mod liveness;
mod loops;

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::{
    ir::{BlockId, Graph},
    Error, Result,
};

pub use dominators::DominatorsAnalysis;
pub(crate) use linear_order::assign_needs_jump;
pub use linear_order::{LinearOrderAnalysis, LinearOrderMode};
pub use liveness::{
    IntervalId, IntervalOwner, LifeInterval, LifeNumber, LiveRange, Liveness, LivenessAnalyzer,
    LIFE_NUMBER_GAP,
};
pub use loops::{Loop, LoopAnalysis, LoopId};

/// The analyses whose results are cached in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum AnalysisKind {
    /// Reverse postorder of the reachable blocks.
    Rpo,
    /// Immediate dominators written into every block.
    Dominators,
    /// Loop tree, loop membership and pre-headers.
    Loops,
    /// Block emission order and needs-jump flags.
    LinearOrder,
    /// Life numbers and intervals; the result is owned by a [`Liveness`] value.
    Liveness,
}

impl AnalysisKind {
    /// Analyses that become stale when this one changes.
    #[must_use]
    pub const fn dependents(self) -> &'static [AnalysisKind] {
        match self {
            AnalysisKind::Rpo => &[AnalysisKind::LinearOrder],
            AnalysisKind::Dominators => &[AnalysisKind::Loops],
            AnalysisKind::Loops => &[AnalysisKind::LinearOrder],
            AnalysisKind::LinearOrder => &[AnalysisKind::Liveness],
            AnalysisKind::Liveness => &[],
        }
    }

    /// Analyses that must be valid before this one is computed.
    #[must_use]
    pub const fn prerequisites(self) -> &'static [AnalysisKind] {
        match self {
            AnalysisKind::Rpo | AnalysisKind::Dominators => &[],
            AnalysisKind::Loops => &[AnalysisKind::Rpo, AnalysisKind::Dominators],
            AnalysisKind::LinearOrder => &[AnalysisKind::Rpo, AnalysisKind::Loops],
            AnalysisKind::Liveness => &[AnalysisKind::LinearOrder, AnalysisKind::Loops],
        }
    }

    const fn bit(self) -> AnalysisSet {
        match self {
            AnalysisKind::Rpo => AnalysisSet::RPO,
            AnalysisKind::Dominators => AnalysisSet::DOMINATORS,
            AnalysisKind::Loops => AnalysisSet::LOOPS,
            AnalysisKind::LinearOrder => AnalysisSet::LINEAR_ORDER,
            AnalysisKind::Liveness => AnalysisSet::LIVENESS,
        }
    }
}

bitflags! {
    /// A set of [`AnalysisKind`]s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AnalysisSet: u8 {
        /// [`AnalysisKind::Rpo`]
        const RPO = 1 << 0;
        /// [`AnalysisKind::Dominators`]
        const DOMINATORS = 1 << 1;
        /// [`AnalysisKind::Loops`]
        const LOOPS = 1 << 2;
        /// [`AnalysisKind::LinearOrder`]
        const LINEAR_ORDER = 1 << 3;
        /// [`AnalysisKind::Liveness`]
        const LIVENESS = 1 << 4;
    }
}

/// Coarse description of a graph mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphChange {
    /// Blocks or edges changed.
    Cfg,
    /// Instructions were added, moved or removed without touching edges.
    Instructions,
}

/// A structural edit with a known local effect on the analyses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgEdit {
    /// `new_block` took the tail and the successors of `block`; `block` now falls
    /// through to it.
    BlockSplit {
        /// The block that was split.
        block: BlockId,
        /// The block holding the moved tail.
        new_block: BlockId,
    },
    /// `new_block` was placed on the edge `pred -> succ`.
    BlockInsertedBetween {
        /// Source of the original edge.
        pred: BlockId,
        /// Target of the original edge.
        succ: BlockId,
        /// The inserted block.
        new_block: BlockId,
    },
    /// The empty `block` was bypassed: its former `preds` now link to `succ`.
    ///
    /// Reported before the block is tombstoned.
    EmptyBlockRemoved {
        /// The removed block.
        block: BlockId,
        /// Its only successor.
        succ: BlockId,
        /// Its predecessors before the removal.
        preds: Vec<BlockId>,
    },
    /// The single-predecessor `succ` was merged into `block`.
    ///
    /// Reported before `succ` is tombstoned.
    SuccessorJoined {
        /// The surviving block.
        block: BlockId,
        /// The merged successor.
        succ: BlockId,
    },
}

/// A cached analysis that can be rebuilt from scratch and may support local updates.
pub trait Analysis {
    /// The validity bit this analysis owns.
    const KIND: AnalysisKind;

    /// Patches the cached result after `edit`.
    ///
    /// Returns `true` if the result is still valid. Returns `false` without touching the
    /// graph when the analysis is not currently valid or the edit has no local fix-up.
    fn try_incremental_update(graph: &mut Graph, edit: &CfgEdit) -> bool;

    /// Recomputes the result from scratch. Prerequisites must already be valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the analysis cannot be computed for the current graph.
    fn force_recompute(graph: &mut Graph) -> Result<()>;
}

/// Reverse postorder of the reachable blocks, cached in the graph.
pub struct RpoAnalysis;

impl Analysis for RpoAnalysis {
    const KIND: AnalysisKind = AnalysisKind::Rpo;

    fn try_incremental_update(_graph: &mut Graph, _edit: &CfgEdit) -> bool {
        false
    }

    fn force_recompute(graph: &mut Graph) -> Result<()> {
        let order = crate::utils::graph::algorithms::reverse_postorder(
            &*graph,
            Graph::node(graph.start),
        );
        graph.rpo = order
            .into_iter()
            .map(|node| graph.block_of_node(node))
            .collect();
        Ok(())
    }
}

impl Graph {
    /// Returns `true` if the cached result of `kind` matches the current graph.
    #[must_use]
    pub fn is_valid(&self, kind: AnalysisKind) -> bool {
        self.valid.contains(kind.bit())
    }

    /// Returns the set of currently valid analyses.
    #[must_use]
    pub fn valid_analyses(&self) -> AnalysisSet {
        self.valid
    }

    /// Fails with [`Error::StaleAnalysis`] unless `kind` is valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleAnalysis`] if the analysis must be recomputed first.
    pub fn require(&self, kind: AnalysisKind) -> Result<()> {
        if self.is_valid(kind) {
            Ok(())
        } else {
            Err(Error::StaleAnalysis(kind))
        }
    }

    /// Recomputes `kind` and its prerequisites if they are stale.
    ///
    /// Liveness results are not cached in the graph: ensuring
    /// [`AnalysisKind::Liveness`] brings its prerequisites up to date and then behaves
    /// like [`Graph::require`].
    ///
    /// # Errors
    ///
    /// Propagates failures of the recomputed analyses.
    pub fn ensure(&mut self, kind: AnalysisKind) -> Result<()> {
        for &prerequisite in kind.prerequisites() {
            self.ensure(prerequisite)?;
        }
        if self.is_valid(kind) {
            return Ok(());
        }
        match kind {
            AnalysisKind::Liveness => self.require(kind),
            _ => self.force_recompute(kind),
        }
    }

    /// Recomputes `kind` from scratch even if it is valid, then invalidates its dependents.
    ///
    /// # Errors
    ///
    /// Propagates failures of the recomputed analysis, or [`Error::Precondition`] for
    /// [`AnalysisKind::Liveness`], which is computed by [`LivenessAnalyzer`].
    pub fn force_recompute(&mut self, kind: AnalysisKind) -> Result<()> {
        self.recompute_preserving(kind, AnalysisSet::empty())
    }

    /// Recomputes `kind` from scratch and invalidates its dependents, except those in
    /// `keep`.
    ///
    /// Used by passes that maintained a dependent analysis by hand across their edits.
    ///
    /// # Errors
    ///
    /// Same as [`Graph::force_recompute`].
    pub fn recompute_preserving(&mut self, kind: AnalysisKind, keep: AnalysisSet) -> Result<()> {
        for &prerequisite in kind.prerequisites() {
            self.ensure(prerequisite)?;
        }
        log::debug!("recomputing {kind}");
        match kind {
            AnalysisKind::Rpo => RpoAnalysis::force_recompute(self)?,
            AnalysisKind::Dominators => DominatorsAnalysis::force_recompute(self)?,
            AnalysisKind::Loops => LoopAnalysis::force_recompute(self)?,
            AnalysisKind::LinearOrder => LinearOrderAnalysis::force_recompute(self)?,
            AnalysisKind::Liveness => {
                return Err(Error::Precondition(
                    "liveness is computed by LivenessAnalyzer".to_string(),
                ))
            }
        }
        for &dependent in kind.dependents() {
            self.invalidate_preserving(dependent, keep);
        }
        self.valid |= kind.bit();
        Ok(())
    }

    /// Marks `kind` and everything depending on it as stale.
    pub fn invalidate(&mut self, kind: AnalysisKind) {
        self.invalidate_preserving(kind, AnalysisSet::empty());
    }

    /// Marks `kind` and its dependents as stale, except those in `keep`.
    ///
    /// Used by edits that fix some dependent analyses in place.
    pub fn invalidate_preserving(&mut self, kind: AnalysisKind, keep: AnalysisSet) {
        let mut stack = vec![kind];
        while let Some(kind) = stack.pop() {
            if keep.contains(kind.bit()) {
                continue;
            }
            self.valid.remove(kind.bit());
            stack.extend_from_slice(kind.dependents());
        }
    }

    /// Records a mutation and invalidates the analyses it affects.
    pub fn notify(&mut self, change: GraphChange) {
        self.epoch += 1;
        match change {
            GraphChange::Cfg => {
                self.invalidate(AnalysisKind::Rpo);
                self.invalidate(AnalysisKind::Dominators);
            }
            GraphChange::Instructions => self.invalidate(AnalysisKind::Liveness),
        }
    }

    /// Records a structural edit, patching the analyses that support it.
    ///
    /// Dominators and loops are updated in place when possible; the reverse postorder
    /// and everything downstream of it are always invalidated.
    pub fn notify_edit(&mut self, edit: &CfgEdit) {
        self.epoch += 1;
        let dominators_kept = DominatorsAnalysis::try_incremental_update(self, edit);
        let loops_kept = LoopAnalysis::try_incremental_update(self, edit);
        log::trace!("{edit:?}: dominators kept {dominators_kept}, loops kept {loops_kept}");

        self.invalidate(AnalysisKind::Rpo);
        let keep = if loops_kept {
            AnalysisSet::LOOPS
        } else {
            AnalysisSet::empty()
        };
        if !dominators_kept {
            self.invalidate_preserving(AnalysisKind::Dominators, keep);
        }
        if !loops_kept {
            self.invalidate(AnalysisKind::Loops);
        }
    }

    /// Marks an analysis valid after a pass has maintained it by hand.
    pub(crate) fn mark_valid(&mut self, kind: AnalysisKind) {
        self.valid |= kind.bit();
    }

    /// Returns the cached reverse postorder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleAnalysis`] if the order is stale.
    pub fn rpo(&self) -> Result<&[BlockId]> {
        self.require(AnalysisKind::Rpo)?;
        Ok(&self.rpo)
    }

    /// Returns the cached linear order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleAnalysis`] if the order is stale.
    pub fn linear_order(&self) -> Result<&[BlockId]> {
        self.require(AnalysisKind::LinearOrder)?;
        Ok(&self.linear_order)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_invalidation_fans_out() {
        let mut graph = Graph::new();
        graph.valid = AnalysisSet::all();
        graph.invalidate(AnalysisKind::Dominators);
        assert!(graph.is_valid(AnalysisKind::Rpo));
        assert!(!graph.is_valid(AnalysisKind::Loops));
        assert!(!graph.is_valid(AnalysisKind::LinearOrder));
        assert!(!graph.is_valid(AnalysisKind::Liveness));
    }

    #[test]
    fn test_invalidate_preserving_stops_at_kept() {
        let mut graph = Graph::new();
        graph.valid = AnalysisSet::all();
        graph.invalidate_preserving(AnalysisKind::Dominators, AnalysisSet::LOOPS);
        assert!(!graph.is_valid(AnalysisKind::Dominators));
        assert!(graph.is_valid(AnalysisKind::Loops));
        assert!(graph.is_valid(AnalysisKind::LinearOrder));
    }

    #[test]
    fn test_recompute_preserving_keeps_dependent() -> Result<()> {
        let mut graph = Graph::new();
        graph.ensure(AnalysisKind::LinearOrder)?;
        graph.recompute_preserving(AnalysisKind::Dominators, AnalysisSet::LOOPS)?;
        assert!(graph.is_valid(AnalysisKind::Dominators));
        assert!(graph.is_valid(AnalysisKind::Loops));

        graph.force_recompute(AnalysisKind::Dominators)?;
        assert!(!graph.is_valid(AnalysisKind::Loops));
        assert!(!graph.is_valid(AnalysisKind::LinearOrder));
        Ok(())
    }

    #[test]
    fn test_instruction_change_only_touches_liveness() {
        let mut graph = Graph::new();
        graph.valid = AnalysisSet::all();
        let epoch = graph.epoch();
        graph.notify(GraphChange::Instructions);
        assert_eq!(graph.valid, AnalysisSet::all() - AnalysisSet::LIVENESS);
        assert_eq!(graph.epoch(), epoch + 1);
    }

    #[test]
    fn test_require_reports_kind() {
        let graph = Graph::new();
        match graph.require(AnalysisKind::Loops) {
            Err(Error::StaleAnalysis(kind)) => assert_eq!(kind, AnalysisKind::Loops),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ensure_builds_prerequisites() -> Result<()> {
        let mut graph = Graph::new();
        graph.ensure(AnalysisKind::LinearOrder)?;
        for kind in AnalysisKind::iter().filter(|k| *k != AnalysisKind::Liveness) {
            assert!(graph.is_valid(kind), "{kind} should be valid");
        }
        assert_eq!(graph.linear_order()?, &[graph.start_block()]);
        Ok(())
    }

    #[test]
    fn test_dependents_are_acyclic() {
        for kind in AnalysisKind::iter() {
            let mut seen = Vec::new();
            let mut stack = vec![kind];
            while let Some(k) = stack.pop() {
                for &d in k.dependents() {
                    assert_ne!(d, kind, "cycle through {kind}");
                    if !seen.contains(&d) {
                        seen.push(d);
                        stack.push(d);
                    }
                }
            }
        }
    }
}
