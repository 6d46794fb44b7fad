//! Dominator analysis over the IR.
//!
//! The tree is computed by the generic Cooper-Harvey-Kennedy implementation in
//! [`crate::utils::graph::algorithms`] and written back into every block as an immediate
//! dominator and a list of dominated children. Queries walk those links.

use crate::{
    analysis::{Analysis, AnalysisKind, CfgEdit},
    ir::{BlockId, Graph},
    utils::graph::algorithms::compute_dominators,
    Result,
};

/// Dominator tree stored in the blocks of a [`Graph`].
pub struct DominatorsAnalysis;

impl Analysis for DominatorsAnalysis {
    const KIND: AnalysisKind = AnalysisKind::Dominators;

    fn try_incremental_update(graph: &mut Graph, edit: &CfgEdit) -> bool {
        if !graph.is_valid(Self::KIND) {
            return false;
        }
        match edit {
            CfgEdit::BlockSplit { block, new_block } => {
                // The tail inherits every child of the head.
                let children = std::mem::take(&mut graph.block_mut(*block).dominated);
                for &child in &children {
                    graph.block_mut(child).dominator = Some(*new_block);
                }
                let tail = graph.block_mut(*new_block);
                tail.dominated = children;
                tail.dominator = Some(*block);
                graph.block_mut(*block).dominated.push(*new_block);
                true
            }
            CfgEdit::BlockInsertedBetween {
                pred,
                succ,
                new_block,
            } => {
                graph.block_mut(*new_block).dominator = Some(*pred);
                graph.block_mut(*pred).dominated.push(*new_block);
                if graph.block(*succ).preds.len() == 1 && graph.block(*succ).dominator == Some(*pred)
                {
                    graph.block_mut(*pred).dominated.retain(|&d| d != *succ);
                    graph.block_mut(*new_block).dominated.push(*succ);
                    graph.block_mut(*succ).dominator = Some(*new_block);
                }
                true
            }
            CfgEdit::EmptyBlockRemoved { block, succ, .. } => {
                let parent = graph.block(*block).dominator;
                if graph.block(*succ).dominator == Some(*block) {
                    graph.block_mut(*succ).dominator = parent;
                    if let Some(parent) = parent {
                        graph.block_mut(parent).dominated.push(*succ);
                    }
                }
                if let Some(parent) = parent {
                    graph.block_mut(parent).dominated.retain(|&d| d != *block);
                }
                graph.block_mut(*block).dominated.clear();
                graph.block_mut(*block).dominator = None;
                true
            }
            CfgEdit::SuccessorJoined { block, succ } => {
                let children = std::mem::take(&mut graph.block_mut(*succ).dominated);
                for &child in &children {
                    graph.block_mut(child).dominator = Some(*block);
                }
                let head = graph.block_mut(*block);
                head.dominated.retain(|&d| d != *succ);
                head.dominated.extend(children);
                graph.block_mut(*succ).dominator = None;
                true
            }
        }
    }

    fn force_recompute(graph: &mut Graph) -> Result<()> {
        let tree = compute_dominators(&*graph, Graph::node(graph.start_block()));
        let blocks: Vec<BlockId> = graph.blocks().collect();
        for &block in &blocks {
            let b = graph.block_mut(block);
            b.dominator = None;
            b.dominated.clear();
        }
        for &block in &blocks {
            if let Some(idom) = tree.immediate_dominator(Graph::node(block)) {
                let idom = graph.block_of_node(idom);
                graph.block_mut(block).dominator = Some(idom);
                graph.block_mut(idom).dominated.push(block);
            }
        }
        Ok(())
    }
}

impl Graph {
    /// Returns `true` if `a` dominates `b`. Every block dominates itself.
    ///
    /// Reads the dominator links written by the last dominator computation; the result is
    /// meaningful only while [`AnalysisKind::Dominators`] is valid.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        while let Some(block) = current {
            if block == a {
                return true;
            }
            current = self.block(block).dominator;
        }
        false
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the closest block dominating both `a` and `b`.
    #[must_use]
    pub fn common_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let depth = |mut block: BlockId| {
            let mut depth = 0usize;
            while let Some(parent) = self.block(block).dominator {
                block = parent;
                depth += 1;
            }
            depth
        };
        let (mut a, mut b) = (a, b);
        let (mut depth_a, mut depth_b) = (depth(a), depth(b));
        while depth_a > depth_b {
            a = self.block(a).dominator?;
            depth_a -= 1;
        }
        while depth_b > depth_a {
            b = self.block(b).dominator?;
            depth_b -= 1;
        }
        while a != b {
            a = self.block(a).dominator?;
            b = self.block(b).dominator?;
        }
        Some(a)
    }

    /// Returns the closest block dominating every block of `blocks`, or `None` for an
    /// empty iterator.
    pub fn common_dominator_of(&self, blocks: impl IntoIterator<Item = BlockId>) -> Option<BlockId> {
        let mut blocks = blocks.into_iter();
        let first = blocks.next()?;
        blocks.try_fold(first, |acc, block| self.common_dominator(acc, block))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::AnalysisKind,
        ir::{
            builder::{GraphBuilder, EXIT},
            DataType,
        },
        Result,
    };

    #[test]
    fn test_diamond_dominators() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            f.block(1, &[2, 3], |_| ());
            f.block(2, &[4], |_| ());
            f.block(3, &[4], |_| ());
            f.block(4, &[EXIT], |b| b.ret_void());
        })?;
        let (b1, b2, b3, b4) = (built.block(1), built.block(2), built.block(3), built.block(4));
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::Dominators)?;

        assert_eq!(graph.block(b4).dominator(), Some(b1));
        assert!(graph.dominates(b1, b3));
        assert!(!graph.dominates(b2, b4));
        assert!(graph.strictly_dominates(b1, b4));
        assert!(!graph.strictly_dominates(b4, b4));
        assert_eq!(graph.common_dominator(b2, b3), Some(b1));
        assert_eq!(graph.common_dominator_of([b2, b3, b4]), Some(b1));
        assert_eq!(graph.common_dominator_of([]), None);
        Ok(())
    }

    #[test]
    fn test_split_update_matches_recompute() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            let sum = f.block(1, &[2, 3], |b| {
                let sum = b.add(x, x);
                b.if_imm(sum);
                sum
            });
            f.block(2, &[4], |_| ());
            f.block(3, &[4], |_| ());
            f.block(4, &[EXIT], |b| b.ret_void());
            sum
        })?;
        let sum = built.values;
        let b4 = built.block(4);
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::Dominators)?;

        let tail = graph.split_block_after(sum, true);
        assert!(graph.is_valid(AnalysisKind::Dominators));
        let incremental: Vec<_> = graph.blocks().map(|b| graph.block(b).dominator()).collect();

        graph.force_recompute(AnalysisKind::Dominators)?;
        let full: Vec<_> = graph.blocks().map(|b| graph.block(b).dominator()).collect();
        assert_eq!(incremental, full);
        assert_eq!(graph.block(b4).dominator(), Some(tail));
        Ok(())
    }

    #[test]
    fn test_insert_between_update_matches_recompute() -> Result<()> {
        let mut built = GraphBuilder::new().build_with(|f| {
            let x = f.param(0, DataType::Int64);
            f.block(1, &[2, 3], |b| b.if_imm(x));
            f.block(2, &[3], |_| ());
            f.block(3, &[EXIT], |b| b.ret_void());
        })?;
        let (b1, b2, b3) = (built.block(1), built.block(2), built.block(3));
        let graph = &mut built.graph;
        graph.ensure(AnalysisKind::Dominators)?;

        let critical = graph.insert_block_between(b1, b3);
        let on_tree_edge = graph.insert_block_between(b1, b2);
        assert!(graph.is_valid(AnalysisKind::Dominators));
        let incremental: Vec<_> = graph.blocks().map(|b| graph.block(b).dominator()).collect();

        graph.force_recompute(AnalysisKind::Dominators)?;
        let full: Vec<_> = graph.blocks().map(|b| graph.block(b).dominator()).collect();
        assert_eq!(incremental, full);
        assert_eq!(graph.block(critical).dominator(), Some(b1));
        assert_eq!(graph.block(b2).dominator(), Some(on_tree_edge));
        Ok(())
    }
}
