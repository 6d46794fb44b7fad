//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` passes
//! through `d`. The **immediate dominator** of `n` is the unique strict dominator of `n`
//! that is dominated by every other strict dominator of `n`.
//!
//! # Algorithm
//!
//! This implementation uses the iterative scheme of Cooper, Harvey and Kennedy ("A Simple,
//! Fast Dominance Algorithm"): immediate dominators are refined over the reverse postorder
//! until a fixpoint, intersecting candidate dominators by walking up the partial tree
//! using postorder numbers. For the small, mostly reducible CFGs of compiled methods it
//! converges in two or three sweeps.

use crate::utils::graph::{
    algorithms::reverse_postorder, NodeId, Predecessors, RootedGraph, Successors,
};

const UNDEFINED: usize = usize::MAX;

/// Result of dominator tree computation.
///
/// Nodes unreachable from the entry have no immediate dominator, are dominated by nothing
/// and dominate nothing.
///
/// # Examples
///
/// ```rust,ignore
/// use vmopt::utils::graph::algorithms::compute_dominators;
///
/// // entry -> a -> b
/// let dom_tree = compute_dominators(&graph, entry);
/// assert!(dom_tree.dominates(entry, b));
/// assert_eq!(dom_tree.immediate_dominator(b), Some(a));
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator per node index; the entry maps to itself
    idom: Vec<usize>,
    /// Position of each node in the reverse postorder, `UNDEFINED` if unreachable
    rpo_number: Vec<usize>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[inline]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.rpo_number
            .get(node.index())
            .is_some_and(|&n| n != UNDEFINED)
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node and for
    /// unreachable nodes.
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry || !self.is_reachable(node) {
            None
        } else {
            Some(NodeId::new(self.idom[node.index()]))
        }
    }

    /// Checks if node `a` dominates node `b`. A reachable node dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == self.entry {
                return false;
            }
            current = NodeId::new(self.idom[current.index()]);
        }
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the nearest node dominating both `a` and `b`, or `None` if either is
    /// unreachable.
    pub fn common_dominator(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return None;
        }
        Some(NodeId::new(self.intersect(a.index(), b.index())))
    }

    fn intersect(&self, mut a: usize, mut b: usize) -> usize {
        while a != b {
            while self.rpo_number[a] > self.rpo_number[b] {
                a = self.idom[a];
            }
            while self.rpo_number[b] > self.rpo_number[a] {
                b = self.idom[b];
            }
        }
        a
    }

    /// Returns an iterator over all dominators of a node, from the node itself up to and
    /// including the entry node.
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(node).then_some(node),
        }
    }

    /// Returns the depth of a node in the dominator tree. The entry node has depth 0.
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).count().saturating_sub(1)
    }

    /// Returns all children of a node in the dominator tree, in index order.
    ///
    /// # Complexity
    ///
    /// O(V) where V is the size of the node index space.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.idom.len())
            .filter(|&i| i != self.entry.index() && self.rpo_number[i] != UNDEFINED)
            .filter(|&i| self.idom[i] == node.index())
            .map(NodeId::new)
            .collect()
    }

    /// Returns the size of the node index space the tree was computed over.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Iterator over dominators of a node, from the node up to the entry.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = if current == self.tree.entry {
            None
        } else {
            Some(NodeId::new(self.tree.idom[current.index()]))
        };
        Some(current)
    }
}

/// Computes the dominator tree of all nodes reachable from `entry`.
///
/// # Complexity
///
/// - Time: O(V + E) per sweep, typically two or three sweeps
/// - Space: O(V)
///
/// # Examples
///
/// ```rust,ignore
/// // Diamond CFG: entry -> {a, b} -> exit
/// let dom_tree = compute_dominators(&graph, entry);
/// assert!(!dom_tree.strictly_dominates(a, exit));
/// assert_eq!(dom_tree.immediate_dominator(exit), Some(entry));
/// ```
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();
    let mut idom = vec![UNDEFINED; node_count];
    let mut rpo_number = vec![UNDEFINED; node_count];

    let rpo = reverse_postorder(graph, entry);
    if rpo.is_empty() {
        return DominatorTree {
            entry,
            idom,
            rpo_number,
        };
    }
    for (position, node) in rpo.iter().enumerate() {
        rpo_number[node.index()] = position;
    }
    idom[entry.index()] = entry.index();

    let mut tree = DominatorTree {
        entry,
        idom,
        rpo_number,
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom = UNDEFINED;
            for pred in graph.predecessors(node) {
                let p = pred.index();
                if tree.rpo_number[p] == UNDEFINED || tree.idom[p] == UNDEFINED {
                    continue;
                }
                new_idom = if new_idom == UNDEFINED {
                    p
                } else {
                    tree.intersect(p, new_idom)
                };
            }
            if new_idom != UNDEFINED && tree.idom[node.index()] != new_idom {
                tree.idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    tree
}

/// Convenience function to compute dominators for a [`RootedGraph`].
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    compute_dominators(graph, graph.entry())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::testing::TestGraph;

    fn n(i: usize) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_linear_chain() {
        let graph = TestGraph::new(3, &[(0, 1), (1, 2)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(0)), None);
        assert_eq!(dom.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom.immediate_dominator(n(2)), Some(n(1)));
        assert_eq!(dom.depth(n(2)), 2);
        assert_eq!(dom.dominators(n(2)).collect::<Vec<_>>(), vec![n(2), n(1), n(0)]);
    }

    #[test]
    fn test_diamond() {
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(3)), Some(n(0)));
        assert!(!dom.strictly_dominates(n(1), n(3)));
        assert!(dom.dominates(n(0), n(3)));
        assert_eq!(dom.children(n(0)), vec![n(1), n(2), n(3)]);
        assert_eq!(dom.common_dominator(n(1), n(2)), Some(n(0)));
    }

    #[test]
    fn test_loop() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom.immediate_dominator(n(2)), Some(n(1)));
        assert_eq!(dom.immediate_dominator(n(3)), Some(n(2)));
        assert!(dom.dominates(n(1), n(3)));
    }

    #[test]
    fn test_irreducible_region() {
        // 0 -> 1, 0 -> 2, 1 <-> 2: neither 1 nor 2 dominates the other
        let graph = TestGraph::new(3, &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom.immediate_dominator(n(2)), Some(n(0)));
        assert!(!dom.dominates(n(1), n(2)));
        assert!(!dom.dominates(n(2), n(1)));
    }

    #[test]
    fn test_unreachable_nodes() {
        let graph = TestGraph::new(3, &[(0, 1), (2, 1)]);
        let dom = compute_dominators_rooted(&graph);

        assert!(!dom.is_reachable(n(2)));
        assert_eq!(dom.immediate_dominator(n(2)), None);
        assert!(!dom.dominates(n(2), n(1)));
        assert!(!dom.dominates(n(0), n(2)));
        assert_eq!(dom.common_dominator(n(1), n(2)), None);
        assert_eq!(dom.immediate_dominator(n(1)), Some(n(0)));
    }

    #[test]
    fn test_nested_loops_common_dominator() {
        // 0 -> 1 -> 2 -> 3 -> 2, 3 -> 4 -> 1, 4 -> 5
        let graph = TestGraph::new(6, &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (4, 5)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(5)), Some(n(4)));
        assert_eq!(dom.common_dominator(n(5), n(3)), Some(n(3)));
        assert_eq!(dom.common_dominator(n(2), n(4)), Some(n(2)));
    }
}
