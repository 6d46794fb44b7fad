//! Trait definitions for graph abstractions.
//!
//! The algorithms in [`crate::utils::graph::algorithms`] are written against these traits
//! so they run unchanged on the IR [`crate::ir::Graph`], on adapters that reorder its
//! successors, and on the small adjacency graphs used by the unit tests.
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - outgoing edges
//! - [`Predecessors`] - incoming edges
//! - [`RootedGraph`] - a designated entry node

use crate::utils::graph::NodeId;

/// Core graph properties.
///
/// `node_count` is the size of the index space, which may be larger than the number of
/// live nodes when the implementor keeps tombstoned slots (as the IR arenas do).
pub trait GraphBase {
    /// Returns the size of the node index space.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all live node identifiers.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Graphs that support forward edge traversal.
///
/// Successors are yielded in edge order; the order is significant for the IR, where the
/// first successor of a conditional block is the taken branch.
pub trait Successors: GraphBase {
    /// Returns an iterator over the successors of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Graphs with a single distinguished entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node.
    fn entry(&self) -> NodeId;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Adjacency-list graph used by the algorithm tests.
    pub(crate) struct TestGraph {
        succs: Vec<Vec<NodeId>>,
        preds: Vec<Vec<NodeId>>,
        entry: NodeId,
    }

    impl TestGraph {
        pub(crate) fn new(node_count: usize, edges: &[(usize, usize)]) -> Self {
            let mut succs = vec![Vec::new(); node_count];
            let mut preds = vec![Vec::new(); node_count];
            for &(from, to) in edges {
                succs[from].push(NodeId::new(to));
                preds[to].push(NodeId::new(from));
            }
            Self {
                succs,
                preds,
                entry: NodeId::new(0),
            }
        }
    }

    impl GraphBase for TestGraph {
        fn node_count(&self) -> usize {
            self.succs.len()
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.succs.len()).map(NodeId::new)
        }
    }

    impl Successors for TestGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.succs[node.index()].iter().copied()
        }
    }

    impl Predecessors for TestGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.preds[node.index()].iter().copied()
        }
    }

    impl RootedGraph for TestGraph {
        fn entry(&self) -> NodeId {
            self.entry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestGraph;
    use super::*;

    #[test]
    fn test_adjacency_is_mutual() {
        let graph = TestGraph::new(3, &[(0, 1), (0, 2), (1, 2)]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.entry(), NodeId::new(0));

        let succs: Vec<_> = graph.successors(NodeId::new(0)).collect();
        assert_eq!(succs, vec![NodeId::new(1), NodeId::new(2)]);

        let preds: Vec<_> = graph.predecessors(NodeId::new(2)).collect();
        assert_eq!(preds, vec![NodeId::new(0), NodeId::new(1)]);
    }
}
