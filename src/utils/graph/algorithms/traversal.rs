//! Depth-first orderings.
//!
//! Both orderings are computed with an explicit stack so arbitrarily deep CFGs never
//! exhaust the call stack.

use crate::utils::{graph::NodeId, graph::Successors, BitSet};

/// Computes the postorder of all nodes reachable from `start`.
///
/// Successors are explored in the order the graph yields them, so for a node with
/// successors `[a, b]`, `b` finishes before `a` is first entered only if `a` reaches `b`.
/// Returns an empty vector if `start` is outside the graph's index space.
///
/// # Examples
///
/// ```rust,ignore
/// use vmopt::utils::graph::algorithms::postorder;
///
/// // 0 -> 1 -> 2
/// let order = postorder(&graph, NodeId::new(0));
/// assert_eq!(order, vec![NodeId::new(2), NodeId::new(1), NodeId::new(0)]);
/// ```
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = BitSet::new(node_count);
    let mut result = Vec::with_capacity(node_count);
    // Each frame holds the node and its successor list with a cursor into it.
    let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();

    visited.insert(start.index());
    stack.push((start, graph.successors(start).collect(), 0));

    while let Some((node, succs, cursor)) = stack.last_mut() {
        if let Some(&succ) = succs.get(*cursor) {
            *cursor += 1;
            if visited.insert(succ.index()) {
                let next = graph.successors(succ).collect();
                stack.push((succ, next, 0));
            }
        } else {
            result.push(*node);
            stack.pop();
        }
    }

    result
}

/// Computes the reverse postorder of all nodes reachable from `start`.
///
/// In reverse postorder every node precedes its successors except along back-edges, and
/// every node precedes all nodes it dominates.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}
