//! Graph algorithms used by the IR analyses.
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | [`postorder`] / [`reverse_postorder`] | O(V + E) | block orderings, data flow |
//! | [`compute_dominators`] | O(V + E) per sweep | dominance, loop detection |

mod dominators;
mod traversal;

pub use dominators::{
    compute_dominators, compute_dominators_rooted, DominatorIterator, DominatorTree,
};
pub use traversal::{postorder, reverse_postorder};
