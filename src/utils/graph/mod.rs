//! Generic directed-graph abstractions and algorithms.
//!
//! The control-flow graph of the IR implements the traits of this module, which makes the
//! traversal and dominator algorithms independent of the IR's arena layout.

mod node;
mod traits;

pub mod algorithms;

pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};

#[cfg(test)]
pub(crate) use traits::testing;
