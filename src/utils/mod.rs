//! Data structures shared by the IR and its analyses.

mod bitset;
mod dot;
pub mod graph;

pub use bitset::{BitSet, BitSetIter};
pub use dot::escape_dot;
