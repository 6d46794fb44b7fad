//! Register-allocation support: value locations and the split resolver.
//!
//! The allocator itself is external. It consumes a [`crate::analysis::Liveness`] result,
//! splits intervals and assigns [`Location`]s; [`SplitResolver`] then inserts the
//! `SpillFill` moves that reconcile split siblings and control-flow edges.

mod location;
mod resolver;

pub use location::Location;
pub use resolver::{ResolveStats, SplitResolver};
