//! The mutable graph IR.
//!
//! A [`Graph`] owns two arenas, one for [`BasicBlock`]s and one for [`Instruction`]s,
//! addressed by generational handles ([`BlockId`], [`InstId`]). Blocks keep their phis
//! and their other instructions in two intrusive lists, and carry mutual
//! predecessor/successor lists whose order fixes the phi input layout.
//!
//! # Architecture
//!
//! - `graph` - the arenas, instruction lists and def-use links
//! - `edit` - structural CFG edits that report to the analysis table
//! - `marker` - scoped visitation tags
//! - [`cloner`] - loop cloning, unrolling and header peeling
//! - [`checker`] - structural invariant checks
//! - [`builder`] - the programmatic front end
//! - `dump` - text and DOT renderings
//!
//! # Usage
//!
//! ```rust,ignore
//! use vmopt::ir::{builder::{GraphBuilder, EXIT}, DataType};
//!
//! let built = GraphBuilder::new().build_with(|f| {
//!     let x = f.param(0, DataType::Int64);
//!     f.block(1, &[EXIT], |b| b.ret(x));
//! })?;
//! println!("{}", built.graph.dump());
//! ```

pub(crate) mod arena;
mod block;
pub mod builder;
pub mod checker;
pub mod cloner;
mod dump;
mod edit;
mod graph;
mod instruction;
mod marker;
mod opcode;

pub use block::{BasicBlock, BlockFlags, BlockId};
pub use graph::{Graph, GraphFlags, InstIter, TryRegion};
pub use instruction::{ConstValue, InstData, InstId, Instruction, SpillFillKind, SpillFillMove, User};
pub use marker::{Marker, MAX_MARKERS};
pub use opcode::{ConditionCode, DataType, InstFlags, IntrinsicId, Opcode};
