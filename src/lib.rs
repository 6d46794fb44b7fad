// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # vmopt
//!
//! The optimizing-compiler core of a register-based bytecode virtual machine: a mutable
//! SSA control-flow graph, the analyses a register allocator needs, and the structural
//! passes that run before it.
//!
//! ## Features
//!
//! - **Arena-backed IR** - blocks and instructions addressed by generational handles,
//!   with intrusive instruction lists and def-use links
//! - **Coherent analyses** - dominators, loop tree, linear order and liveness, tracked
//!   by an invalidation table so a pass never reads stale results
//! - **Structural passes** - branch elimination, cleanup, constant sinking, try/catch
//!   resolving, loop unrolling, loop header peeling and safepoint insertion
//! - **Register allocation support** - life intervals with use positions and splits,
//!   and a resolver that inserts the moves split intervals need
//! - **Diagnostics** - a structured, append-only event log and a graph checker
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vmopt::prelude::*;
//!
//! let mut built = GraphBuilder::new().build_with(|f| {
//!     let x = f.param(0, DataType::Int64);
//!     let one = f.int(1);
//!     f.block(1, &[EXIT], |b| {
//!         let sum = b.add(x, one);
//!         b.ret(sum);
//!     });
//! })?;
//!
//! let mut pipeline = Pipeline::new(CompilerOptions::default());
//! if let CompileOutcome::Compiled(compilation) = pipeline.run(&mut built.graph)? {
//!     for interval in compilation.liveness.intervals() {
//!         println!("{interval}");
//!     }
//! }
//! # Ok::<(), vmopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the graph, its blocks and instructions, edits, cloning, checking, building
//! - [`analysis`] - dominators, loops, linear order, liveness and the invalidation table
//! - [`compiler`] - the pass trait, the built-in passes, the scheduler and the pipeline
//! - [`regalloc`] - locations and the split resolver
//! - [`config`] - [`CompilerOptions`] and the target description
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result<T, Error>`](Result). Violated preconditions of
//! structural edits (a stale handle, a phi in a block being joined, a marker released out
//! of order) are programming errors and panic with a message naming the contract.
//!
//! ```rust,ignore
//! use vmopt::{analysis::AnalysisKind, Error};
//!
//! match graph.require(AnalysisKind::Loops) {
//!     Ok(()) => {}
//!     Err(Error::StaleAnalysis(kind)) => graph.ensure(kind)?,
//!     Err(e) => return Err(e),
//! }
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,ignore
/// use vmopt::prelude::*;
///
/// let options = CompilerOptions::aggressive();
/// let pipeline = Pipeline::new(options);
/// ```
pub mod prelude;

/// The mutable graph IR.
///
/// # Key Types
///
/// - [`ir::Graph`] - owner of all blocks and instructions
/// - [`ir::BasicBlock`] / [`ir::BlockId`] - blocks and their handles
/// - [`ir::Instruction`] / [`ir::InstId`] - instructions and their handles
/// - [`ir::Marker`] - scoped visitation tags
/// - [`ir::cloner::GraphCloner`] - loop cloning, unrolling and peeling
/// - [`ir::checker::GraphChecker`] - structural invariant checks
/// - [`ir::builder::GraphBuilder`] - programmatic graph construction
pub mod ir;

/// Analyses over the IR.
///
/// # Key Types
///
/// - [`analysis::AnalysisKind`] - the cached analyses and their dependencies
/// - [`analysis::LoopId`] / [`analysis::Loop`] - the loop tree
/// - [`analysis::LivenessAnalyzer`] / [`analysis::Liveness`] - life numbers and intervals
pub mod analysis;

/// Passes, scheduling and the end-to-end pipeline.
pub mod compiler;

/// Register allocation support.
pub mod regalloc;

/// Pipeline configuration.
pub mod config;

/// Data structures shared by the IR and its analyses.
pub mod utils;

/// `vmopt` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `vmopt` Error type
///
/// Covers stale analyses, stale handles, checker failures and unsupported shapes.
pub use error::Error;

/// Options for [`compiler::Pipeline`].
pub use config::CompilerOptions;
