//! Pass infrastructure and the optimizing pipeline.
//!
//! This module sits between the IR and the register allocator:
//!
//! - [`crate::ir`]: the graph, structural edits, cloning and checking
//! - [`crate::analysis`]: dominators, loops, linear order and liveness
//! - [`compiler`](self): passes, scheduling and the end-to-end [`Pipeline`]
//! - [`crate::regalloc`]: resolution of split intervals after allocation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Pipeline                    Limits, passes, liveness            │
//! │    ├─ check limits            (bytecode size, vregs, try blocks) │
//! │    ├─ PassScheduler           (enabled passes only)              │
//! │    └─ LivenessAnalyzer        (over the final linear order)      │
//! │                                                                  │
//! │  CompilerContext              Options + EventLog                 │
//! │                                                                  │
//! │  PassScheduler               3-phase execution                   │
//! │    ├─ Phase 1: Simplify       (try/catch, branches) to fixpoint  │
//! │    ├─ Phase 2: Loops          (peeling, unrolling) once          │
//! │    └─ Phase 3: Lowering       (constants, safepoints) once       │
//! │    Normalize (cleanup) after every phase that changed the graph  │
//! │                                                                  │
//! │  Pass trait                  Interface for all passes            │
//! │    ├─ should_run()            Cheap applicability check          │
//! │    └─ run()                   Transformation, Ok(changed)        │
//! │                                                                  │
//! │  EventLog                    Change tracking and diagnostics     │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use vmopt::{compiler::Pipeline, CompilerOptions};
//!
//! let mut pipeline = Pipeline::new(CompilerOptions::aggressive().with_verification(true));
//! let outcome = pipeline.run(&mut graph)?;
//! println!("{}", pipeline.events().summary());
//! ```

mod context;
mod events;
mod pass;
pub mod passes;
mod pipeline;
mod scheduler;

pub use context::CompilerContext;
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::Pass;
pub use passes::{
    BranchElimPass, CleanupPass, LoopPeelingPass, LoopUnrollPass, MoveConstantsPass,
    SafepointPass, TryCatchPass,
};
pub use pipeline::{CompileOutcome, CompileStats, Compilation, DeclineReason, Pipeline};
pub use scheduler::{PassScheduler, MAX_ITERATIONS};
