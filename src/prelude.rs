//! # vmopt Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the library. Import it to get quick access to everything needed to build a graph,
//! run the pipeline and read its results.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all vmopt operations
pub use crate::Error;

/// The result type used throughout vmopt
pub use crate::Result;

/// Pipeline configuration
pub use crate::config::{CompilerOptions, TargetInfo};

// ================================================================================================
// IR
// ================================================================================================

/// Graph, blocks, instructions and their handles
pub use crate::ir::{
    BasicBlock, BlockFlags, BlockId, ConditionCode, ConstValue, DataType, Graph, GraphFlags,
    InstData, InstId, Instruction, Marker, Opcode,
};

/// Programmatic construction, cloning and checking
pub use crate::ir::{
    builder::{BuiltGraph, GraphBuilder, EXIT},
    checker::GraphChecker,
    cloner::{CloneMap, GraphCloner},
};

// ================================================================================================
// Analyses
// ================================================================================================

/// Analysis kinds, graph change reports and loop handles
pub use crate::analysis::{AnalysisKind, GraphChange, Loop, LoopId};

/// Liveness results
pub use crate::analysis::{LifeInterval, LifeNumber, LiveRange, Liveness, LivenessAnalyzer};

// ================================================================================================
// Compiler
// ================================================================================================

/// Pass infrastructure and the pipeline
pub use crate::compiler::{
    CompileOutcome, CompilerContext, EventKind, EventLog, Pass, PassScheduler, Pipeline,
};

// ================================================================================================
// Register Allocation
// ================================================================================================

/// Locations and split resolution
pub use crate::regalloc::{Location, SplitResolver};
