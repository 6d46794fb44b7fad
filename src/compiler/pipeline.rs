//! End-to-end compilation of one graph.
//!
//! [`Pipeline::run`] is the entry point used by the register allocator's driver: it
//! declines methods above the configured limits, runs the enabled passes through a
//! [`PassScheduler`], and hands back the liveness information computed over the final
//! linear order.

use std::fmt;

use crate::{
    analysis::{AnalysisKind, Liveness, LivenessAnalyzer},
    compiler::{
        passes::{
            BranchElimPass, CleanupPass, LoopPeelingPass, LoopUnrollPass, MoveConstantsPass,
            SafepointPass, TryCatchPass,
        },
        CompilerContext, DerivedStats, EventKind, EventLog, PassScheduler,
    },
    config::CompilerOptions,
    ir::{checker::GraphChecker, Graph, GraphFlags},
    Result,
};

/// Why a method was not compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// The guest bytecode is larger than `max_bytecode_size`.
    BytecodeTooLarge {
        /// Bytecode size of the method.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The method uses more virtual registers than `max_vreg_count`.
    TooManyVregs {
        /// Virtual register count of the method.
        count: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The method has more try regions than `max_try_blocks`.
    TooManyTryBlocks {
        /// Try region count of the graph.
        count: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclineReason::BytecodeTooLarge { size, limit } => {
                write!(f, "bytecode size {size} exceeds limit {limit}")
            }
            DeclineReason::TooManyVregs { count, limit } => {
                write!(f, "{count} virtual registers exceed limit {limit}")
            }
            DeclineReason::TooManyTryBlocks { count, limit } => {
                write!(f, "{count} try blocks exceed limit {limit}")
            }
        }
    }
}

/// Counters of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    /// Rounds of the simplify phase.
    pub iterations: usize,
    /// Pass executions, skipped passes excluded.
    pub passes_run: usize,
    /// Changes derived from the event log.
    pub changes: DerivedStats,
}

/// The result of a successful compilation.
#[derive(Debug, Clone)]
pub struct Compilation {
    /// Liveness over the final linear order, ready for the register allocator.
    pub liveness: Liveness,
    /// What the run did.
    pub stats: CompileStats,
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    /// The graph was optimized and analyzed.
    Compiled(Box<Compilation>),
    /// The method is outside the configured limits and was left untouched.
    Declined(DeclineReason),
}

impl CompileOutcome {
    /// Returns the compilation, if the method was compiled.
    #[must_use]
    pub fn compilation(&self) -> Option<&Compilation> {
        match self {
            CompileOutcome::Compiled(compilation) => Some(compilation),
            CompileOutcome::Declined(_) => None,
        }
    }

    /// Returns `true` if the method was declined.
    #[must_use]
    pub fn is_declined(&self) -> bool {
        matches!(self, CompileOutcome::Declined(_))
    }
}

/// Runs the configured passes over a graph and computes liveness.
///
/// # Example
///
/// ```rust,ignore
/// use vmopt::{compiler::{CompileOutcome, Pipeline}, CompilerOptions};
///
/// let mut pipeline = Pipeline::new(CompilerOptions::default());
/// match pipeline.run(&mut graph)? {
///     CompileOutcome::Compiled(c) => println!("{} intervals", c.liveness.intervals().count()),
///     CompileOutcome::Declined(reason) => println!("declined: {reason}"),
/// }
/// ```
pub struct Pipeline {
    context: CompilerContext,
}

impl Pipeline {
    /// Creates a pipeline for the given options.
    #[must_use]
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            context: CompilerContext::new(options),
        }
    }

    /// Returns the options the pipeline was created with.
    #[must_use]
    pub fn options(&self) -> &CompilerOptions {
        &self.context.options
    }

    /// Returns every event recorded so far, across runs.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.context.events
    }

    /// Builds the scheduler for the enabled passes.
    fn scheduler(&self) -> PassScheduler {
        let options = &self.context.options;
        let mut scheduler = PassScheduler::default();

        if options.enable_try_catch_resolving {
            scheduler.simplify.push(Box::new(TryCatchPass::new()));
        }
        if options.enable_branch_elimination {
            scheduler.simplify.push(Box::new(BranchElimPass::new()));
        }
        if options.enable_loop_peeling {
            scheduler.loops.push(Box::new(LoopPeelingPass::new()));
        }
        if options.enable_loop_unroll {
            scheduler.loops.push(Box::new(LoopUnrollPass::new(
                options.unroll_factor,
                options.unroll_inst_limit,
            )));
        }
        if options.enable_move_constants {
            scheduler.lowering.push(Box::new(MoveConstantsPass::new()));
        }
        if options.enable_safepoint_insertion {
            scheduler.lowering.push(Box::new(SafepointPass::new()));
        }
        if options.enable_cleanup {
            scheduler.normalize.push(Box::new(CleanupPass::new()));
        }
        scheduler
    }

    fn check_limits(&self, graph: &Graph) -> Option<DeclineReason> {
        let options = &self.context.options;
        let size = graph.bytecode_size();
        if size > options.max_bytecode_size {
            return Some(DeclineReason::BytecodeTooLarge {
                size,
                limit: options.max_bytecode_size,
            });
        }
        let count = graph.vreg_count();
        if count > options.max_vreg_count {
            return Some(DeclineReason::TooManyVregs {
                count,
                limit: options.max_vreg_count,
            });
        }
        let count = graph.try_regions().len();
        if count > options.max_try_blocks {
            return Some(DeclineReason::TooManyTryBlocks {
                count,
                limit: options.max_try_blocks,
            });
        }
        None
    }

    /// Compiles `graph` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a pass fails in a way the scheduler does not absorb, if an
    /// analysis cannot be computed, or if verification is enabled and the graph breaks
    /// a structural invariant.
    pub fn run(&mut self, graph: &mut Graph) -> Result<CompileOutcome> {
        if let Some(reason) = self.check_limits(graph) {
            log::warn!("compilation declined: {reason}");
            self.context
                .events
                .record(EventKind::Declined)
                .message(reason.to_string());
            return Ok(CompileOutcome::Declined(reason));
        }

        let options = &self.context.options;
        if options.bytecode_preserving {
            graph.set_flags(GraphFlags::BYTECODE_OPTIMIZER, true);
        }
        if options.enable_freq_branch_reorder {
            graph.set_flags(GraphFlags::FREQ_BRANCH_REORDER, true);
        }
        graph.invalidate(AnalysisKind::LinearOrder);

        let before = self.context.events.len();
        let mut scheduler = self.scheduler();
        log::debug!("pipeline: {:?}", scheduler.pass_names());
        let iterations = scheduler.run_pipeline(graph, &self.context)?;

        graph.ensure(AnalysisKind::LinearOrder)?;
        let liveness = LivenessAnalyzer::run(graph, &self.context.options.target)?;
        if self.context.options.verify_after_each_pass {
            GraphChecker::new(graph).check()?;
        }

        let stats = CompileStats {
            iterations,
            passes_run: scheduler.passes_run(),
            changes: self.context.events.stats_since(before),
        };
        log::debug!(
            "pipeline finished: {} iteration(s), {} pass run(s), {} change(s)",
            stats.iterations,
            stats.passes_run,
            stats.changes.total_changes
        );

        Ok(CompileOutcome::Compiled(Box::new(Compilation { liveness, stats })))
    }
}
