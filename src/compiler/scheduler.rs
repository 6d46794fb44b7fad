//! Pass scheduler for orchestrating pass execution over one graph.
//!
//! The `PassScheduler` runs the passes in three phases. Simplification runs to a
//! fixpoint; the loop and lowering phases run once, since their passes always find work
//! on a graph that still has loops. Normalization runs after every phase that changed
//! the graph.

use crate::{
    compiler::{context::CompilerContext, pass::Pass, EventKind},
    ir::{checker::GraphChecker, Graph},
    Result,
};

/// Default bound on simplify/normalize rounds of [`PassScheduler::run_pipeline`].
pub const MAX_ITERATIONS: usize = 8;

/// Orchestrates pass execution in a phased pipeline.
///
/// 1. **Simplify**: try/catch resolving, branch elimination + normalize, to fixpoint
/// 2. **Loops**: peeling, unrolling + normalize, once
/// 3. **Lowering**: constant sinking, safepoints, once
///
/// Each pass runs with a private event log that is merged into the caller's log with
/// the pass name attached.
#[allow(clippy::struct_field_names)]
pub struct PassScheduler {
    /// Maximum rounds of the simplify phase.
    max_iterations: usize,
    /// Number of stable rounds before stopping.
    stable_iterations: usize,
    /// Maximum iterations of a single phase before moving on.
    max_phase_iterations: usize,
    /// Number of pass executions so far.
    passes_run: usize,
    /// Phase 1: CFG simplification.
    pub simplify: Vec<Box<dyn Pass>>,
    /// Phase 2: loop restructuring.
    pub loops: Vec<Box<dyn Pass>>,
    /// Phase 3: lowering right before liveness.
    pub lowering: Vec<Box<dyn Pass>>,
    /// Normalization passes (dead code, empty blocks).
    /// Run after each phase to clean up before the next.
    pub normalize: Vec<Box<dyn Pass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(MAX_ITERATIONS, 1, 16)
    }
}

impl PassScheduler {
    /// Creates a new scheduler with the specified iteration limits.
    ///
    /// # Arguments
    ///
    /// * `max_iterations` - Maximum rounds of the simplify phase.
    /// * `stable_iterations` - Stop early if no changes for this many rounds.
    /// * `max_phase_iterations` - Maximum iterations for a single phase before moving on.
    #[must_use]
    pub fn new(
        max_iterations: usize,
        stable_iterations: usize,
        max_phase_iterations: usize,
    ) -> Self {
        Self {
            max_iterations,
            stable_iterations: stable_iterations.max(1),
            max_phase_iterations,
            passes_run: 0,
            simplify: Vec::new(),
            loops: Vec::new(),
            lowering: Vec::new(),
            normalize: Vec::new(),
        }
    }

    /// Returns how many passes have been executed (skipped passes do not count).
    #[must_use]
    pub fn passes_run(&self) -> usize {
        self.passes_run
    }

    /// Returns the names of every scheduled pass, phase by phase.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.simplify
            .iter()
            .chain(&self.loops)
            .chain(&self.lowering)
            .chain(&self.normalize)
            .map(|p| p.name())
            .collect()
    }

    /// Runs one pass, attributes its events, and verifies the graph if requested.
    fn run_pass(
        pass: &dyn Pass,
        graph: &mut Graph,
        ctx: &CompilerContext,
        runs: &mut usize,
    ) -> Result<bool> {
        if !pass.should_run(graph, ctx) {
            log::trace!("skipping {}", pass.name());
            return Ok(false);
        }
        *runs += 1;

        let local = CompilerContext::new(ctx.options.clone());
        let result = pass.run(graph, &local);
        let recorded = local.events.len();
        ctx.events.merge_as(local.events, pass.name());

        let changed = match result {
            Ok(changed) => changed,
            Err(e) => {
                ctx.events
                    .record(EventKind::Error)
                    .pass(pass.name())
                    .message(e.to_string());
                return Err(e);
            }
        };
        log::debug!(
            "{}: {} ({recorded} event(s))",
            pass.name(),
            if changed { "changed" } else { "unchanged" }
        );

        if ctx.options.verify_after_each_pass {
            GraphChecker::new(graph).check()?;
        }
        Ok(changed)
    }

    /// Runs every pass of a phase once, in order.
    ///
    /// Returns `true` if any pass made changes, `false` otherwise.
    fn run_passes_once(
        graph: &mut Graph,
        ctx: &CompilerContext,
        passes: &[Box<dyn Pass>],
        runs: &mut usize,
    ) -> Result<bool> {
        let mut any_changed = false;
        for pass in passes {
            if Self::run_pass(pass.as_ref(), graph, ctx, runs)? {
                any_changed = true;
            }
        }
        Ok(any_changed)
    }

    /// Runs normalization passes until no more changes occur.
    fn normalize_to_fixpoint(
        graph: &mut Graph,
        ctx: &CompilerContext,
        passes: &[Box<dyn Pass>],
        max_phase_iterations: usize,
        runs: &mut usize,
    ) -> Result<bool> {
        let mut any_changed = false;

        for _ in 0..max_phase_iterations {
            let changed = Self::run_passes_once(graph, ctx, passes, runs)?;

            if !changed {
                break;
            }

            any_changed = true;
        }

        Ok(any_changed)
    }

    /// Runs a phase to fixpoint: execute phase passes, then normalize until stable.
    ///
    /// # Returns
    ///
    /// `true` if any changes were made during this phase, `false` otherwise.
    fn phase_to_fixpoint(
        graph: &mut Graph,
        ctx: &CompilerContext,
        phase_passes: &[Box<dyn Pass>],
        normalize_passes: &[Box<dyn Pass>],
        max_phase_iterations: usize,
        runs: &mut usize,
    ) -> Result<bool> {
        if phase_passes.is_empty() {
            return Ok(false);
        }

        let mut phase_changed = false;

        for _ in 0..max_phase_iterations {
            if !Self::run_passes_once(graph, ctx, phase_passes, runs)? {
                break;
            }

            phase_changed = true;

            // Cleanup can expose new constant branches and dead handlers.
            Self::normalize_to_fixpoint(graph, ctx, normalize_passes, max_phase_iterations, runs)?;
        }

        Ok(phase_changed)
    }

    /// Runs a phase exactly once and normalizes if it changed anything.
    fn phase_once(
        graph: &mut Graph,
        ctx: &CompilerContext,
        phase_passes: &[Box<dyn Pass>],
        normalize_passes: &[Box<dyn Pass>],
        max_phase_iterations: usize,
        runs: &mut usize,
    ) -> Result<bool> {
        let changed = Self::run_passes_once(graph, ctx, phase_passes, runs)?;
        if changed {
            Self::normalize_to_fixpoint(graph, ctx, normalize_passes, max_phase_iterations, runs)?;
        }
        Ok(changed)
    }

    /// Runs the complete pipeline on `graph`.
    ///
    /// The simplify phase repeats until it makes no change for `stable_iterations`
    /// rounds or `max_iterations` is reached. The loop phase and then the lowering phase
    /// run once.
    ///
    /// # Returns
    ///
    /// The number of simplify rounds completed. Events are accumulated in `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if any pass fails, or if verification is enabled and a pass
    /// leaves the graph inconsistent.
    pub fn run_pipeline(&mut self, graph: &mut Graph, ctx: &CompilerContext) -> Result<usize> {
        let mut stable_count = 0;
        let mut iterations = 0;
        let max_phase = self.max_phase_iterations;
        let runs = &mut self.passes_run;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;

            let mut iteration_changed = Self::phase_to_fixpoint(
                graph,
                ctx,
                &self.simplify,
                &self.normalize,
                max_phase,
                runs,
            )?;

            // Normalize at least once even if nothing was simplified.
            if iteration == 0 && !iteration_changed {
                iteration_changed =
                    Self::normalize_to_fixpoint(graph, ctx, &self.normalize, max_phase, runs)?;
            }

            if iteration_changed {
                stable_count = 0;
            } else {
                stable_count += 1;
                if stable_count >= self.stable_iterations {
                    break;
                }
            }
        }

        Self::phase_once(graph, ctx, &self.loops, &self.normalize, max_phase, runs)?;
        Self::run_passes_once(graph, ctx, &self.lowering, runs)?;

        Ok(iterations)
    }
}
