use thiserror::Error;

use crate::analysis::AnalysisKind;

/// Builds an [`Error::GraphCheck`] that records where the violated invariant was detected.
macro_rules! check_error {
    // Literal version, inline format arguments are captured
    ($msg:literal) => {
        crate::Error::GraphCheck {
            message: format!($msg),
            file: file!(),
            line: line!(),
        }
    };

    // Single expression version
    ($msg:expr) => {
        crate::Error::GraphCheck {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::GraphCheck {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

pub(crate) use check_error;

/// The error type for every fallible operation of this crate.
///
/// Programmer errors in pass ordering (splitting a block at an instruction it does not
/// own, joining a block that still carries phis, acquiring markers out of order) are not
/// represented here: they panic. A method that is too large for the optimizer is not an
/// error either, see [`crate::compiler::CompileOutcome::Declined`].
///
/// # Error Categories
///
/// ## Analysis State
/// - [`Error::StaleAnalysis`] - A pass read an analysis that has been invalidated
/// - [`Error::UnresolvedCatchPhi`] - Liveness found catch-phi inputs without a thrower
///
/// ## Graph Integrity
/// - [`Error::StaleHandle`] - A handle refers to a removed block or instruction
/// - [`Error::GraphCheck`] - The graph checker found a broken invariant
///
/// ## Transformation
/// - [`Error::Precondition`] - A pass or the cloner was invoked on an unsupported shape
///
/// # Examples
///
/// ```rust,ignore
/// use vmopt::{Error, analysis::AnalysisKind};
///
/// match graph.require(AnalysisKind::Loops) {
///     Ok(()) => {}
///     Err(Error::StaleAnalysis(kind)) => eprintln!("{kind} must be recomputed"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An analysis result was read after the graph changed underneath it.
    ///
    /// Callers must run [`crate::ir::Graph::ensure`] (or force a recompute) before
    /// relying on the analysis again.
    #[error("Analysis '{0}' is stale and must be recomputed")]
    StaleAnalysis(AnalysisKind),

    /// Liveness finished with catch-phi inputs whose throwing instruction was never visited.
    ///
    /// The associated value is the number of unresolved inputs.
    #[error("{0} catch-phi input(s) were never attached to a throwing instruction")]
    UnresolvedCatchPhi(usize),

    /// A block or instruction handle refers to a slot that has been tombstoned.
    #[error("Stale handle {0}")]
    StaleHandle(String),

    /// The graph checker detected a violated structural invariant.
    ///
    /// Contains the description together with the source location of the check that
    /// failed.
    #[error("Graph check failed - {file}:{line}: {message}")]
    GraphCheck {
        /// The message to be printed for the failed check
        message: String,
        /// The source file in which this check was performed
        file: &'static str,
        /// The source line in which this check was performed
        line: u32,
    },

    /// A transformation was asked to operate on a graph shape it does not support.
    ///
    /// Unlike assertion-level violations, these come from inputs a pass may legitimately
    /// probe (for example, asking the cloner to unroll a loop with two back-edges).
    #[error("Precondition not met: {0}")]
    Precondition(String),
}
