//! State shared by every pass of one compilation.

use crate::{compiler::events::EventLog, config::CompilerOptions};

/// The options and the event log a pipeline run hands to each pass.
///
/// Passes only get a shared reference: the event log is append-only and the options are
/// fixed for the whole run.
#[derive(Debug, Default)]
pub struct CompilerContext {
    /// Events recorded by the passes.
    pub events: EventLog,
    /// The options the pipeline was configured with.
    pub options: CompilerOptions,
}

impl CompilerContext {
    /// Creates a context with an empty event log.
    #[must_use]
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            events: EventLog::new(),
            options,
        }
    }
}
