//! Structured record of what the optimizer did to a graph.
//!
//! Passes report every transformation as an [`Event`]. The [`EventLog`] is append-only
//! and backed by [`boxcar::Vec`], so recording only needs a shared reference and a pass
//! can collect events into a private log and [`EventLog::merge`] it afterwards.
//!
//! ```rust,ignore
//! let log = EventLog::new();
//! log.record(EventKind::BranchEliminated)
//!     .at(block)
//!     .message(format!("{block}: condition is always true"));
//! assert_eq!(log.count_kind(EventKind::BranchEliminated), 1);
//! ```

use std::fmt;

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::ir::{BlockId, InstId};

/// Category of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, IntoStaticStr, EnumIter)]
pub enum EventKind {
    /// A conditional branch on a constant was replaced by a single edge.
    #[strum(serialize = "branch eliminated")]
    BranchEliminated,
    /// A block was removed from the CFG.
    #[strum(serialize = "block removed")]
    BlockRemoved,
    /// A block was merged into its predecessor.
    #[strum(serialize = "blocks joined")]
    BlocksJoined,
    /// A phi without users was deleted.
    #[strum(serialize = "phi removed")]
    PhiRemoved,
    /// An instruction was deleted by dead-code elimination.
    #[strum(serialize = "instruction removed")]
    InstructionRemoved,
    /// A constant left the start block.
    #[strum(serialize = "constant moved")]
    ConstantMoved,
    /// A throw was linked straight to its handler.
    #[strum(serialize = "throw relinked")]
    ThrowRelinked,
    /// A handler lost all of its throwers.
    #[strum(serialize = "handler removed")]
    HandlerRemoved,
    /// A try region without handlers was dissolved.
    #[strum(serialize = "try region removed")]
    TryRegionRemoved,
    /// A loop body was unrolled.
    #[strum(serialize = "loop unrolled")]
    LoopUnrolled,
    /// A loop header was peeled.
    #[strum(serialize = "loop peeled")]
    LoopPeeled,
    /// A safepoint was placed in a loop header.
    #[strum(serialize = "safepoint inserted")]
    SafepointInserted,
    /// The method was not compiled.
    #[strum(serialize = "declined")]
    Declined,
    /// Informational message.
    #[strum(serialize = "info")]
    Info,
    /// Something unexpected that did not stop the pipeline.
    #[strum(serialize = "warning")]
    Warning,
    /// A pass failed.
    #[strum(serialize = "error")]
    Error,
}

impl EventKind {
    /// Returns `true` for kinds that describe a change to the graph.
    #[must_use]
    pub const fn is_transformation(self) -> bool {
        !matches!(
            self,
            EventKind::Declined | EventKind::Info | EventKind::Warning | EventKind::Error
        )
    }
}

/// One recorded occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Block concerned, if any.
    pub block: Option<BlockId>,
    /// Instruction concerned, if any.
    pub inst: Option<InstId>,
    /// Human readable description.
    pub message: String,
    /// Name of the pass that recorded the event.
    pub pass: Option<&'static str>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pass) = self.pass {
            write!(f, "[{pass}] ")?;
        }
        write!(f, "{}", self.kind)?;
        match (self.block, self.inst) {
            (Some(block), Some(inst)) => write!(f, " at {block}/{inst}")?,
            (Some(block), None) => write!(f, " at {block}")?,
            (None, Some(inst)) => write!(f, " at {inst}")?,
            (None, None) => {}
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Fills in an [`Event`] and appends it to its log when dropped.
#[must_use = "the event is recorded when the builder is dropped"]
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl EventBuilder<'_> {
    /// Attaches the block the event happened in.
    pub fn at(mut self, block: BlockId) -> Self {
        if let Some(event) = &mut self.event {
            event.block = Some(block);
        }
        self
    }

    /// Attaches the instruction the event is about.
    pub fn inst(mut self, inst: InstId) -> Self {
        if let Some(event) = &mut self.event {
            event.inst = Some(inst);
        }
        self
    }

    /// Attaches the recording pass.
    pub fn pass(mut self, name: &'static str) -> Self {
        if let Some(event) = &mut self.event {
            event.pass = Some(name);
        }
        self
    }

    /// Sets the description and records the event.
    pub fn message(mut self, message: impl Into<String>) {
        if let Some(event) = &mut self.event {
            event.message = message.into();
        }
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.log.events.push(event);
        }
    }
}

/// Append-only, lock-free event collection.
#[derive(Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording an event of `kind`; it is committed when the builder drops.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Some(Event {
                kind,
                block: None,
                inst: None,
                message: String::new(),
                pass: None,
            }),
        }
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.record(EventKind::Info).message(message);
    }

    /// Records a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.record(EventKind::Warning).message(message);
    }

    /// Records an error.
    pub fn error(&self, message: impl Into<String>) {
        self.record(EventKind::Error).message(message);
    }

    /// Appends every event of `other`.
    pub fn merge(&self, other: EventLog) {
        for (_, event) in other.events.iter() {
            self.events.push(event.clone());
        }
    }

    /// Appends every event of `other`, attributing those without a pass to `pass`.
    pub fn merge_as(&self, other: EventLog, pass: &'static str) {
        for (_, event) in other.events.iter() {
            let mut event = event.clone();
            event.pass.get_or_insert(pass);
            self.events.push(event);
        }
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().map(|(_, event)| event)
    }

    /// Returns `true` if at least one event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Counts the events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    /// Iterates the events of `kind`.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// One line per recorded kind, `kind: count`, in declaration order.
    #[must_use]
    pub fn summary(&self) -> String {
        EventKind::iter()
            .filter_map(|kind| {
                let count = self.count_kind(kind);
                (count > 0).then(|| format!("{kind}: {count}"))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Aggregates the log into per-category counters.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        self.stats_since(0)
    }

    /// Aggregates the events recorded after the first `start` ones.
    #[must_use]
    pub fn stats_since(&self, start: usize) -> DerivedStats {
        let mut stats = DerivedStats::default();
        for event in self.iter().skip(start) {
            match event.kind {
                EventKind::BranchEliminated => stats.branches_eliminated += 1,
                EventKind::BlockRemoved | EventKind::BlocksJoined => stats.blocks_removed += 1,
                EventKind::PhiRemoved | EventKind::InstructionRemoved => {
                    stats.instructions_removed += 1;
                }
                EventKind::ConstantMoved => stats.constants_moved += 1,
                EventKind::ThrowRelinked
                | EventKind::HandlerRemoved
                | EventKind::TryRegionRemoved => stats.try_catch_changes += 1,
                EventKind::LoopUnrolled | EventKind::LoopPeeled => stats.loops_transformed += 1,
                EventKind::SafepointInserted => stats.safepoints_inserted += 1,
                EventKind::Declined | EventKind::Info | EventKind::Warning => {}
                EventKind::Error => stats.errors += 1,
            }
            if event.kind.is_transformation() {
                stats.total_changes += 1;
            }
        }
        stats
    }
}

/// Counters derived from an [`EventLog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedStats {
    /// Branches replaced by a single edge.
    pub branches_eliminated: usize,
    /// Blocks removed or joined into a predecessor.
    pub blocks_removed: usize,
    /// Phis and instructions deleted.
    pub instructions_removed: usize,
    /// Constants sunk out of the start block.
    pub constants_moved: usize,
    /// Relinked throws, removed handlers and dissolved try regions.
    pub try_catch_changes: usize,
    /// Loops unrolled or peeled.
    pub loops_transformed: usize,
    /// Safepoints placed in loop headers.
    pub safepoints_inserted: usize,
    /// Errors recorded by passes.
    pub errors: usize,
    /// Every transformation event.
    pub total_changes: usize,
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} change(s): {} branch(es), {} block(s), {} instruction(s), {} constant(s), {} try/catch, {} loop(s), {} safepoint(s)",
            self.total_changes,
            self.branches_eliminated,
            self.blocks_removed,
            self.instructions_removed,
            self.constants_moved,
            self.try_catch_changes,
            self.loops_transformed,
            self.safepoints_inserted
        )
    }
}
