//! Life intervals: the ranges of life numbers over which a value must stay in a location.

use std::fmt;

use crate::{
    ir::{DataType, InstId},
    regalloc::Location,
};

/// Position in the linear order of instructions.
pub type LifeNumber = u32;

/// Half-open range `[begin, end)` of life numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRange {
    /// First covered life number.
    pub begin: LifeNumber,
    /// First life number past the range.
    pub end: LifeNumber,
}

impl LiveRange {
    /// Creates the range `[begin, end)`.
    #[must_use]
    pub const fn new(begin: LifeNumber, end: LifeNumber) -> Self {
        Self { begin, end }
    }

    /// Returns `true` if `ln` lies in the range.
    #[must_use]
    pub const fn contains(self, ln: LifeNumber) -> bool {
        self.begin <= ln && ln < self.end
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Index of an interval in its [`super::Liveness`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(u32);

impl IntervalId {
    /// Returns the position of the interval in the result.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// What an interval describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalOwner {
    /// The value produced by an instruction.
    Inst(InstId),
    /// A physical register blocked around calls.
    Physical(Location),
}

/// Sorted, disjoint live ranges of one value plus its use positions.
///
/// Intervals are built by the liveness analyzer and finalized when it finishes. A
/// finalized interval only changes through splitting and sibling merging, both driven by
/// [`super::Liveness`], and through its assigned location.
#[derive(Debug, Clone)]
pub struct LifeInterval {
    pub(crate) id: IntervalId,
    pub(crate) owner: IntervalOwner,
    pub(crate) ty: DataType,
    pub(crate) ranges: Vec<LiveRange>,
    pub(crate) uses: Vec<LifeNumber>,
    pub(crate) sibling: Option<IntervalId>,
    pub(crate) split_parent: Option<IntervalId>,
    pub(crate) location: Location,
    pub(crate) finalized: bool,
}

impl LifeInterval {
    pub(crate) fn new(id: IntervalId, owner: IntervalOwner, ty: DataType) -> Self {
        let location = match owner {
            IntervalOwner::Physical(location) => location,
            IntervalOwner::Inst(_) => Location::Invalid,
        };
        Self {
            id,
            owner,
            ty,
            ranges: Vec::new(),
            uses: Vec::new(),
            sibling: None,
            split_parent: None,
            location,
            finalized: false,
        }
    }

    /// Returns the index of this interval.
    #[must_use]
    pub fn id(&self) -> IntervalId {
        self.id
    }

    /// Returns the instruction or register this interval belongs to.
    #[must_use]
    pub fn owner(&self) -> IntervalOwner {
        self.owner
    }

    /// Returns the owning instruction, unless this is a physical pseudo-interval.
    #[must_use]
    pub fn inst(&self) -> Option<InstId> {
        match self.owner {
            IntervalOwner::Inst(inst) => Some(inst),
            IntervalOwner::Physical(_) => None,
        }
    }

    /// Returns `true` for the blocking intervals of physical registers.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        matches!(self.owner, IntervalOwner::Physical(_))
    }

    /// Returns the type of the value.
    #[must_use]
    pub fn ty(&self) -> DataType {
        self.ty
    }

    /// Returns the live ranges in ascending order.
    #[must_use]
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    /// Returns the first covered life number, or 0 for an empty interval.
    #[must_use]
    pub fn begin(&self) -> LifeNumber {
        self.ranges.first().map_or(0, |r| r.begin)
    }

    /// Returns the life number past the last range, or 0 for an empty interval.
    #[must_use]
    pub fn end(&self) -> LifeNumber {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Returns `true` if one of the ranges contains `ln`.
    #[must_use]
    pub fn covers(&self, ln: LifeNumber) -> bool {
        let index = self.ranges.partition_point(|r| r.end <= ln);
        self.ranges.get(index).is_some_and(|r| r.contains(ln))
    }

    /// Returns `true` if `begin <= ln < end`, ignoring holes.
    #[must_use]
    pub fn spans(&self, ln: LifeNumber) -> bool {
        !self.ranges.is_empty() && self.begin() <= ln && ln < self.end()
    }

    /// Returns the first life number covered by both intervals.
    #[must_use]
    pub fn intersects(&self, other: &LifeInterval) -> Option<LifeNumber> {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (self.ranges[i], other.ranges[j]);
            let begin = a.begin.max(b.begin);
            if begin < a.end.min(b.end) {
                return Some(begin);
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        None
    }

    /// Returns the use positions in ascending order.
    #[must_use]
    pub fn use_positions(&self) -> &[LifeNumber] {
        &self.uses
    }

    /// Returns the first use at or after `ln`.
    #[must_use]
    pub fn next_use_after(&self, ln: LifeNumber) -> Option<LifeNumber> {
        let index = self.uses.partition_point(|&u| u < ln);
        self.uses.get(index).copied()
    }

    /// Returns the next split sibling.
    #[must_use]
    pub fn sibling(&self) -> Option<IntervalId> {
        self.sibling
    }

    /// Returns the interval this one was split from, directly or transitively.
    #[must_use]
    pub fn split_parent(&self) -> Option<IntervalId> {
        self.split_parent
    }

    /// Returns the assigned location.
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }

    /// Assigns a location.
    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    /// Returns `true` once the analyzer has finished building the interval.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Adds `[begin, end)`, merging it with every overlapping or adjacent range.
    ///
    /// # Panics
    ///
    /// Panics if the interval is finalized or the range is empty.
    pub(crate) fn add_range(&mut self, begin: LifeNumber, end: LifeNumber) {
        self.assert_mutable();
        assert!(begin < end, "empty range [{begin}, {end}) for {}", self.id);
        let mut merged = LiveRange::new(begin, end);
        let first = self.ranges.partition_point(|r| r.end < begin);
        let mut last = first;
        while last < self.ranges.len() && self.ranges[last].begin <= end {
            merged.begin = merged.begin.min(self.ranges[last].begin);
            merged.end = merged.end.max(self.ranges[last].end);
            last += 1;
        }
        self.ranges.splice(first..last, [merged]);
    }

    /// Cuts everything before the definition at `ln`.
    ///
    /// A value without any range past `ln` still gets `[ln, ln + 1)` so that its
    /// definition has a location.
    pub(crate) fn start_from(&mut self, ln: LifeNumber) {
        self.assert_mutable();
        self.ranges.retain(|r| r.end > ln);
        match self.ranges.first_mut() {
            Some(first) if first.begin <= ln => first.begin = ln,
            _ => self.add_range(ln, ln + 1),
        }
    }

    /// Records a use at `ln`.
    pub(crate) fn add_use(&mut self, ln: LifeNumber) {
        self.assert_mutable();
        let index = self.uses.partition_point(|&u| u < ln);
        if self.uses.get(index) != Some(&ln) {
            self.uses.insert(index, ln);
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.finalized = true;
    }

    fn assert_mutable(&self) {
        assert!(!self.finalized, "interval {} is finalized", self.id);
    }
}

impl fmt::Display for LifeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            IntervalOwner::Inst(inst) => write!(f, "{}({inst}):", self.id)?,
            IntervalOwner::Physical(location) => write!(f, "{}({location}):", self.id)?,
        }
        for range in &self.ranges {
            write!(f, " {range}")?;
        }
        if self.location.is_valid() {
            write!(f, " @{}", self.location)?;
        }
        Ok(())
    }
}
