//! A growable bit vector keyed by dense indices.
//!
//! Live sets of the liveness analyzer and the per-block/per-instruction tags held by
//! [`crate::ir::Marker`] are both sets of small integers (slot indices of the graph
//! arenas), so they share this representation.
//!
//! # Example
//!
//! ```rust,ignore
//! use vmopt::utils::BitSet;
//!
//! let mut live = BitSet::new(128);
//! assert!(live.insert(3));
//! assert!(!live.insert(3));
//! live.grow(256);
//! live.insert(200);
//!
//! assert_eq!(live.iter().collect::<Vec<_>>(), vec![3, 200]);
//! ```

/// A bit vector over the indices `0..len`.
///
/// Queries past `len` answer "not present" instead of panicking, which lets markers
/// acquired before a block was created be asked about that block.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// The number of addressable bits.
    len: usize,
}

impl BitSet {
    /// Creates an empty bit set addressing `len` bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Returns the number of addressable bits.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Extends the addressable range to at least `len` bits. Never shrinks.
    pub fn grow(&mut self, len: usize) {
        if len > self.len {
            self.words.resize(len.div_ceil(64), 0);
            self.len = len;
        }
    }

    /// Sets the bit at `index`, growing the set if needed.
    ///
    /// Returns `true` if the bit was previously clear.
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.len {
            self.grow(index + 1);
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Clears the bit at `index`.
    ///
    /// Returns `true` if the bit was previously set.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Returns `true` if the bit at `index` is set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Returns the number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears every bit without releasing storage.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Adds every bit of `other`, growing if `other` is longer.
    ///
    /// Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        self.grow(other.len);
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Removes every bit that is set in `other`.
    ///
    /// Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns an iterator over the indices of set bits in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits of a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}
