//! Generation-checked slot storage for blocks and instructions.
//!
//! Every block and instruction of a [`crate::ir::Graph`] lives in an [`Arena`] slot and is
//! addressed by a small copyable handle made of the slot index and the slot generation.
//! Removing a node tombstones its slot and bumps the generation, so a handle kept across
//! a removal no longer resolves: lookups through [`Arena::get`] return `None` and indexing
//! panics with the stale handle in the message. Slots are never reused while the graph
//! lives, which keeps slot indices usable as dense keys for bit sets and side tables.

use std::{
    fmt,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

/// Common interface of the typed arena handles.
pub trait ArenaHandle: Copy + Eq + fmt::Display {
    /// Builds a handle from its slot index and generation.
    fn from_parts(index: u32, generation: u32) -> Self;

    /// Returns the slot index.
    fn index(self) -> usize;

    /// Returns the generation the handle was issued for.
    fn generation(self) -> u32;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            /// Returns the slot index of this handle.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.index as usize
            }
        }

        impl $crate::ir::arena::ArenaHandle for $name {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            #[inline]
            fn index(self) -> usize {
                self.index as usize
            }

            #[inline]
            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                (self.index, self.generation).cmp(&(other.index, other.generation))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.generation == 0 {
                    write!(f, concat!($prefix, "{}"), self.index)
                } else {
                    write!(f, concat!($prefix, "{}#{}"), self.index, self.generation)
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.index)
            }
        }
    };
}

pub(crate) use define_handle;

#[derive(Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage addressed by generation-checked handles of type `H`.
#[derive(Clone)]
pub struct Arena<T, H> {
    slots: Vec<Slot<T>>,
    live: usize,
    _handle: PhantomData<H>,
}

impl<T, H: ArenaHandle> Default for Arena<T, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H: ArenaHandle> Arena<T, H> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
            _handle: PhantomData,
        }
    }

    /// Allocates a new slot, building the value from the handle it will be addressed by.
    pub fn alloc_with(&mut self, build: impl FnOnce(H) -> T) -> H {
        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("arena exhausted after {} slots", self.slots.len())
        });
        let handle = H::from_parts(index, 0);
        self.slots.push(Slot {
            generation: 0,
            value: Some(build(handle)),
        });
        self.live += 1;
        handle
    }

    /// Returns `true` if `handle` refers to a live slot of its generation.
    #[must_use]
    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    /// Returns the value behind `handle`, or `None` if it was removed.
    #[must_use]
    pub fn get(&self, handle: H) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation == handle.generation() {
            slot.value.as_ref()
        } else {
            None
        }
    }

    /// Mutable counterpart of [`Arena::get`].
    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation == handle.generation() {
            slot.value.as_mut()
        } else {
            None
        }
    }

    /// Tombstones the slot behind `handle` and returns its value.
    ///
    /// The slot generation is bumped so every outstanding copy of `handle` becomes stale.
    pub fn remove(&mut self, handle: H) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation += 1;
        self.live -= 1;
        Some(value)
    }

    /// Returns the live handle stored at a slot index, if any.
    #[must_use]
    pub fn handle_at(&self, index: usize) -> Option<H> {
        let slot = self.slots.get(index)?;
        slot.value.as_ref()?;
        let index = u32::try_from(index).ok()?;
        Some(H::from_parts(index, slot.generation))
    }

    /// Returns the number of slots ever allocated, live or tombstoned.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates live handles and values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            let index = u32::try_from(index).ok()?;
            Some((H::from_parts(index, slot.generation), value))
        })
    }

    /// Iterates live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = H> + '_ {
        self.iter().map(|(handle, _)| handle)
    }
}

impl<T, H: ArenaHandle> Index<H> for Arena<T, H> {
    type Output = T;

    fn index(&self, handle: H) -> &T {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("stale handle {handle}"),
        }
    }
}

impl<T, H: ArenaHandle> IndexMut<H> for Arena<T, H> {
    fn index_mut(&mut self, handle: H) -> &mut T {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("stale handle {handle}"),
        }
    }
}

impl<T, H> fmt::Debug for Arena<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.slots.len())
            .field("live", &self.live)
            .finish()
    }
}
