//! Scoped visitation tags over blocks and instructions.
//!
//! Traversals that need "visited" or "on stack" sets acquire a [`Marker`] from the graph.
//! A marker owns its tag bits and does not borrow the graph, so the graph can be mutated
//! while it is alive. Markers are released when dropped; releasing them out of
//! acquisition order is a programming error and panics.
//!
//! ```rust,ignore
//! let mut visited = graph.new_marker();
//! for block in graph.blocks() {
//!     if visited.mark_block(block) {
//!         // first visit
//!     }
//! }
//! ```

use std::{cell::RefCell, rc::Rc};

use crate::{
    ir::{BlockId, Graph, InstId},
    utils::BitSet,
};

/// Maximum number of markers that may be alive at once for one graph.
pub const MAX_MARKERS: usize = 8;

#[derive(Debug, Default)]
struct PoolState {
    live: Vec<u32>,
    next_serial: u32,
}

/// Per-graph bookkeeping of live markers.
///
/// Cloning a graph gives the clone an empty pool: markers of the original do not apply
/// to it.
#[derive(Debug, Default)]
pub(crate) struct MarkerPool {
    state: Rc<RefCell<PoolState>>,
}

impl Clone for MarkerPool {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl MarkerPool {
    fn acquire(&self) -> Marker {
        let serial = {
            let mut state = self.state.borrow_mut();
            assert!(
                state.live.len() < MAX_MARKERS,
                "too many live markers (limit {MAX_MARKERS})"
            );
            let serial = state.next_serial;
            state.next_serial = state.next_serial.wrapping_add(1);
            state.live.push(serial);
            serial
        };
        Marker {
            pool: Rc::clone(&self.state),
            serial,
            blocks: BitSet::default(),
            insts: BitSet::default(),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.state.borrow().live.len()
    }
}

/// A tag over blocks and instructions, released on drop.
#[derive(Debug)]
pub struct Marker {
    pool: Rc<RefCell<PoolState>>,
    serial: u32,
    blocks: BitSet,
    insts: BitSet,
}

impl Marker {
    /// Tags a block. Returns `true` if it was not tagged before.
    pub fn mark_block(&mut self, block: BlockId) -> bool {
        self.blocks.insert(block.index())
    }

    /// Returns `true` if the block is tagged.
    #[must_use]
    pub fn is_block_marked(&self, block: BlockId) -> bool {
        self.blocks.contains(block.index())
    }

    /// Removes the tag of a block. Returns `true` if it was tagged.
    pub fn unmark_block(&mut self, block: BlockId) -> bool {
        self.blocks.remove(block.index())
    }

    /// Tags an instruction. Returns `true` if it was not tagged before.
    pub fn mark_inst(&mut self, inst: InstId) -> bool {
        self.insts.insert(inst.index())
    }

    /// Returns `true` if the instruction is tagged.
    #[must_use]
    pub fn is_inst_marked(&self, inst: InstId) -> bool {
        self.insts.contains(inst.index())
    }

    /// Removes the tag of an instruction. Returns `true` if it was tagged.
    pub fn unmark_inst(&mut self, inst: InstId) -> bool {
        self.insts.remove(inst.index())
    }

    /// Returns the number of tagged blocks.
    #[must_use]
    pub fn marked_block_count(&self) -> usize {
        self.blocks.count()
    }
}

impl Drop for Marker {
    fn drop(&mut self) {
        let mut state = self.pool.borrow_mut();
        let top = state.live.pop();
        if top != Some(self.serial) && !std::thread::panicking() {
            panic!("markers must be released in reverse acquisition order");
        }
    }
}

impl Graph {
    /// Acquires a fresh marker.
    ///
    /// # Panics
    ///
    /// Panics if [`MAX_MARKERS`] markers are already alive for this graph.
    #[must_use]
    pub fn new_marker(&self) -> Marker {
        self.markers.acquire()
    }

    /// Returns the number of markers currently alive.
    #[must_use]
    pub fn live_markers(&self) -> usize {
        self.markers.live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_tags_are_independent() {
        let graph = Graph::new();
        let start = graph.start_block();
        let mut a = graph.new_marker();
        let b = graph.new_marker();

        assert!(a.mark_block(start));
        assert!(!a.mark_block(start));
        assert!(a.is_block_marked(start));
        assert!(!b.is_block_marked(start));
        assert_eq!(graph.live_markers(), 2);

        drop(b);
        drop(a);
        assert_eq!(graph.live_markers(), 0);
    }

    #[test]
    fn test_marker_released_on_scope_exit() {
        let graph = Graph::new();
        {
            let _m = graph.new_marker();
            assert_eq!(graph.live_markers(), 1);
        }
        assert_eq!(graph.live_markers(), 0);
    }

    #[test]
    #[should_panic(expected = "reverse acquisition order")]
    fn test_marker_out_of_order_release_panics() {
        let graph = Graph::new();
        let first = graph.new_marker();
        let _second = graph.new_marker();
        drop(first);
    }

    #[test]
    #[should_panic(expected = "too many live markers")]
    fn test_marker_limit() {
        let graph = Graph::new();
        let _held: Vec<Marker> = (0..=MAX_MARKERS).map(|_| graph.new_marker()).collect();
    }

    #[test]
    fn test_cloned_graph_has_fresh_pool() {
        let graph = Graph::new();
        let _m = graph.new_marker();
        let copy = graph.clone();
        assert_eq!(copy.live_markers(), 0);
    }
}
