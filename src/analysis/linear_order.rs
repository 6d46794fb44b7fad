//! Block emission order for register allocation and code generation.
//!
//! In optimizing mode the order is a reverse postorder in which every loop, inner loops
//! included, occupies a contiguous range starting at its header, and blocks dominated
//! by an exception handler entry are pushed to the end of their loop level. In
//! bytecode-preserving mode blocks keep their guest pc order.
//!
//! After ordering, every block whose fall-through successor does not come next gets
//! [`BlockFlags::NEEDS_JUMP`].

use crate::{
    analysis::{Analysis, AnalysisKind, CfgEdit, LoopId},
    ir::{BlockFlags, BlockId, Graph, GraphFlags},
    utils::graph::{algorithms::reverse_postorder, GraphBase, NodeId, Successors},
    Result,
};

/// How blocks are linearized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearOrderMode {
    /// Loop-contiguous reverse postorder.
    Optimizing {
        /// Visit the colder successor of a branch first so the hotter one falls through.
        freq_reorder: bool,
    },
    /// Start block, blocks by guest pc, end block.
    BytecodePreserving,
}

impl LinearOrderMode {
    /// Selects the mode recorded in the graph flags.
    #[must_use]
    pub fn for_graph(graph: &Graph) -> Self {
        if graph.flags().contains(GraphFlags::BYTECODE_OPTIMIZER) {
            LinearOrderMode::BytecodePreserving
        } else {
            LinearOrderMode::Optimizing {
                freq_reorder: graph.flags().contains(GraphFlags::FREQ_BRANCH_REORDER),
            }
        }
    }
}

/// Linear order cached in the graph.
pub struct LinearOrderAnalysis;

impl Analysis for LinearOrderAnalysis {
    const KIND: AnalysisKind = AnalysisKind::LinearOrder;

    fn try_incremental_update(_graph: &mut Graph, _edit: &CfgEdit) -> bool {
        false
    }

    fn force_recompute(graph: &mut Graph) -> Result<()> {
        let order = match LinearOrderMode::for_graph(graph) {
            LinearOrderMode::BytecodePreserving => pc_order(graph),
            LinearOrderMode::Optimizing { freq_reorder } => {
                let rpo = if freq_reorder {
                    let entry = Graph::node(graph.start_block());
                    reverse_postorder(&FrequencyOrdered(graph), entry)
                        .into_iter()
                        .map(|node| graph.block_of_node(node))
                        .collect()
                } else {
                    graph.rpo.clone()
                };
                LoopLinearizer::new(graph).linearize(&rpo)
            }
        };
        assign_needs_jump(graph, &order);
        log::debug!("linear order: {order:?}");
        graph.linear_order = order;
        Ok(())
    }
}

/// Successor view of the graph that visits the colder branch target first.
struct FrequencyOrdered<'a>(&'a Graph);

impl GraphBase for FrequencyOrdered<'_> {
    fn node_count(&self) -> usize {
        self.0.node_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.0.node_ids()
    }
}

impl Successors for FrequencyOrdered<'_> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        let block = self.0.block(self.0.block_of_node(node));
        let mut succs: Vec<BlockId> = block.succs().to_vec();
        if let [hot, cold] = succs.as_slice() {
            if self.0.block(*cold).frequency() < self.0.block(*hot).frequency() {
                succs.swap(0, 1);
            }
        }
        succs.into_iter().map(Graph::node)
    }
}

fn pc_order(graph: &Graph) -> Vec<BlockId> {
    let start = graph.start_block();
    let end = graph.end_block();
    let mut body: Vec<BlockId> = graph
        .rpo
        .iter()
        .copied()
        .filter(|&b| b != start && Some(b) != end)
        .collect();
    body.sort_by_key(|&b| (graph.block(b).pc(), b.index()));

    let mut order = Vec::with_capacity(body.len() + 2);
    order.push(start);
    order.extend(body);
    if let Some(end) = end.filter(|e| graph.rpo.contains(e)) {
        order.push(end);
    }
    order
}

#[derive(Debug, Clone, Copy)]
enum Item {
    Block(BlockId),
    Loop(LoopId),
}

struct Frame {
    lp: LoopId,
    cursor: usize,
    deferred: Vec<Item>,
    drained: usize,
}

/// Emits each loop contiguously by walking the loop tree with an explicit frame stack.
struct LoopLinearizer<'a> {
    graph: &'a Graph,
    loop_seen: Vec<bool>,
}

impl<'a> LoopLinearizer<'a> {
    fn new(graph: &'a Graph) -> Self {
        Self {
            graph,
            loop_seen: vec![false; graph.loops.len()],
        }
    }

    fn linearize(mut self, rpo: &[BlockId]) -> Vec<BlockId> {
        let Some(root) = self.graph.root_loop() else {
            return rpo.to_vec();
        };
        let mut seen = self.graph.new_marker();
        let mut order = Vec::with_capacity(rpo.len());
        let mut frames = vec![Frame {
            lp: root,
            cursor: 0,
            deferred: Vec::new(),
            drained: 0,
        }];

        while let Some(frame) = frames.last_mut() {
            if frame.cursor < rpo.len() {
                let block = rpo[frame.cursor];
                frame.cursor += 1;
                if seen.is_block_marked(block) {
                    continue;
                }
                let Some(item) = self.item_for(block, frame.lp) else {
                    continue;
                };
                if let Item::Loop(child) = item {
                    if self.loop_seen[child.index()] {
                        continue;
                    }
                    self.loop_seen[child.index()] = true;
                } else {
                    seen.mark_block(block);
                }
                if self.is_catch_dominated(block) {
                    frame.deferred.push(item);
                    continue;
                }
                match item {
                    Item::Block(block) => order.push(block),
                    Item::Loop(child) => frames.push(Self::frame(child)),
                }
            } else if frame.drained < frame.deferred.len() {
                let item = frame.deferred[frame.drained];
                frame.drained += 1;
                match item {
                    Item::Block(block) => order.push(block),
                    Item::Loop(child) => frames.push(Self::frame(child)),
                }
            } else {
                frames.pop();
            }
        }
        order
    }

    fn frame(lp: LoopId) -> Frame {
        Frame {
            lp,
            cursor: 0,
            deferred: Vec::new(),
            drained: 0,
        }
    }

    /// Classifies `block` relative to the loop being emitted.
    fn item_for(&self, block: BlockId, lp: LoopId) -> Option<Item> {
        let owner = self.graph.block(block).loop_id()?;
        if owner == lp {
            return Some(Item::Block(block));
        }
        if !self.graph.is_inside(owner, lp) {
            return None;
        }
        let mut child = owner;
        while let Some(outer) = self.graph.get_loop(child).outer() {
            if outer == lp {
                break;
            }
            child = outer;
        }
        Some(Item::Loop(child))
    }

    fn is_catch_dominated(&self, block: BlockId) -> bool {
        let mut current = Some(block);
        while let Some(b) = current {
            if self.graph.block(b).is_catch_begin() {
                return true;
            }
            current = self.graph.block(b).dominator();
        }
        false
    }
}

/// Sets [`BlockFlags::NEEDS_JUMP`] on every block of `order` whose fall-through
/// successor is not the next block.
pub(crate) fn assign_needs_jump(graph: &mut Graph, order: &[BlockId]) {
    let blocks: Vec<BlockId> = graph.blocks().collect();
    for block in blocks {
        graph.clear_block_flags(block, BlockFlags::NEEDS_JUMP);
    }
    for (i, &block) in order.iter().enumerate() {
        if needs_jump(graph, block, order.get(i + 1).copied()) {
            graph.add_block_flags(block, BlockFlags::NEEDS_JUMP);
        }
    }
}

/// Returns `true` if `block` must jump to its fall-through successor when `next` is
/// emitted right after it.
pub(crate) fn needs_jump(graph: &Graph, block: BlockId, next: Option<BlockId>) -> bool {
    let succs = graph.block(block).succs();
    let fall_through = match succs {
        [only] => *only,
        [_, on_false] => *on_false,
        _ => return false,
    };
    if graph.block(fall_through).is_end() {
        return false;
    }
    next != Some(fall_through)
}
