//! Builder for constructing graphs programmatically.
//!
//! The front end that translates guest bytecode into IR is not part of this crate; this
//! builder is the programmatic front end used by the tests, the benches and embedders
//! that produce IR directly. It is useful for:
//!
//! - Writing unit tests for analyses and passes
//! - Creating fixtures with loops, try regions and phis without bytecode
//!
//! # Design
//!
//! Blocks are referred to by user-chosen numbers, so the CFG of a test reads like its
//! picture. Number `0` is the start block (constants and parameters); if it is never
//! declared, the start block falls through to the first declared block. Successors listed
//! as [`EXIT`] lead to the end block. Predecessor lists follow declaration order: edges
//! are added block by block, successor by successor, as declared.
//!
//! Phi inputs are given as `(predecessor number, value)` pairs and resolved to the
//! positional layout once every edge exists, so a loop phi can name values defined
//! further down in the loop body through [`GraphContext::phi_inputs`].
//!
//! ```rust,ignore
//! let built = GraphBuilder::new().build_with(|f| {
//!     let x = f.param(0, DataType::Int64);
//!     let one = f.int(1);
//!     let phi = f.block(1, &[2, 3], |b| {
//!         let phi = b.phi(DataType::Int64, &[]);
//!         let cmp = b.compare(ConditionCode::Lt, phi, x);
//!         b.if_imm(cmp);
//!         phi
//!     });
//!     let next = f.block(2, &[1], |b| b.add(phi, one));
//!     f.block(3, &[EXIT], |b| b.ret(phi));
//!     f.phi_inputs(phi, &[(0, one), (2, next)]);
//! })?;
//! ```

use rustc_hash::FxHashMap;

use crate::{
    ir::{
        block::{BlockFlags, BlockId},
        graph::{Graph, GraphFlags, TryRegion},
        instruction::{ConstValue, InstData, InstId},
        opcode::{ConditionCode, DataType, InstFlags, IntrinsicId, Opcode},
    },
    Error, Result,
};

/// Successor number standing for the end block.
pub const EXIT: usize = usize::MAX;

/// Builder for [`Graph`]s with numbered blocks.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
    blocks: FxHashMap<usize, BlockId>,
    declared: Vec<(usize, Vec<usize>)>,
    pending_phis: Vec<(InstId, Vec<(usize, InstId)>)>,
}

impl GraphBuilder {
    /// Creates a builder for an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph that will be linearized in guest pc order.
    #[must_use]
    pub fn bytecode_optimizer(mut self) -> Self {
        self.graph.flags |= GraphFlags::BYTECODE_OPTIMIZER;
        self
    }

    /// Builds the graph using a closure that defines all blocks.
    ///
    /// The value returned by the closure is handed back in [`BuiltGraph::values`], which
    /// is how tests get hold of the instructions they want to inspect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if a phi lacks an input for one of its block's
    /// predecessors or names a block that is not a predecessor.
    pub fn build_with<T, F>(mut self, f: F) -> Result<BuiltGraph<T>>
    where
        F: FnOnce(&mut GraphContext<'_>) -> T,
    {
        let values = {
            let mut ctx = GraphContext { builder: &mut self };
            f(&mut ctx)
        };
        self.finish(values)
    }

    fn block_id(&mut self, number: usize) -> BlockId {
        if number == 0 {
            return self.graph.start;
        }
        if number == EXIT {
            return match self.graph.end {
                Some(end) => end,
                None => self.graph.create_end_block(u32::MAX),
            };
        }
        if let Some(&block) = self.blocks.get(&number) {
            return block;
        }
        let pc = u32::try_from(number).unwrap_or(u32::MAX);
        let block = self.graph.create_block(pc);
        self.blocks.insert(number, block);
        block
    }

    fn number_of(&self, block: BlockId) -> Option<usize> {
        if block == self.graph.start {
            return Some(0);
        }
        if Some(block) == self.graph.end {
            return Some(EXIT);
        }
        self.blocks
            .iter()
            .find_map(|(&n, &b)| (b == block).then_some(n))
    }

    fn finish<T>(mut self, values: T) -> Result<BuiltGraph<T>> {
        let declared = std::mem::take(&mut self.declared);
        if !declared.iter().any(|(n, _)| *n == 0) {
            if let Some((first, _)) = declared.first() {
                let first = self.block_id(*first);
                self.graph.connect(self.graph.start, first);
            }
        }
        for (number, succs) in &declared {
            let block = self.block_id(*number);
            for &succ in succs {
                let succ = self.block_id(succ);
                self.graph.add_successor(block, succ, false);
            }
        }

        for (phi, pairs) in std::mem::take(&mut self.pending_phis) {
            let Some(block) = self.graph.inst(phi).block() else {
                return Err(Error::Precondition(format!("{phi} is not linked")));
            };
            let preds = self.graph.block(block).preds().to_vec();
            if preds.len() != pairs.len() {
                return Err(Error::Precondition(format!(
                    "{phi} has {} inputs but {block} has {} predecessors",
                    pairs.len(),
                    preds.len()
                )));
            }
            for pred in preds {
                let number = self.number_of(pred);
                let Some(&(_, value)) = pairs.iter().find(|(n, _)| Some(*n) == number) else {
                    return Err(Error::Precondition(format!(
                        "{phi} has no input for predecessor {pred}"
                    )));
                };
                self.graph.append_input(phi, value);
            }
        }

        Ok(BuiltGraph {
            graph: self.graph,
            blocks: self.blocks,
            values,
        })
    }
}

/// Context passed to the build closure for defining blocks.
pub struct GraphContext<'a> {
    builder: &'a mut GraphBuilder,
}

impl GraphContext<'_> {
    /// Creates a parameter in the start block.
    pub fn param(&mut self, index: u16, ty: DataType) -> InstId {
        self.builder.graph.create_param(index, ty)
    }

    /// Returns the 64-bit integer constant `value`.
    pub fn int(&mut self, value: i64) -> InstId {
        self.builder
            .graph
            .find_or_create_const(ConstValue::Int(value), DataType::Int64)
    }

    /// Returns a constant of any kind.
    pub fn constant(&mut self, value: ConstValue, ty: DataType) -> InstId {
        self.builder.graph.find_or_create_const(value, ty)
    }

    /// Defines block `number` with its successors and fills it through `body`.
    ///
    /// A block may be defined once; referring to a number before its definition creates
    /// it empty.
    ///
    /// # Panics
    ///
    /// Panics if the block was already defined.
    pub fn block<T>(
        &mut self,
        number: usize,
        succs: &[usize],
        body: impl FnOnce(&mut BlockContext<'_>) -> T,
    ) -> T {
        assert!(
            !self.builder.declared.iter().any(|(n, _)| *n == number),
            "block {number} defined twice"
        );
        self.builder.declared.push((number, succs.to_vec()));
        let block = self.builder.block_id(number);
        let mut ctx = BlockContext {
            builder: &mut *self.builder,
            block,
        };
        body(&mut ctx)
    }

    /// Returns the block behind `number`, creating it if needed.
    pub fn block_id(&mut self, number: usize) -> BlockId {
        self.builder.block_id(number)
    }

    /// Sets the phi inputs of a phi created without them.
    pub fn phi_inputs(&mut self, phi: InstId, inputs: &[(usize, InstId)]) {
        if let Some(entry) = self.builder.pending_phis.iter_mut().find(|(p, _)| *p == phi) {
            entry.1 = inputs.to_vec();
        } else {
            self.builder.pending_phis.push((phi, inputs.to_vec()));
        }
    }

    /// Appends catch-phi inputs as `(value, thrower)` pairs.
    pub fn catch_phi_inputs(&mut self, phi: InstId, inputs: &[(InstId, InstId)]) {
        for &(value, thrower) in inputs {
            self.builder.graph.append_catch_phi_input(phi, value, thrower);
        }
    }

    /// Declares a try region.
    ///
    /// `begin` gets the try-begin flag, `end` the try-end flag, every block of `body`
    /// (which should include `begin` and `end`) joins the region, and every handler is
    /// flagged as a catch-begin block.
    pub fn try_region(
        &mut self,
        id: u32,
        begin: usize,
        end: usize,
        body: &[usize],
        handlers: &[usize],
    ) {
        let begin = self.builder.block_id(begin);
        let end = self.builder.block_id(end);
        let body: Vec<BlockId> = body.iter().map(|&n| self.builder.block_id(n)).collect();
        let handlers: Vec<BlockId> = handlers.iter().map(|&n| self.builder.block_id(n)).collect();
        let graph = &mut self.builder.graph;
        for block in body {
            graph.add_block_flags(block, BlockFlags::TRY);
            graph.set_try_id(block, Some(id));
        }
        graph.add_block_flags(begin, BlockFlags::TRY_BEGIN);
        graph.add_block_flags(end, BlockFlags::TRY_END);
        for &handler in &handlers {
            graph.add_block_flags(handler, BlockFlags::CATCH_BEGIN | BlockFlags::CATCH);
        }
        graph.add_try_region(TryRegion {
            id,
            begin,
            end: Some(end),
            handlers,
        });
    }

    /// Flags blocks as part of an exception handler.
    pub fn catch_blocks(&mut self, blocks: &[usize]) {
        for &number in blocks {
            let block = self.builder.block_id(number);
            self.builder.graph.add_block_flags(block, BlockFlags::CATCH);
        }
    }

    /// Sets the profile weight of a block.
    pub fn frequency(&mut self, number: usize, frequency: u32) {
        let block = self.builder.block_id(number);
        self.builder.graph.set_frequency(block, frequency);
    }

    /// Records the guest method dimensions.
    pub fn method_info(&mut self, bytecode_size: usize, vreg_count: usize) {
        self.builder.graph.set_method_info(bytecode_size, vreg_count);
    }

    /// Gives direct access to the graph under construction.
    pub fn graph(&mut self) -> &mut Graph {
        &mut self.builder.graph
    }
}

/// Context passed to a block body for appending instructions.
pub struct BlockContext<'a> {
    builder: &'a mut GraphBuilder,
    block: BlockId,
}

impl BlockContext<'_> {
    /// Returns the block being filled.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.block
    }

    /// Appends an instruction with the given payload and inputs.
    pub fn inst(
        &mut self,
        opcode: Opcode,
        ty: DataType,
        data: InstData,
        inputs: &[InstId],
    ) -> InstId {
        let graph = &mut self.builder.graph;
        let inst = graph.create_inst_with(opcode, ty, data, inputs);
        let pc = graph.block(self.block).pc();
        graph.inst_mut(inst).pc = pc;
        graph.append_inst(self.block, inst);
        inst
    }

    /// Appends a phi; inputs are `(predecessor number, value)` pairs, or empty to be
    /// supplied later through [`GraphContext::phi_inputs`].
    pub fn phi(&mut self, ty: DataType, inputs: &[(usize, InstId)]) -> InstId {
        let phi = self.inst(Opcode::Phi, ty, InstData::None, &[]);
        self.builder.pending_phis.push((phi, inputs.to_vec()));
        phi
    }

    /// Appends a catch-phi; inputs are `(value, thrower)` pairs.
    pub fn catch_phi(&mut self, ty: DataType, inputs: &[(InstId, InstId)]) -> InstId {
        let phi = self.inst(Opcode::CatchPhi, ty, InstData::None, &[]);
        for &(value, thrower) in inputs {
            self.builder.graph.append_catch_phi_input(phi, value, thrower);
        }
        phi
    }

    /// Appends a binary arithmetic instruction typed like its first input.
    pub fn binary(&mut self, opcode: Opcode, lhs: InstId, rhs: InstId) -> InstId {
        let ty = self.builder.graph.inst(lhs).ty();
        self.inst(opcode, ty, InstData::None, &[lhs, rhs])
    }

    /// Appends `lhs + rhs`.
    pub fn add(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Add, lhs, rhs)
    }

    /// Appends `lhs - rhs`.
    pub fn sub(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Sub, lhs, rhs)
    }

    /// Appends `lhs * rhs`.
    pub fn mul(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Mul, lhs, rhs)
    }

    /// Appends a boolean comparison.
    pub fn compare(&mut self, cc: ConditionCode, lhs: InstId, rhs: InstId) -> InstId {
        self.inst(
            Opcode::Compare,
            DataType::Bool,
            InstData::Condition(cc),
            &[lhs, rhs],
        )
    }

    /// Appends a two-input conditional branch.
    pub fn if_cmp(&mut self, cc: ConditionCode, lhs: InstId, rhs: InstId) -> InstId {
        self.inst(Opcode::If, DataType::Void, InstData::Condition(cc), &[lhs, rhs])
    }

    /// Appends a branch taken when `cond` is non-zero.
    pub fn if_imm(&mut self, cond: InstId) -> InstId {
        self.inst(
            Opcode::IfImm,
            DataType::Void,
            InstData::ConditionImm {
                cc: ConditionCode::Ne,
                imm: 0,
            },
            &[cond],
        )
    }

    /// Appends a boolean literal intrinsic.
    pub fn literal(&mut self, value: bool) -> InstId {
        let id = if value {
            IntrinsicId::LiteralTrue
        } else {
            IntrinsicId::LiteralFalse
        };
        self.inst(
            Opcode::Intrinsic,
            DataType::Bool,
            InstData::Intrinsic(id),
            &[],
        )
    }

    /// Appends a save-state capturing `values` in virtual registers `0..`.
    pub fn save_state(&mut self, values: &[InstId]) -> InstId {
        let vregs = (0..values.len())
            .map(|i| u16::try_from(i).unwrap_or(u16::MAX))
            .collect();
        self.inst(
            Opcode::SaveState,
            DataType::Void,
            InstData::SaveState(vregs),
            values,
        )
    }

    /// Appends a static call; `state` becomes the last input.
    pub fn call(&mut self, method: u32, ty: DataType, args: &[InstId], state: InstId) -> InstId {
        let mut inputs = args.to_vec();
        inputs.push(state);
        self.inst(Opcode::CallStatic, ty, InstData::Call(method), &inputs)
    }

    /// Appends a null check of `value`.
    pub fn null_check(&mut self, value: InstId, state: InstId) -> InstId {
        self.inst(
            Opcode::NullCheck,
            DataType::Reference,
            InstData::None,
            &[value, state],
        )
    }

    /// Appends a null check performed by a hardware trap at its first user.
    pub fn implicit_null_check(&mut self, value: InstId, state: InstId) -> InstId {
        let check = self.null_check(value, state);
        self.builder
            .graph
            .add_inst_flags(check, InstFlags::IMPLICIT_NULL_CHECK);
        check
    }

    /// Appends a field load.
    pub fn load_object(&mut self, object: InstId, field: u32, ty: DataType) -> InstId {
        self.inst(Opcode::LoadObject, ty, InstData::Field(field), &[object])
    }

    /// Appends a field store.
    pub fn store_object(&mut self, object: InstId, field: u32, value: InstId) -> InstId {
        self.inst(
            Opcode::StoreObject,
            DataType::Void,
            InstData::Field(field),
            &[object, value],
        )
    }

    /// Appends a safepoint.
    pub fn safepoint(&mut self) -> InstId {
        self.inst(Opcode::SafePoint, DataType::Void, InstData::None, &[])
    }

    /// Appends a `Try` whose handlers catch the given types (`None` catches all).
    pub fn try_inst(&mut self, catch_types: &[Option<u32>]) -> InstId {
        self.inst(
            Opcode::Try,
            DataType::Void,
            InstData::Try(catch_types.to_vec()),
            &[],
        )
    }

    /// Appends a throw of `exception` with an optionally known type.
    pub fn throw(&mut self, exception: InstId, ty: Option<u32>, state: InstId) -> InstId {
        self.inst(
            Opcode::Throw,
            DataType::Void,
            InstData::Throw(ty),
            &[exception, state],
        )
    }

    /// Appends a value return.
    pub fn ret(&mut self, value: InstId) -> InstId {
        let ty = self.builder.graph.inst(value).ty();
        self.inst(Opcode::Return, ty, InstData::None, &[value])
    }

    /// Appends a void return.
    pub fn ret_void(&mut self) -> InstId {
        self.inst(Opcode::ReturnVoid, DataType::Void, InstData::None, &[])
    }
}

/// A graph produced by [`GraphBuilder`] with its block numbering.
#[derive(Debug)]
pub struct BuiltGraph<T = ()> {
    /// The built graph.
    pub graph: Graph,
    /// Whatever the build closure returned.
    pub values: T,
    blocks: FxHashMap<usize, BlockId>,
}

impl<T> BuiltGraph<T> {
    /// Returns the block built for `number`.
    ///
    /// # Panics
    ///
    /// Panics if no block was created for `number`.
    #[must_use]
    pub fn block(&self, number: usize) -> BlockId {
        if number == 0 {
            return self.graph.start_block();
        }
        if number == EXIT {
            if let Some(end) = self.graph.end_block() {
                return end;
            }
        }
        match self.blocks.get(&number) {
            Some(&block) => block,
            None => panic!("no block numbered {number}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_orders_preds_by_declaration() -> Result<()> {
        let built = GraphBuilder::new().build_with(|f| {
            f.block(1, &[3], |_| ());
            f.block(2, &[3], |_| ());
            f.block(3, &[EXIT], |b| b.ret_void());
        })?;
        let graph = &built.graph;
        assert_eq!(graph.block(graph.start_block()).succs(), &[built.block(1)]);
        assert_eq!(
            graph.block(built.block(3)).preds(),
            &[built.block(1), built.block(2)]
        );
        assert_eq!(graph.block(built.block(EXIT)).preds(), &[built.block(3)]);
        Ok(())
    }

    #[test]
    fn test_builder_resolves_phi_inputs_by_pred() -> Result<()> {
        let built = GraphBuilder::new().build_with(|f| {
            let a = f.int(1);
            let b = f.int(2);
            f.block(0, &[1, 2], |_| ());
            f.block(1, &[3], |_| ());
            f.block(2, &[3], |_| ());
            let phi = f.block(3, &[EXIT], |blk| {
                let phi = blk.phi(DataType::Int64, &[(2, b), (1, a)]);
                blk.ret(phi);
                phi
            });
            (a, b, phi)
        })?;
        let (a, b, phi) = built.values;
        assert_eq!(built.graph.inst(phi).inputs(), &[a, b]);
        Ok(())
    }

    #[test]
    fn test_builder_rejects_missing_phi_input() {
        let result = GraphBuilder::new().build_with(|f| {
            let a = f.int(1);
            f.block(1, &[3], |_| ());
            f.block(2, &[3], |_| ());
            f.block(3, &[EXIT], |blk| {
                let phi = blk.phi(DataType::Int64, &[(1, a)]);
                blk.ret(phi);
            });
        });
        assert!(matches!(result, Err(Error::Precondition(_))));
    }
}
