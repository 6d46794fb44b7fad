//! Instructions, their payloads and def-use links.

use std::fmt;

use crate::{
    ir::{
        arena::define_handle,
        opcode::{ConditionCode, DataType, InstFlags, IntrinsicId, Opcode},
        BlockId,
    },
    regalloc::Location,
};

define_handle!(
    /// Handle of an instruction in a [`crate::ir::Graph`].
    InstId,
    "v"
);

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    /// Integer of any width.
    Int(i64),
    /// IEEE-754 double, stored by bit pattern so constants can be hashed.
    Float(u64),
    /// Boolean.
    Bool(bool),
    /// Null reference.
    Null,
}

impl ConstValue {
    /// Builds a float constant from its value.
    #[must_use]
    pub fn float(value: f64) -> Self {
        ConstValue::Float(value.to_bits())
    }

    /// Interprets the constant as an integer for condition evaluation.
    ///
    /// Booleans map to 0/1 and null to 0; floats have no integer view.
    #[must_use]
    pub const fn as_int(self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(v),
            ConstValue::Bool(b) => Some(b as i64),
            ConstValue::Null => Some(0),
            ConstValue::Float(_) => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::Null => write!(f, "null"),
        }
    }
}

/// Why a spill/fill instruction was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SpillFillKind {
    /// Joins two split siblings of one interval inside a block.
    ConnectSiblings,
    /// Reconciles locations along a control-flow edge.
    ResolveEdge,
}

/// One register/stack move of a [`Opcode::SpillFill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpillFillMove {
    /// Where the value currently is.
    pub src: Location,
    /// Where the value must go.
    pub dst: Location,
    /// Type of the moved value.
    pub ty: DataType,
}

/// Opcode-specific payload of an instruction.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InstData {
    /// No payload.
    #[default]
    None,
    /// Value of a [`Opcode::Constant`].
    Constant(ConstValue),
    /// Argument index of a [`Opcode::Parameter`].
    Parameter(u16),
    /// Condition of a [`Opcode::Compare`] or [`Opcode::If`].
    Condition(ConditionCode),
    /// Condition and immediate of a [`Opcode::IfImm`].
    ConditionImm {
        /// The condition.
        cc: ConditionCode,
        /// The immediate right-hand operand.
        imm: i64,
    },
    /// Identity of an [`Opcode::Intrinsic`].
    Intrinsic(IntrinsicId),
    /// Callee method id of a call.
    Call(u32),
    /// Field id of an object load or store.
    Field(u32),
    /// Statically known exception type of a [`Opcode::Throw`], if any.
    Throw(Option<u32>),
    /// Exception type per handler of a [`Opcode::Try`], in handler successor order.
    /// `None` catches everything.
    Try(Vec<Option<u32>>),
    /// Virtual register number per input of a [`Opcode::SaveState`].
    SaveState(Vec<u16>),
    /// Moves of a [`Opcode::SpillFill`].
    SpillFill {
        /// Why the instruction exists.
        kind: SpillFillKind,
        /// The moves, performed in parallel.
        moves: Vec<SpillFillMove>,
    },
}

/// A use of an instruction: the user and the input slot holding the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct User {
    /// The using instruction.
    pub inst: InstId,
    /// Index into the user's inputs.
    pub index: usize,
}

/// An IR instruction.
///
/// Instructions are created by [`crate::ir::Graph::create_inst`] and owned by the graph.
/// Inputs and users are maintained in pairs by the graph: every input `v` at index `i` of
/// instruction `u` has a matching [`User`] `{ inst: u, index: i }` in `v`'s users.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) id: InstId,
    pub(crate) opcode: Opcode,
    pub(crate) ty: DataType,
    pub(crate) block: Option<BlockId>,
    pub(crate) prev: Option<InstId>,
    pub(crate) next: Option<InstId>,
    pub(crate) inputs: Vec<InstId>,
    pub(crate) users: Vec<User>,
    /// Throwing instruction per input, catch-phis only.
    pub(crate) throwers: Vec<InstId>,
    pub(crate) data: InstData,
    pub(crate) pc: u32,
    pub(crate) extra_flags: InstFlags,
}

impl Instruction {
    pub(crate) fn new(id: InstId, opcode: Opcode, ty: DataType, pc: u32) -> Self {
        Self {
            id,
            opcode,
            ty,
            block: None,
            prev: None,
            next: None,
            inputs: Vec::new(),
            users: Vec::new(),
            throwers: Vec::new(),
            data: InstData::None,
            pc,
            extra_flags: InstFlags::empty(),
        }
    }

    /// Returns the handle of this instruction.
    #[must_use]
    pub fn id(&self) -> InstId {
        self.id
    }

    /// Returns the opcode.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the type of the produced value.
    #[must_use]
    pub fn ty(&self) -> DataType {
        self.ty
    }

    /// Returns the owning block, or `None` while unlinked.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Returns the previous instruction of the same sub-list.
    #[must_use]
    pub fn prev(&self) -> Option<InstId> {
        self.prev
    }

    /// Returns the next instruction of the same sub-list.
    #[must_use]
    pub fn next(&self) -> Option<InstId> {
        self.next
    }

    /// Returns the data-flow inputs.
    #[must_use]
    pub fn inputs(&self) -> &[InstId] {
        &self.inputs
    }

    /// Returns the input at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn input(&self, index: usize) -> InstId {
        self.inputs[index]
    }

    /// Returns the users of this instruction's value.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Returns `true` if any instruction uses this value.
    #[must_use]
    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    /// Returns the throwing instruction per input of a catch-phi.
    #[must_use]
    pub fn throwers(&self) -> &[InstId] {
        &self.throwers
    }

    /// Returns the opcode-specific payload.
    #[must_use]
    pub fn data(&self) -> &InstData {
        &self.data
    }

    /// Returns the guest program counter.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Returns the opcode flags combined with per-instruction flags.
    #[must_use]
    pub fn flags(&self) -> InstFlags {
        self.opcode.flags() | self.extra_flags
    }

    /// Returns `true` for phis and catch-phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        self.opcode.is_phi()
    }

    /// Returns `true` for catch-phis.
    #[must_use]
    pub fn is_catch_phi(&self) -> bool {
        self.opcode == Opcode::CatchPhi
    }

    /// Returns the constant value of a [`Opcode::Constant`].
    #[must_use]
    pub fn const_value(&self) -> Option<ConstValue> {
        match (self.opcode, &self.data) {
            (Opcode::Constant, InstData::Constant(value)) => Some(*value),
            _ => None,
        }
    }

    /// Returns the boolean this instruction is statically known to produce, if any.
    ///
    /// Recognizes integer/boolean constants and the literal intrinsics.
    #[must_use]
    pub fn static_bool(&self) -> Option<bool> {
        match (self.opcode, &self.data) {
            (Opcode::Constant, InstData::Constant(value)) => value.as_int().map(|v| v != 0),
            (Opcode::Intrinsic, InstData::Intrinsic(IntrinsicId::LiteralTrue)) => Some(true),
            (Opcode::Intrinsic, InstData::Intrinsic(IntrinsicId::LiteralFalse)) => Some(false),
            _ => None,
        }
    }

    /// Returns the condition code of a compare or branch.
    #[must_use]
    pub fn condition(&self) -> Option<ConditionCode> {
        match &self.data {
            InstData::Condition(cc) | InstData::ConditionImm { cc, .. } => Some(*cc),
            _ => None,
        }
    }

    /// Returns `true` if dead-code elimination may delete the instruction.
    #[must_use]
    pub fn is_removable(&self) -> bool {
        !self.flags().contains(InstFlags::NO_DCE)
    }

    /// Returns `true` if the instruction may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        self.flags().contains(InstFlags::CAN_THROW)
    }

    /// Returns `true` if the instruction carries deoptimization state.
    #[must_use]
    pub fn requires_state(&self) -> bool {
        self.flags().contains(InstFlags::REQUIRE_STATE)
    }

    /// Returns `true` if the instruction is a call clobbering caller-saved registers.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.flags().contains(InstFlags::CALL)
    }

    /// Returns `true` if the instruction produces a value that needs a location.
    #[must_use]
    pub fn has_dst(&self) -> bool {
        self.ty != DataType::Void && !self.flags().contains(InstFlags::NO_DST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaHandle;

    fn inst(opcode: Opcode, data: InstData) -> Instruction {
        let mut inst = Instruction::new(InstId::from_parts(0, 0), opcode, DataType::Bool, 0);
        inst.data = data;
        inst
    }

    #[test]
    fn test_static_bool_recognizes_literals() {
        let t = inst(Opcode::Intrinsic, InstData::Intrinsic(IntrinsicId::LiteralTrue));
        let f = inst(Opcode::Constant, InstData::Constant(ConstValue::Int(0)));
        let other = inst(Opcode::Intrinsic, InstData::Intrinsic(IntrinsicId::Runtime(3)));
        let float = inst(Opcode::Constant, InstData::Constant(ConstValue::float(1.0)));

        assert_eq!(t.static_bool(), Some(true));
        assert_eq!(f.static_bool(), Some(false));
        assert_eq!(other.static_bool(), None);
        assert_eq!(float.static_bool(), None);
    }

    #[test]
    fn test_flags_merge_extra() {
        let mut check = inst(Opcode::NullCheck, InstData::None);
        assert!(check.can_throw());
        assert!(!check.is_removable());
        assert!(!check.flags().contains(InstFlags::IMPLICIT_NULL_CHECK));

        check.extra_flags |= InstFlags::IMPLICIT_NULL_CHECK;
        assert!(check.flags().contains(InstFlags::IMPLICIT_NULL_CHECK));
    }

    #[test]
    fn test_const_display() {
        assert_eq!(ConstValue::Int(-3).to_string(), "-3");
        assert_eq!(ConstValue::float(1.5).to_string(), "1.5");
        assert_eq!(ConstValue::Null.to_string(), "null");
    }
}
