//! Opcodes, data types, condition codes and per-opcode properties.

use bitflags::bitflags;
use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

bitflags! {
    /// Static and per-instruction properties consulted by the analyses and passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstFlags: u16 {
        /// Never removed by dead-code elimination, even without users.
        const NO_DCE = 1 << 0;
        /// May raise an exception and transfer control to a catch handler.
        const CAN_THROW = 1 << 1;
        /// Carries a save-state input describing the interpreter frame for deoptimization.
        const REQUIRE_STATE = 1 << 2;
        /// Clobbers caller-saved registers.
        const CALL = 1 << 3;
        /// Ends a basic block.
        const TERMINATOR = 1 << 4;
        /// Must not be moved out of its block.
        const NO_HOIST = 1 << 5;
        /// A null check performed by a hardware trap at the next memory access.
        const IMPLICIT_NULL_CHECK = 1 << 6;
        /// Produces no value, so it gets no life interval.
        const NO_DST = 1 << 7;
    }
}

/// The operation performed by an instruction.
///
/// The set is modeled on a register-based bytecode VM; only the properties that the
/// analyses and rewrites depend on are encoded (see [`Opcode::flags`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumCount,
    IntoStaticStr,
)]
pub enum Opcode {
    /// Compile-time constant, created in the start block.
    Constant,
    /// Incoming method argument, created in the start block.
    Parameter,
    /// The null reference.
    NullPtr,
    /// Merge of values per predecessor edge.
    Phi,
    /// Merge of values per throwing instruction at a catch handler entry.
    CatchPhi,
    /// Snapshot of the virtual registers used to rebuild an interpreter frame.
    SaveState,
    /// Runtime poll point placed in loop headers.
    SafePoint,
    /// Throws on a null reference.
    NullCheck,
    /// Throws on an out-of-range index.
    BoundsCheck,
    /// Throws on a zero divisor.
    ZeroCheck,
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Not,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Produces a boolean from comparing two inputs.
    Compare,
    /// Two-way branch comparing two inputs.
    If,
    /// Two-way branch comparing one input against an immediate.
    IfImm,
    /// Returns a value.
    Return,
    /// Returns without a value.
    ReturnVoid,
    /// Raises an exception object.
    Throw,
    /// Opens a try region; its block's successors past the first are the handlers.
    Try,
    /// Statically bound call.
    CallStatic,
    /// Virtual dispatch call.
    CallVirtual,
    /// Runtime intrinsic, including the boolean literals.
    Intrinsic,
    /// Field load.
    LoadObject,
    /// Field store.
    StoreObject,
    /// Array element load.
    LoadArray,
    /// Array element store.
    StoreArray,
    /// Object allocation.
    NewObject,
    /// Parallel register/stack moves inserted by register allocation.
    SpillFill,
}

impl Opcode {
    /// Returns the static properties of the opcode.
    #[must_use]
    pub const fn flags(self) -> InstFlags {
        match self {
            Opcode::Parameter => InstFlags::NO_DCE,
            Opcode::SaveState => InstFlags::NO_DST,
            Opcode::SafePoint => InstFlags::NO_DCE
                .union(InstFlags::NO_HOIST)
                .union(InstFlags::NO_DST),
            Opcode::NullCheck | Opcode::BoundsCheck | Opcode::ZeroCheck => InstFlags::NO_DCE
                .union(InstFlags::CAN_THROW)
                .union(InstFlags::REQUIRE_STATE)
                .union(InstFlags::NO_HOIST),
            Opcode::If | Opcode::IfImm | Opcode::ReturnVoid | Opcode::Try => InstFlags::NO_DCE
                .union(InstFlags::TERMINATOR)
                .union(InstFlags::NO_DST),
            Opcode::Return => InstFlags::NO_DCE
                .union(InstFlags::TERMINATOR)
                .union(InstFlags::NO_DST),
            Opcode::Throw => InstFlags::NO_DCE
                .union(InstFlags::TERMINATOR)
                .union(InstFlags::CAN_THROW)
                .union(InstFlags::REQUIRE_STATE)
                .union(InstFlags::NO_DST),
            Opcode::CallStatic | Opcode::CallVirtual => InstFlags::NO_DCE
                .union(InstFlags::CAN_THROW)
                .union(InstFlags::REQUIRE_STATE)
                .union(InstFlags::CALL),
            Opcode::StoreObject | Opcode::StoreArray => {
                InstFlags::NO_DCE.union(InstFlags::NO_DST)
            }
            Opcode::NewObject => InstFlags::CAN_THROW.union(InstFlags::REQUIRE_STATE),
            Opcode::SpillFill => InstFlags::NO_DCE.union(InstFlags::NO_DST),
            _ => InstFlags::empty(),
        }
    }

    /// Returns `true` for [`Opcode::Phi`] and [`Opcode::CatchPhi`].
    #[must_use]
    pub const fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi | Opcode::CatchPhi)
    }

    /// Returns `true` for conditional branches.
    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        matches!(self, Opcode::If | Opcode::IfImm)
    }

    /// Returns `true` if instructions of this opcode end a block.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        self.flags().contains(InstFlags::TERMINATOR)
    }
}

/// The type of the value an instruction produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter)]
pub enum DataType {
    /// No value.
    #[default]
    Void,
    /// Boolean.
    Bool,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Managed reference.
    Reference,
    /// Untyped VM register value.
    Any,
}

impl DataType {
    /// Returns `true` if the type lives in floating-point registers.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, DataType::Float64)
    }
}

/// Comparison condition of `Compare`, `If` and `IfImm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ConditionCode {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Lt,
    /// Signed less or equal.
    Le,
    /// Signed greater than.
    Gt,
    /// Signed greater or equal.
    Ge,
    /// Unsigned below.
    B,
    /// Unsigned below or equal.
    Be,
    /// Unsigned above.
    A,
    /// Unsigned above or equal.
    Ae,
}

impl ConditionCode {
    /// Returns the condition that holds exactly when `self` does not.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            ConditionCode::Eq => ConditionCode::Ne,
            ConditionCode::Ne => ConditionCode::Eq,
            ConditionCode::Lt => ConditionCode::Ge,
            ConditionCode::Le => ConditionCode::Gt,
            ConditionCode::Gt => ConditionCode::Le,
            ConditionCode::Ge => ConditionCode::Lt,
            ConditionCode::B => ConditionCode::Ae,
            ConditionCode::Be => ConditionCode::A,
            ConditionCode::A => ConditionCode::Be,
            ConditionCode::Ae => ConditionCode::B,
        }
    }

    /// Evaluates the condition on two integer operands.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            ConditionCode::Eq => lhs == rhs,
            ConditionCode::Ne => lhs != rhs,
            ConditionCode::Lt => lhs < rhs,
            ConditionCode::Le => lhs <= rhs,
            ConditionCode::Gt => lhs > rhs,
            ConditionCode::Ge => lhs >= rhs,
            ConditionCode::B => (lhs as u64) < (rhs as u64),
            ConditionCode::Be => (lhs as u64) <= (rhs as u64),
            ConditionCode::A => (lhs as u64) > (rhs as u64),
            ConditionCode::Ae => (lhs as u64) >= (rhs as u64),
        }
    }
}

/// Identifies the operation behind an [`Opcode::Intrinsic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicId {
    /// The boolean literal `true`.
    LiteralTrue,
    /// The boolean literal `false`.
    LiteralFalse,
    /// Any other runtime intrinsic, identified by the front end.
    Runtime(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_inverse_is_involution() {
        for cc in ConditionCode::iter() {
            assert_eq!(cc.inverse().inverse(), cc);
            for (a, b) in [(-1, 1), (0, 0), (5, -3)] {
                assert_ne!(cc.evaluate(a, b), cc.inverse().evaluate(a, b), "{cc} {a} {b}");
            }
        }
    }

    #[test]
    fn test_unsigned_conditions() {
        assert!(ConditionCode::A.evaluate(-1, 1));
        assert!(ConditionCode::Lt.evaluate(-1, 1));
    }

    #[test]
    fn test_terminators_have_no_dce() {
        for op in Opcode::iter().filter(|op| op.is_terminator()) {
            assert!(op.flags().contains(InstFlags::NO_DCE), "{op}");
        }
        assert!(Opcode::IfImm.is_conditional_branch());
        assert!(Opcode::CatchPhi.is_phi());
        assert!(!Opcode::Add.is_terminator());
    }
}
