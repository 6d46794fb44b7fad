//! Where a value lives once the register allocator has placed it.

use std::fmt;

use crate::ir::ConstValue;

/// The storage assigned to a life interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// Not assigned yet.
    #[default]
    Invalid,
    /// General-purpose register.
    Register(u8),
    /// Floating-point register.
    FpRegister(u8),
    /// Spill slot in the frame.
    StackSlot(u32),
    /// Rematerializable constant, never loaded from memory.
    Constant(ConstValue),
}

impl Location {
    /// Returns `true` unless the location is [`Location::Invalid`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Location::Invalid)
    }

    /// Returns `true` for general-purpose and floating-point registers.
    #[must_use]
    pub const fn is_register(self) -> bool {
        matches!(self, Location::Register(_) | Location::FpRegister(_))
    }

    /// Returns `true` for spill slots.
    #[must_use]
    pub const fn is_stack(self) -> bool {
        matches!(self, Location::StackSlot(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Invalid => write!(f, "?"),
            Location::Register(r) => write!(f, "r{r}"),
            Location::FpRegister(r) => write!(f, "f{r}"),
            Location::StackSlot(s) => write!(f, "s{s}"),
            Location::Constant(c) => write!(f, "#{c}"),
        }
    }
}
