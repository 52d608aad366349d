//! `wasmbc-bytecode`: register-based bytecode target for wasmbc.
//!
//! This crate has no dependencies. It provides:
//! - `RegSlot` / `RegType` / `RegisterSpace` for per-type virtual registers
//! - `Label` and the `ByteCodeWriter` instruction sink
//! - `Instr` with the data-driven operator tables in [`ops`]
//! - `FunctionBody` / `FrameLayout`, the container a compiled function lands in

use std::fmt;

mod body;
pub use body::{BankLayout, FrameLayout, FunctionBody};

mod instr;
pub use instr::{CallKind, Const, Instr};

pub mod ops;
pub use ops::{BinaryOp, UnaryOp, ViewType};

mod register;
pub use register::RegisterSpace;

mod writer;
pub use writer::{ByteCodeWriter, Code, LoopInfo};

/// Size in bytes of one untyped frame slot (a boxed "var" on a 64-bit host).
pub const VAR_SIZE: u32 = 8;

/// Registers below this index are reserved in every bank.
///
/// Slot 0 receives return values, slot 1 holds the module environment.
pub const RESERVED_REGISTER_COUNT: u32 = 2;

/// Register that receives a function's return value.
pub const RETURN_REGISTER: RegSlot = RegSlot(0);

/// Register holding the module environment pointer.
pub const MODULE_ENV_REGISTER: RegSlot = RegSlot(1);

/// A virtual register index within one typed bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegSlot(pub u32);

impl fmt::Display for RegSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Register bank types of the target machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegType {
    /// 32-bit integer bank.
    Int,
    /// 32-bit float bank.
    Float,
    /// 64-bit float bank.
    Double,
}

impl RegType {
    /// Byte size of one register of this bank inside a frame.
    pub const fn byte_size(self) -> u32 {
        match self {
            RegType::Int | RegType::Float => 4,
            RegType::Double => 8,
        }
    }

    /// Short suffix used in instruction mnemonics.
    pub const fn suffix(self) -> &'static str {
        match self {
            RegType::Int => "Int",
            RegType::Float => "Flt",
            RegType::Double => "Db",
        }
    }
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegType::Int => "int",
            RegType::Float => "float",
            RegType::Double => "double",
        };
        f.write_str(name)
    }
}

/// A forward or backward jump target. Created by [`ByteCodeWriter::define_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Errors raised by the writer and register spaces.
///
/// These signal a bug in the code generator driving them, never a problem
/// with the input module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    /// A temporary was released while a younger one was still live.
    ReleaseOutOfOrder {
        bank: RegType,
        expected: RegSlot,
        found: RegSlot,
    },
    /// A temporary was released but none is outstanding.
    NoTemporaryLive { bank: RegType, found: RegSlot },
    /// A local register was requested after temporaries were handed out.
    LocalAfterTemporary { bank: RegType },
    /// The label was not created by this writer.
    UnknownLabel(Label),
    /// The label was marked twice.
    LabelAlreadyMarked(Label),
    /// A jump references a label that was never marked.
    UnmarkedLabel(Label),
    /// `exit_loop` without a matching `enter_loop`.
    UnbalancedLoop(u32),
    /// An instruction was emitted outside `begin` / `end`.
    WriterInactive,
}

impl fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeError::ReleaseOutOfOrder {
                bank,
                expected,
                found,
            } => write!(
                f,
                "{bank} temporary {found} released out of order, expected {expected}"
            ),
            BytecodeError::NoTemporaryLive { bank, found } => {
                write!(f, "{bank} temporary {found} released with none live")
            }
            BytecodeError::LocalAfterTemporary { bank } => {
                write!(f, "{bank} local register acquired after temporaries")
            }
            BytecodeError::UnknownLabel(label) => write!(f, "unknown label {label}"),
            BytecodeError::LabelAlreadyMarked(label) => {
                write!(f, "label {label} marked twice")
            }
            BytecodeError::UnmarkedLabel(label) => {
                write!(f, "label {label} is referenced but never marked")
            }
            BytecodeError::UnbalancedLoop(id) => write!(f, "loop {id} exited but not entered"),
            BytecodeError::WriterInactive => f.write_str("bytecode writer is not active"),
        }
    }
}

impl std::error::Error for BytecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_type_sizes() {
        assert_eq!(RegType::Int.byte_size(), 4);
        assert_eq!(RegType::Float.byte_size(), 4);
        assert_eq!(RegType::Double.byte_size(), 8);
    }

    #[test]
    fn reserved_registers_are_below_first_free() {
        assert!(RETURN_REGISTER.0 < RESERVED_REGISTER_COUNT);
        assert!(MODULE_ENV_REGISTER.0 < RESERVED_REGISTER_COUNT);
    }

    #[test]
    fn error_messages_name_the_bank() {
        let err = BytecodeError::ReleaseOutOfOrder {
            bank: RegType::Int,
            expected: RegSlot(5),
            found: RegSlot(4),
        };
        assert_eq!(
            err.to_string(),
            "int temporary R4 released out of order, expected R5"
        );
    }
}
