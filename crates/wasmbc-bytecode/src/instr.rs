//! The register-machine instruction set.

use crate::ops::{BinaryOp, UnaryOp, ViewType};
use crate::{Label, RegSlot, RegType};
use std::fmt;

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Int(i32),
    Float(f32),
    Double(f64),
}

impl Const {
    pub const fn reg_type(self) -> RegType {
        match self {
            Const::Int(_) => RegType::Int,
            Const::Float(_) => RegType::Float,
            Const::Double(_) => RegType::Double,
        }
    }

    /// The zero value of `ty`.
    pub const fn zero(ty: RegType) -> Self {
        match ty {
            RegType::Int => Const::Int(0),
            RegType::Float => Const::Float(0.0),
            RegType::Double => Const::Double(0.0),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{v}"),
            Const::Float(v) => write!(f, "{v:?}f"),
            Const::Double(v) => write!(f, "{v:?}"),
        }
    }
}

/// Calling convention of a call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Call to a function compiled from the same module (typed arguments).
    Internal,
    /// Call out to a host import (boxed arguments).
    External,
}

impl CallKind {
    const fn prefix(self) -> &'static str {
        match self {
            CallKind::Internal => "I_",
            CallKind::External => "",
        }
    }
}

/// One register-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `dst = value`
    LdConst { dst: RegSlot, value: Const },
    /// Register to register move within one bank.
    Mov { ty: RegType, dst: RegSlot, src: RegSlot },
    /// Store `undefined` into an untyped slot (void returns).
    LdUndef { dst: RegSlot },
    Unary { op: UnaryOp, dst: RegSlot, src: RegSlot },
    Binary {
        op: BinaryOp,
        dst: RegSlot,
        lhs: RegSlot,
        rhs: RegSlot,
    },
    /// Load a typed slot out of the module environment.
    LdSlot {
        ty: RegType,
        dst: RegSlot,
        env: RegSlot,
        slot: u32,
    },
    /// Store a typed slot into the module environment.
    StSlot {
        ty: RegType,
        src: RegSlot,
        env: RegSlot,
        slot: u32,
    },
    Br { target: Label },
    BrTrue { target: Label, cond: RegSlot },
    BrFalse { target: Label, cond: RegSlot },
    BeginSwitch { scrutinee: RegSlot },
    /// Jump to `target` when `scrutinee == value`.
    Case {
        target: Label,
        scrutinee: RegSlot,
        value: i32,
    },
    /// Closes a switch with an unconditional jump to the default target.
    EndSwitch { target: Label },
    /// Opens a call sequence reserving `arg_bytes` of outgoing arguments.
    StartCall { kind: CallKind, arg_bytes: u16 },
    /// Write one outgoing argument into slot `slot`.
    ArgOut {
        kind: CallKind,
        ty: RegType,
        slot: u32,
        src: RegSlot,
    },
    /// Load the callee from module environment slot `slot`.
    LdFunc { slot: u32 },
    /// Load the callee from the indirect table at `table_slot`, entry `index`.
    LdTableFunc { table_slot: u32, index: RegSlot },
    Call {
        kind: CallKind,
        arg_slots: u16,
        ret: Option<RegType>,
    },
    /// Coerce the value returned by the last call into `dst`.
    ConvReturnValue {
        kind: CallKind,
        ty: RegType,
        dst: RegSlot,
    },
    /// Move `src` into the return register.
    Return { ty: RegType, src: RegSlot },
    /// Heap load through `view` at byte address `index`.
    LdArr {
        view: ViewType,
        dst: RegSlot,
        index: RegSlot,
    },
    /// Heap store through `view` at byte address `index`.
    StArr {
        view: ViewType,
        src: RegSlot,
        index: RegSlot,
    },
    /// `dst = current memory size in pages`
    CurrentMemory { dst: RegSlot },
    /// Unconditional trap.
    Unreachable,
    /// Leave the function.
    Ret,
}

impl Instr {
    /// Label this instruction may transfer control to, if any.
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Instr::Br { target }
            | Instr::BrTrue { target, .. }
            | Instr::BrFalse { target, .. }
            | Instr::Case { target, .. }
            | Instr::EndSwitch { target } => Some(*target),
            _ => None,
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Br { .. } | Instr::EndSwitch { .. } | Instr::Unreachable | Instr::Ret
        )
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::LdConst { dst, value } => {
                write!(f, "Ld_{}Const {dst}, {value}", value.reg_type().suffix())
            }
            Instr::Mov { ty, dst, src } => write!(f, "Ld_{} {dst}, {src}", ty.suffix()),
            Instr::LdUndef { dst } => write!(f, "LdUndef {dst}"),
            Instr::Unary { op, dst, src } => write!(f, "{op} {dst}, {src}"),
            Instr::Binary { op, dst, lhs, rhs } => write!(f, "{op} {dst}, {lhs}, {rhs}"),
            Instr::LdSlot { ty, dst, env, slot } => {
                write!(f, "LdSlot_{} {dst}, {env}[{slot}]", ty.suffix())
            }
            Instr::StSlot { ty, src, env, slot } => {
                write!(f, "StSlot_{} {env}[{slot}], {src}", ty.suffix())
            }
            Instr::Br { target } => write!(f, "Br {target}"),
            Instr::BrTrue { target, cond } => write!(f, "BrTrue_Int {target}, {cond}"),
            Instr::BrFalse { target, cond } => write!(f, "BrFalse_Int {target}, {cond}"),
            Instr::BeginSwitch { scrutinee } => write!(f, "BeginSwitch_Int {scrutinee}"),
            Instr::Case {
                target,
                scrutinee,
                value,
            } => write!(f, "Case_IntConst {target}, {scrutinee}, {value}"),
            Instr::EndSwitch { target } => write!(f, "EndSwitch_Int {target}"),
            Instr::StartCall { kind, arg_bytes } => {
                write!(f, "{}StartCall {arg_bytes}", kind.prefix())
            }
            Instr::ArgOut {
                kind,
                ty,
                slot,
                src,
            } => write!(f, "{}ArgOut_{} out[{slot}], {src}", kind.prefix(), ty.suffix()),
            Instr::LdFunc { slot } => write!(f, "LdSlot env[{slot}]"),
            Instr::LdTableFunc { table_slot, index } => {
                write!(f, "LdArr_Func env[{table_slot}][{index}]")
            }
            Instr::Call {
                kind,
                arg_slots,
                ret,
            } => {
                write!(f, "{}Call argc={arg_slots}", kind.prefix())?;
                if let Some(ret) = ret {
                    write!(f, " -> {ret}")?;
                }
                Ok(())
            }
            Instr::ConvReturnValue { kind, ty, dst } => {
                write!(f, "{}Conv_VT{} {dst}", kind.prefix(), ty.suffix())
            }
            Instr::Return { ty, src } => write!(f, "Return_{} R0, {src}", ty.suffix()),
            Instr::LdArr { view, dst, index } => write!(f, "LdArr {dst}, {view}[{index}]"),
            Instr::StArr { view, src, index } => write!(f, "StArr {view}[{index}], {src}"),
            Instr::CurrentMemory { dst } => write!(f, "CurrentMemory_Int {dst}"),
            Instr::Unreachable => f.write_str("Unreachable_Void"),
            Instr::Ret => f.write_str("Ret"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_binary() {
        let instr = Instr::Binary {
            op: BinaryOp::I32Add,
            dst: RegSlot(4),
            lhs: RegSlot(4),
            rhs: RegSlot(5),
        };
        assert_eq!(instr.to_string(), "Add_Int R4, R4, R5");
    }

    #[test]
    fn display_internal_call() {
        let instr = Instr::ArgOut {
            kind: CallKind::Internal,
            ty: RegType::Double,
            slot: 1,
            src: RegSlot(3),
        };
        assert_eq!(instr.to_string(), "I_ArgOut_Db out[1], R3");
    }

    #[test]
    fn branch_targets() {
        let target = Label(3);
        assert_eq!(Instr::Br { target }.branch_target(), Some(target));
        assert!(Instr::Br { target }.is_terminator());
        let cond = Instr::BrTrue {
            target,
            cond: RegSlot(2),
        };
        assert!(!cond.is_terminator());
        assert_eq!(Instr::Ret.branch_target(), None);
    }

    #[test]
    fn zero_constants_match_bank() {
        assert_eq!(Const::zero(RegType::Float), Const::Float(0.0));
        assert_eq!(Const::zero(RegType::Double).reg_type(), RegType::Double);
    }
}
