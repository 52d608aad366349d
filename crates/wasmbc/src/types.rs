//! Value types and literals shared by the reader, the module model and the
//! generators.

use crate::error::{CompileError, Result};
use std::fmt;
use wasmbc_bytecode::{Const, RegType};

/// WebAssembly value types, plus `Void` for "no result".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WasmType {
    Void,
    I32,
    I64,
    F32,
    F64,
}

impl WasmType {
    /// Types that can hold a value, in global-storage bank order.
    pub const VALUE_TYPES: [WasmType; 4] = [WasmType::I32, WasmType::I64, WasmType::F32, WasmType::F64];

    pub fn from_wasmparser(vt: wasmparser::ValType) -> Result<Self> {
        match vt {
            wasmparser::ValType::I32 => Ok(WasmType::I32),
            wasmparser::ValType::I64 => Ok(WasmType::I64),
            wasmparser::ValType::F32 => Ok(WasmType::F32),
            wasmparser::ValType::F64 => Ok(WasmType::F64),
            other => Err(CompileError::Nyi(format!("value type {other:?}"))),
        }
    }

    /// Storage size in bytes; zero for `Void`.
    pub const fn byte_size(self) -> u32 {
        match self {
            WasmType::Void => 0,
            WasmType::I32 | WasmType::F32 => 4,
            WasmType::I64 | WasmType::F64 => 8,
        }
    }

    pub const fn is_void(self) -> bool {
        matches!(self, WasmType::Void)
    }

    /// Register bank holding values of this type.
    ///
    /// 64-bit integers have no bank yet.
    pub fn reg_type(self) -> Result<RegType> {
        match self {
            WasmType::I32 => Ok(RegType::Int),
            WasmType::F32 => Ok(RegType::Float),
            WasmType::F64 => Ok(RegType::Double),
            WasmType::I64 => Err(CompileError::Nyi("I64 support".into())),
            WasmType::Void => Err(CompileError::invalid("void has no register bank")),
        }
    }

    pub const fn from_reg_type(ty: RegType) -> Self {
        match ty {
            RegType::Int => WasmType::I32,
            RegType::Float => WasmType::F32,
            RegType::Double => WasmType::F64,
        }
    }
}

impl fmt::Display for WasmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WasmType::Void => "void",
            WasmType::I32 => "i32",
            WasmType::I64 => "i64",
            WasmType::F32 => "f32",
            WasmType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A constant value as it appears in the binary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Literal {
    pub const fn wasm_type(self) -> WasmType {
        match self {
            Literal::I32(_) => WasmType::I32,
            Literal::I64(_) => WasmType::I64,
            Literal::F32(_) => WasmType::F32,
            Literal::F64(_) => WasmType::F64,
        }
    }

    pub fn to_const(self) -> Result<Const> {
        match self {
            Literal::I32(v) => Ok(Const::Int(v)),
            Literal::F32(v) => Ok(Const::Float(v)),
            Literal::F64(v) => Ok(Const::Double(v)),
            Literal::I64(_) => Err(CompileError::Nyi("I64 const".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_type_round_trips() {
        for ty in [RegType::Int, RegType::Float, RegType::Double] {
            assert_eq!(WasmType::from_reg_type(ty).reg_type().unwrap(), ty);
        }
    }

    #[test]
    fn i64_has_no_bank() {
        assert!(matches!(
            WasmType::I64.reg_type(),
            Err(CompileError::Nyi(_))
        ));
    }

    #[test]
    fn literal_types() {
        assert_eq!(Literal::F32(1.5).wasm_type(), WasmType::F32);
        assert_eq!(Literal::I32(7).to_const().unwrap(), Const::Int(7));
        assert!(Literal::I64(7).to_const().is_err());
    }
}
