//! Operator tables for the register machine.
//!
//! Every arithmetic, comparison and conversion operator has a fixed static
//! signature. The tables below are the single source of truth: each row names
//! the operator, its mnemonic, its result bank and its operand bank. The code
//! generator looks signatures up here and drives one generic emitter for each
//! arity instead of one hand-written emitter per operator.

use crate::RegType;
use std::fmt;

/// Static shape of an operator: result bank plus the bank of every operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSignature {
    pub result: RegType,
    pub operand: RegType,
}

macro_rules! operator_table {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident => $mnemonic:literal, $result:ident, $operand:ident; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )*
        }

        impl $name {
            /// Every operator in table order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )* ];

            pub const fn signature(self) -> OpSignature {
                match self {
                    $( $name::$variant => OpSignature {
                        result: RegType::$result,
                        operand: RegType::$operand,
                    }, )*
                }
            }

            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( $name::$variant => $mnemonic, )*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.mnemonic())
            }
        }
    };
}

operator_table! {
    /// Two-operand operators. Both operands share the operand bank.
    BinaryOp {
        I32Add => "Add_Int", Int, Int;
        I32Sub => "Sub_Int", Int, Int;
        I32Mul => "Mul_Int", Int, Int;
        I32DivS => "Div_Int", Int, Int;
        I32DivU => "Div_UInt", Int, Int;
        I32RemS => "Rem_Int", Int, Int;
        I32RemU => "Rem_UInt", Int, Int;
        I32And => "And_Int", Int, Int;
        I32Or => "Or_Int", Int, Int;
        I32Xor => "Xor_Int", Int, Int;
        I32Shl => "Shl_Int", Int, Int;
        I32ShrS => "Shr_Int", Int, Int;
        I32ShrU => "Shr_UInt", Int, Int;
        I32Rotl => "Rol_Int", Int, Int;
        I32Rotr => "Ror_Int", Int, Int;
        I32Eq => "CmEq_Int", Int, Int;
        I32Ne => "CmNe_Int", Int, Int;
        I32LtS => "CmLt_Int", Int, Int;
        I32LtU => "CmLt_UInt", Int, Int;
        I32GtS => "CmGt_Int", Int, Int;
        I32GtU => "CmGt_UInt", Int, Int;
        I32LeS => "CmLe_Int", Int, Int;
        I32LeU => "CmLe_UInt", Int, Int;
        I32GeS => "CmGe_Int", Int, Int;
        I32GeU => "CmGe_UInt", Int, Int;
        F32Add => "Add_Flt", Float, Float;
        F32Sub => "Sub_Flt", Float, Float;
        F32Mul => "Mul_Flt", Float, Float;
        F32Div => "Div_Flt", Float, Float;
        F32Min => "Min_Flt", Float, Float;
        F32Max => "Max_Flt", Float, Float;
        F32Copysign => "CopySign_Flt", Float, Float;
        F32Eq => "CmEq_Flt", Int, Float;
        F32Ne => "CmNe_Flt", Int, Float;
        F32Lt => "CmLt_Flt", Int, Float;
        F32Gt => "CmGt_Flt", Int, Float;
        F32Le => "CmLe_Flt", Int, Float;
        F32Ge => "CmGe_Flt", Int, Float;
        F64Add => "Add_Db", Double, Double;
        F64Sub => "Sub_Db", Double, Double;
        F64Mul => "Mul_Db", Double, Double;
        F64Div => "Div_Db", Double, Double;
        F64Min => "Min_Db", Double, Double;
        F64Max => "Max_Db", Double, Double;
        F64Copysign => "CopySign_Db", Double, Double;
        F64Eq => "CmEq_Db", Int, Double;
        F64Ne => "CmNe_Db", Int, Double;
        F64Lt => "CmLt_Db", Int, Double;
        F64Gt => "CmGt_Db", Int, Double;
        F64Le => "CmLe_Db", Int, Double;
        F64Ge => "CmGe_Db", Int, Double;
    }
}

operator_table! {
    /// One-operand operators, including every conversion between banks.
    UnaryOp {
        I32Clz => "Clz32_Int", Int, Int;
        I32Ctz => "Ctz_Int", Int, Int;
        I32Popcnt => "PopCnt_Int", Int, Int;
        I32Eqz => "Eqz_Int", Int, Int;
        F32Abs => "Abs_Flt", Float, Float;
        F32Neg => "Neg_Flt", Float, Float;
        F32Ceil => "Ceil_Flt", Float, Float;
        F32Floor => "Floor_Flt", Float, Float;
        F32Trunc => "Trunc_Flt", Float, Float;
        F32Nearest => "Nearest_Flt", Float, Float;
        F32Sqrt => "Sqrt_Flt", Float, Float;
        F64Abs => "Abs_Db", Double, Double;
        F64Neg => "Neg_Db", Double, Double;
        F64Ceil => "Ceil_Db", Double, Double;
        F64Floor => "Floor_Db", Double, Double;
        F64Trunc => "Trunc_Db", Double, Double;
        F64Nearest => "Nearest_Db", Double, Double;
        F64Sqrt => "Sqrt_Db", Double, Double;
        I32TruncF32S => "Conv_FTI", Int, Float;
        I32TruncF32U => "Conv_FTU", Int, Float;
        I32TruncF64S => "Conv_DTI", Int, Double;
        I32TruncF64U => "Conv_DTU", Int, Double;
        F32ConvertI32S => "Fround_Int", Float, Int;
        F32ConvertI32U => "Conv_UTF", Float, Int;
        F32DemoteF64 => "Fround_Db", Float, Double;
        F64ConvertI32S => "Conv_ITD", Double, Int;
        F64ConvertI32U => "Conv_UTD", Double, Int;
        F64PromoteF32 => "Conv_FTD", Double, Float;
        I32ReinterpretF32 => "Reinterpret_FTI", Int, Float;
        F32ReinterpretI32 => "Reinterpret_ITF", Float, Int;
    }
}

/// Typed view through which linear memory is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Float32,
    Float64,
}

impl ViewType {
    /// Bank of the value loaded from or stored through this view.
    pub const fn value_type(self) -> RegType {
        match self {
            ViewType::Int8
            | ViewType::Uint8
            | ViewType::Int16
            | ViewType::Uint16
            | ViewType::Int32 => RegType::Int,
            ViewType::Float32 => RegType::Float,
            ViewType::Float64 => RegType::Double,
        }
    }

    /// Number of bytes accessed.
    pub const fn byte_size(self) -> u32 {
        match self {
            ViewType::Int8 | ViewType::Uint8 => 1,
            ViewType::Int16 | ViewType::Uint16 => 2,
            ViewType::Int32 | ViewType::Float32 => 4,
            ViewType::Float64 => 8,
        }
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewType::Int8 => "Int8",
            ViewType::Uint8 => "Uint8",
            ViewType::Int16 => "Int16",
            ViewType::Uint16 => "Uint16",
            ViewType::Int32 => "Int32",
            ViewType::Float32 => "Float32",
            ViewType::Float64 => "Float64",
        };
        f.write_str(name)
    }
}
