//! Decoded expression nodes.
//!
//! `read_expr` hands out one `Node` per opcode. Each variant carries exactly
//! the operands its opcode has, so nothing is shared between successive
//! reads.

use crate::error::{CompileError, Result};
use crate::types::{Literal, WasmType};
use wasmbc_bytecode::{BinaryOp, UnaryOp, ViewType};
use wasmparser::{BlockType, MemArg, Operator};

/// Callee of a direct call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Entry of the function index space.
    Function(u32),
    /// Host import, by import number. Only produced inside import thunks.
    Import(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Nop,
    Unreachable,
    Block(WasmType),
    Loop(WasmType),
    If(WasmType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(CallTarget),
    CallIndirect { signature: u32 },
    Drop,
    Select,
    GetLocal(u32),
    SetLocal(u32),
    TeeLocal(u32),
    GetGlobal(u32),
    SetGlobal(u32),
    Const(Literal),
    Load { view: ViewType, offset: u32 },
    Store { view: ViewType, offset: u32 },
    CurrentMemory,
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Decodes fine but has no lowering yet.
    Nyi(String),
}

impl Node {
    /// Opcodes that open a nested construct. Unreachable code still walks
    /// them to find the matching `end`.
    pub fn is_block_opcode(&self) -> bool {
        matches!(self, Node::Block(_) | Node::Loop(_) | Node::If(_))
    }

    /// Decode a wasmparser operator.
    pub fn from_operator(op: Operator<'_>) -> Result<Node> {
        use Operator as O;
        let node = match op {
            O::Nop => Node::Nop,
            O::Unreachable => Node::Unreachable,
            O::Block { blockty } => Node::Block(block_type(blockty)?),
            O::Loop { blockty } => Node::Loop(block_type(blockty)?),
            O::If { blockty } => Node::If(block_type(blockty)?),
            O::Else => Node::Else,
            O::End => Node::End,
            O::Br { relative_depth } => Node::Br(relative_depth),
            O::BrIf { relative_depth } => Node::BrIf(relative_depth),
            O::BrTable { targets } => Node::BrTable {
                default: targets.default(),
                targets: targets.targets().collect::<Result<Vec<u32>, _>>()?,
            },
            O::Return => Node::Return,
            O::Call { function_index } => Node::Call(CallTarget::Function(function_index)),
            O::CallIndirect {
                type_index,
                table_index,
            } => {
                if table_index != 0 {
                    return Err(CompileError::invalid(format!(
                        "call_indirect through table {table_index}"
                    )));
                }
                Node::CallIndirect {
                    signature: type_index,
                }
            }
            O::Drop => Node::Drop,
            O::Select | O::TypedSelect { .. } => Node::Select,
            O::LocalGet { local_index } => Node::GetLocal(local_index),
            O::LocalSet { local_index } => Node::SetLocal(local_index),
            O::LocalTee { local_index } => Node::TeeLocal(local_index),
            O::GlobalGet { global_index } => Node::GetGlobal(global_index),
            O::GlobalSet { global_index } => Node::SetGlobal(global_index),
            O::I32Const { value } => Node::Const(Literal::I32(value)),
            O::F32Const { value } => Node::Const(Literal::F32(f32::from_bits(value.bits()))),
            O::F64Const { value } => Node::Const(Literal::F64(f64::from_bits(value.bits()))),
            O::MemorySize { mem } => {
                check_memory_index(mem)?;
                Node::CurrentMemory
            }

            O::I32Load { memarg } => load(ViewType::Int32, memarg)?,
            O::I32Load8S { memarg } => load(ViewType::Int8, memarg)?,
            O::I32Load8U { memarg } => load(ViewType::Uint8, memarg)?,
            O::I32Load16S { memarg } => load(ViewType::Int16, memarg)?,
            O::I32Load16U { memarg } => load(ViewType::Uint16, memarg)?,
            O::F32Load { memarg } => load(ViewType::Float32, memarg)?,
            O::F64Load { memarg } => load(ViewType::Float64, memarg)?,
            O::I32Store { memarg } => store(ViewType::Int32, memarg)?,
            O::I32Store8 { memarg } => store(ViewType::Int8, memarg)?,
            O::I32Store16 { memarg } => store(ViewType::Int16, memarg)?,
            O::F32Store { memarg } => store(ViewType::Float32, memarg)?,
            O::F64Store { memarg } => store(ViewType::Float64, memarg)?,

            O::I32Eqz => Node::Unary(UnaryOp::I32Eqz),
            O::I32Clz => Node::Unary(UnaryOp::I32Clz),
            O::I32Ctz => Node::Unary(UnaryOp::I32Ctz),
            O::I32Popcnt => Node::Unary(UnaryOp::I32Popcnt),
            O::F32Abs => Node::Unary(UnaryOp::F32Abs),
            O::F32Neg => Node::Unary(UnaryOp::F32Neg),
            O::F32Ceil => Node::Unary(UnaryOp::F32Ceil),
            O::F32Floor => Node::Unary(UnaryOp::F32Floor),
            O::F32Trunc => Node::Unary(UnaryOp::F32Trunc),
            O::F32Nearest => Node::Unary(UnaryOp::F32Nearest),
            O::F32Sqrt => Node::Unary(UnaryOp::F32Sqrt),
            O::F64Abs => Node::Unary(UnaryOp::F64Abs),
            O::F64Neg => Node::Unary(UnaryOp::F64Neg),
            O::F64Ceil => Node::Unary(UnaryOp::F64Ceil),
            O::F64Floor => Node::Unary(UnaryOp::F64Floor),
            O::F64Trunc => Node::Unary(UnaryOp::F64Trunc),
            O::F64Nearest => Node::Unary(UnaryOp::F64Nearest),
            O::F64Sqrt => Node::Unary(UnaryOp::F64Sqrt),
            O::I32TruncF32S => Node::Unary(UnaryOp::I32TruncF32S),
            O::I32TruncF32U => Node::Unary(UnaryOp::I32TruncF32U),
            O::I32TruncF64S => Node::Unary(UnaryOp::I32TruncF64S),
            O::I32TruncF64U => Node::Unary(UnaryOp::I32TruncF64U),
            O::F32ConvertI32S => Node::Unary(UnaryOp::F32ConvertI32S),
            O::F32ConvertI32U => Node::Unary(UnaryOp::F32ConvertI32U),
            O::F32DemoteF64 => Node::Unary(UnaryOp::F32DemoteF64),
            O::F64ConvertI32S => Node::Unary(UnaryOp::F64ConvertI32S),
            O::F64ConvertI32U => Node::Unary(UnaryOp::F64ConvertI32U),
            O::F64PromoteF32 => Node::Unary(UnaryOp::F64PromoteF32),
            O::I32ReinterpretF32 => Node::Unary(UnaryOp::I32ReinterpretF32),
            O::F32ReinterpretI32 => Node::Unary(UnaryOp::F32ReinterpretI32),

            O::I32Add => Node::Binary(BinaryOp::I32Add),
            O::I32Sub => Node::Binary(BinaryOp::I32Sub),
            O::I32Mul => Node::Binary(BinaryOp::I32Mul),
            O::I32DivS => Node::Binary(BinaryOp::I32DivS),
            O::I32DivU => Node::Binary(BinaryOp::I32DivU),
            O::I32RemS => Node::Binary(BinaryOp::I32RemS),
            O::I32RemU => Node::Binary(BinaryOp::I32RemU),
            O::I32And => Node::Binary(BinaryOp::I32And),
            O::I32Or => Node::Binary(BinaryOp::I32Or),
            O::I32Xor => Node::Binary(BinaryOp::I32Xor),
            O::I32Shl => Node::Binary(BinaryOp::I32Shl),
            O::I32ShrS => Node::Binary(BinaryOp::I32ShrS),
            O::I32ShrU => Node::Binary(BinaryOp::I32ShrU),
            O::I32Rotl => Node::Binary(BinaryOp::I32Rotl),
            O::I32Rotr => Node::Binary(BinaryOp::I32Rotr),
            O::I32Eq => Node::Binary(BinaryOp::I32Eq),
            O::I32Ne => Node::Binary(BinaryOp::I32Ne),
            O::I32LtS => Node::Binary(BinaryOp::I32LtS),
            O::I32LtU => Node::Binary(BinaryOp::I32LtU),
            O::I32GtS => Node::Binary(BinaryOp::I32GtS),
            O::I32GtU => Node::Binary(BinaryOp::I32GtU),
            O::I32LeS => Node::Binary(BinaryOp::I32LeS),
            O::I32LeU => Node::Binary(BinaryOp::I32LeU),
            O::I32GeS => Node::Binary(BinaryOp::I32GeS),
            O::I32GeU => Node::Binary(BinaryOp::I32GeU),
            O::F32Add => Node::Binary(BinaryOp::F32Add),
            O::F32Sub => Node::Binary(BinaryOp::F32Sub),
            O::F32Mul => Node::Binary(BinaryOp::F32Mul),
            O::F32Div => Node::Binary(BinaryOp::F32Div),
            O::F32Min => Node::Binary(BinaryOp::F32Min),
            O::F32Max => Node::Binary(BinaryOp::F32Max),
            O::F32Copysign => Node::Binary(BinaryOp::F32Copysign),
            O::F32Eq => Node::Binary(BinaryOp::F32Eq),
            O::F32Ne => Node::Binary(BinaryOp::F32Ne),
            O::F32Lt => Node::Binary(BinaryOp::F32Lt),
            O::F32Gt => Node::Binary(BinaryOp::F32Gt),
            O::F32Le => Node::Binary(BinaryOp::F32Le),
            O::F32Ge => Node::Binary(BinaryOp::F32Ge),
            O::F64Add => Node::Binary(BinaryOp::F64Add),
            O::F64Sub => Node::Binary(BinaryOp::F64Sub),
            O::F64Mul => Node::Binary(BinaryOp::F64Mul),
            O::F64Div => Node::Binary(BinaryOp::F64Div),
            O::F64Min => Node::Binary(BinaryOp::F64Min),
            O::F64Max => Node::Binary(BinaryOp::F64Max),
            O::F64Copysign => Node::Binary(BinaryOp::F64Copysign),
            O::F64Eq => Node::Binary(BinaryOp::F64Eq),
            O::F64Ne => Node::Binary(BinaryOp::F64Ne),
            O::F64Lt => Node::Binary(BinaryOp::F64Lt),
            O::F64Gt => Node::Binary(BinaryOp::F64Gt),
            O::F64Le => Node::Binary(BinaryOp::F64Le),
            O::F64Ge => Node::Binary(BinaryOp::F64Ge),

            O::MemoryGrow { .. } => Node::Nyi("memory.grow".into()),
            other => {
                // Every 64-bit integer operator (and conversions touching
                // i64) decodes, then fails at generation time.
                let name = operator_name(&other);
                if name.contains("I64") {
                    Node::Nyi(name)
                } else {
                    return Err(CompileError::UnsupportedOpcode(name));
                }
            }
        };
        Ok(node)
    }
}

/// Bare operator name, e.g. `I64Add` for `I64Add` or `I64Load` for `I64Load { .. }`.
fn operator_name(op: &Operator<'_>) -> String {
    let debug = format!("{op:?}");
    let end = debug
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(debug.len());
    debug[..end].to_string()
}

fn block_type(blockty: BlockType) -> Result<WasmType> {
    match blockty {
        BlockType::Empty => Ok(WasmType::Void),
        BlockType::Type(vt) => WasmType::from_wasmparser(vt),
        BlockType::FuncType(idx) => Err(CompileError::Nyi(format!(
            "multi-value block type {idx}"
        ))),
    }
}

fn check_memory_index(mem: u32) -> Result<()> {
    if mem != 0 {
        return Err(CompileError::invalid(format!("invalid memory index {mem}")));
    }
    Ok(())
}

fn memory_offset(memarg: &MemArg) -> Result<u32> {
    check_memory_index(memarg.memory)?;
    u32::try_from(memarg.offset)
        .map_err(|_| CompileError::invalid(format!("memory offset {} out of range", memarg.offset)))
}

fn load(view: ViewType, memarg: MemArg) -> Result<Node> {
    Ok(Node::Load {
        view,
        offset: memory_offset(&memarg)?,
    })
}

fn store(view: ViewType, memarg: MemArg) -> Result<Node> {
    Ok(Node::Store {
        view,
        offset: memory_offset(&memarg)?,
    })
}
