//! Opcode dispatch and the non-control-flow lowerings.

use super::{EmitInfo, FunctionGenerator};
use crate::error::{CompileError, Result};
use crate::module::{FunctionIndexType, Signature};
use crate::reader::{CallTarget, ExprReader, Node};
use crate::types::{Literal, WasmType};
use wasmbc_bytecode::{
    BinaryOp, CallKind, Const, Instr, UnaryOp, ViewType, MODULE_ENV_REGISTER, VAR_SIZE,
};

impl<R: ExprReader> FunctionGenerator<'_, R> {
    /// Lower one expression. Returns the pushed value, or `EmitInfo::VOID`.
    pub(super) fn emit_expr(&mut self, node: Node) -> Result<EmitInfo> {
        match node {
            Node::Nop => Ok(EmitInfo::VOID),
            Node::Unreachable => self.emit_unreachable(),
            Node::Block(ty) => self.emit_block(ty),
            Node::Loop(ty) => self.emit_loop(ty),
            Node::If(ty) => self.emit_if(ty),
            Node::Else => Err(CompileError::UnexpectedOpcode("else")),
            Node::End => Err(CompileError::UnexpectedOpcode("end")),
            Node::Br(depth) => self.emit_br(depth),
            Node::BrIf(depth) => self.emit_br_if(depth),
            Node::BrTable { targets, default } => self.emit_br_table(&targets, default),
            Node::Return => self.emit_return(),
            Node::Call(target) => self.emit_call(target),
            Node::CallIndirect { signature } => self.emit_call_indirect(signature),
            Node::Drop => self.emit_drop(),
            Node::Select => self.emit_select(),
            Node::GetLocal(index) => self.emit_get_local(index),
            Node::SetLocal(index) => self.emit_set_local(index, false),
            Node::TeeLocal(index) => self.emit_set_local(index, true),
            Node::GetGlobal(index) => self.emit_get_global(index),
            Node::SetGlobal(index) => self.emit_set_global(index),
            Node::Const(literal) => self.emit_const(literal),
            Node::Load { view, offset } => self.emit_load(view, offset),
            Node::Store { view, offset } => self.emit_store(view, offset),
            Node::CurrentMemory => self.emit_current_memory(),
            Node::Unary(op) => self.emit_unary(op),
            Node::Binary(op) => self.emit_binary(op),
            Node::Nyi(what) => Err(CompileError::Nyi(what)),
        }
    }

    fn emit_const(&mut self, literal: Literal) -> Result<EmitInfo> {
        let value = literal.to_const()?;
        let ty = literal.wasm_type();
        let dst = self.acquire_tmp(ty)?;
        self.writer.emit(Instr::LdConst { dst, value })?;
        Ok(EmitInfo::new(dst, ty))
    }

    // ── Locals and globals ──────────────────────────────────────────────────

    fn local(&self, index: u32) -> Result<EmitInfo> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| CompileError::out_of_range("local", index, self.locals.len()))
    }

    /// Locals are copied so that a later write to the local does not change
    /// values already on the stack.
    fn emit_get_local(&mut self, index: u32) -> Result<EmitInfo> {
        let local = self.local(index)?;
        let dst = self.acquire_tmp(local.ty)?;
        self.writer.emit(Instr::Mov {
            ty: local.ty.reg_type()?,
            dst,
            src: local.location,
        })?;
        Ok(EmitInfo::new(dst, local.ty))
    }

    fn emit_set_local(&mut self, index: u32, tee: bool) -> Result<EmitInfo> {
        let local = self.local(index)?;
        let value = self.pop_eval_stack(local.ty, "set_local")?;
        self.writer.emit(Instr::Mov {
            ty: local.ty.reg_type()?,
            dst: local.location,
            src: value.location,
        })?;
        if tee {
            return Ok(value);
        }
        self.release_location(&value)?;
        Ok(EmitInfo::VOID)
    }

    fn emit_get_global(&mut self, index: u32) -> Result<EmitInfo> {
        let global = self.module.global(index)?;
        let ty = global.ty();
        let reg_type = ty.reg_type()?;
        let slot = self.module.offset_for_global(index)?;
        let dst = self.acquire_tmp(ty)?;
        self.writer.emit(Instr::LdSlot {
            ty: reg_type,
            dst,
            env: MODULE_ENV_REGISTER,
            slot,
        })?;
        Ok(EmitInfo::new(dst, ty))
    }

    fn emit_set_global(&mut self, index: u32) -> Result<EmitInfo> {
        let global = self.module.global(index)?;
        if !global.is_mutable() {
            return Err(CompileError::invalid(format!(
                "set_global on immutable global {index}"
            )));
        }
        let ty = global.ty();
        let reg_type = ty.reg_type()?;
        let slot = self.module.offset_for_global(index)?;
        let value = self.pop_eval_stack(ty, "set_global")?;
        self.writer.emit(Instr::StSlot {
            ty: reg_type,
            src: value.location,
            env: MODULE_ENV_REGISTER,
            slot,
        })?;
        self.release_location(&value)?;
        Ok(EmitInfo::VOID)
    }

    // ── Parametric ──────────────────────────────────────────────────────────

    fn emit_drop(&mut self) -> Result<EmitInfo> {
        let value = self.pop_eval_stack(WasmType::Void, "drop")?;
        self.release_location(&value)?;
        Ok(EmitInfo::VOID)
    }

    /// The first operand's register becomes the result.
    fn emit_select(&mut self) -> Result<EmitInfo> {
        let cond = self.pop_eval_stack(WasmType::I32, "select condition")?;
        let if_false = self.pop_eval_stack(WasmType::Void, "select")?;
        let if_true = self.pop_eval_stack(if_false.ty, "select operands")?;

        let done = self.writer.define_label();
        self.writer.emit(Instr::BrTrue {
            target: done,
            cond: cond.location,
        })?;
        self.writer.emit(Instr::Mov {
            ty: if_true.ty.reg_type()?,
            dst: if_true.location,
            src: if_false.location,
        })?;
        self.writer.mark_label(done)?;

        self.release_location(&cond)?;
        self.release_location(&if_false)?;
        Ok(if_true)
    }

    // ── Numeric ─────────────────────────────────────────────────────────────

    fn emit_unary(&mut self, op: UnaryOp) -> Result<EmitInfo> {
        let sig = op.signature();
        let operand = self.pop_eval_stack(WasmType::from_reg_type(sig.operand), op.mnemonic())?;
        self.release_location(&operand)?;
        let result = WasmType::from_reg_type(sig.result);
        let dst = self.acquire_tmp(result)?;
        self.writer.emit(Instr::Unary {
            op,
            dst,
            src: operand.location,
        })?;
        Ok(EmitInfo::new(dst, result))
    }

    fn emit_binary(&mut self, op: BinaryOp) -> Result<EmitInfo> {
        let sig = op.signature();
        let operand = WasmType::from_reg_type(sig.operand);
        let rhs = self.pop_eval_stack(operand, op.mnemonic())?;
        let lhs = self.pop_eval_stack(operand, op.mnemonic())?;
        self.release_location(&rhs)?;
        self.release_location(&lhs)?;
        let result = WasmType::from_reg_type(sig.result);
        let dst = self.acquire_tmp(result)?;
        self.writer.emit(Instr::Binary {
            op,
            dst,
            lhs: lhs.location,
            rhs: rhs.location,
        })?;
        Ok(EmitInfo::new(dst, result))
    }

    // ── Memory ──────────────────────────────────────────────────────────────

    /// Pop the address and fold the static offset into it.
    fn emit_address(&mut self, offset: u32) -> Result<EmitInfo> {
        let index = self.pop_eval_stack(WasmType::I32, "memory index")?;
        if offset != 0 {
            let tmp = self.acquire_tmp(WasmType::I32)?;
            self.writer.emit(Instr::LdConst {
                dst: tmp,
                value: Const::Int(offset as i32),
            })?;
            self.writer.emit(Instr::Binary {
                op: BinaryOp::I32Add,
                dst: index.location,
                lhs: index.location,
                rhs: tmp,
            })?;
            self.release_location(&EmitInfo::new(tmp, WasmType::I32))?;
        }
        Ok(index)
    }

    fn emit_load(&mut self, view: ViewType, offset: u32) -> Result<EmitInfo> {
        self.uses_heap_buffer = true;
        let index = self.emit_address(offset)?;
        self.release_location(&index)?;
        let ty = WasmType::from_reg_type(view.value_type());
        let dst = self.acquire_tmp(ty)?;
        if self.module.has_memory() {
            self.writer.emit(Instr::LdArr {
                view,
                dst,
                index: index.location,
            })?;
        } else {
            self.writer.emit(Instr::Unreachable)?;
            self.writer.emit(Instr::LdConst {
                dst,
                value: Const::zero(view.value_type()),
            })?;
        }
        Ok(EmitInfo::new(dst, ty))
    }

    fn emit_store(&mut self, view: ViewType, offset: u32) -> Result<EmitInfo> {
        self.uses_heap_buffer = true;
        let ty = WasmType::from_reg_type(view.value_type());
        let value = self.pop_eval_stack(ty, "store value")?;
        let index = self.emit_address(offset)?;
        if self.module.has_memory() {
            self.writer.emit(Instr::StArr {
                view,
                src: value.location,
                index: index.location,
            })?;
        } else {
            self.writer.emit(Instr::Unreachable)?;
        }
        self.release_location(&value)?;
        self.release_location(&index)?;
        Ok(EmitInfo::VOID)
    }

    fn emit_current_memory(&mut self) -> Result<EmitInfo> {
        let dst = self.acquire_tmp(WasmType::I32)?;
        if self.module.memory().is_some_and(|memory| memory.min_pages > 0) {
            self.writer.emit(Instr::CurrentMemory { dst })?;
        } else {
            self.writer.emit(Instr::LdConst {
                dst,
                value: Const::Int(0),
            })?;
        }
        Ok(EmitInfo::new(dst, WasmType::I32))
    }

    // ── Calls ───────────────────────────────────────────────────────────────

    fn emit_call(&mut self, target: CallTarget) -> Result<EmitInfo> {
        let module = self.module;
        let layout = module.layout();
        let (kind, signature, slot) = match target {
            CallTarget::Function(index) => match module.function_index_type(index) {
                FunctionIndexType::ImportThunk | FunctionIndexType::Function => (
                    CallKind::Internal,
                    module.function_signature(index)?,
                    layout.func_offset + index,
                ),
                FunctionIndexType::Invalid => {
                    return Err(CompileError::out_of_range(
                        "function",
                        index,
                        module.function_count() as usize,
                    ))
                }
            },
            CallTarget::Import(index) => {
                let import = module.function_import(index)?;
                (
                    CallKind::External,
                    module.signature(import.signature_id)?,
                    layout.import_func_offset + index,
                )
            }
        };

        let args = self.pop_call_args(signature, kind)?;
        self.emit_arg_outs(signature, kind, &args)?;
        self.writer.emit(Instr::LdFunc { slot })?;
        self.finish_call(signature, kind, &args, None)
    }

    /// The callee comes from the signature's table, so any function whose
    /// signature is equivalent may be called.
    fn emit_call_indirect(&mut self, signature_id: u32) -> Result<EmitInfo> {
        let module = self.module;
        if module.table_size() == 0 {
            return Err(CompileError::invalid("call_indirect without a table"));
        }
        let signature = module.signature(signature_id)?;
        let table_slot =
            module.layout().table_offset + module.equivalent_signature_id(signature_id)?;

        let index = self.pop_eval_stack(WasmType::I32, "call_indirect index")?;
        let args = self.pop_call_args(signature, CallKind::Internal)?;
        self.emit_arg_outs(signature, CallKind::Internal, &args)?;
        self.writer.emit(Instr::LdTableFunc {
            table_slot,
            index: index.location,
        })?;
        self.finish_call(signature, CallKind::Internal, &args, Some(index))
    }

    /// Pop and type-check every argument, last first. Nothing is emitted.
    fn pop_call_args(&mut self, signature: &Signature, kind: CallKind) -> Result<Vec<EmitInfo>> {
        let count = signature.param_count();
        let mut args = vec![EmitInfo::VOID; count as usize];
        for i in (0..count).rev() {
            let expected = signature.param(i)?;
            let arg = match self.pop_eval_stack(expected, "call argument") {
                Err(CompileError::TypeMismatch { found, .. }) => {
                    return Err(CompileError::ArgumentMismatch {
                        index: i,
                        expected,
                        found,
                    })
                }
                other => other?,
            };
            if kind == CallKind::External && expected == WasmType::F32 {
                return Err(CompileError::Nyi("external call with f32 argument".into()));
            }
            args[i as usize] = arg;
        }
        Ok(args)
    }

    /// Open the call and write the arguments into increasing slots. Slot 0
    /// is left to the callee.
    fn emit_arg_outs(&mut self, signature: &Signature, kind: CallKind, args: &[EmitInfo]) -> Result<()> {
        let arg_bytes = VAR_SIZE + signature.params_size();
        let arg_bytes = u16::try_from(arg_bytes)
            .map_err(|_| CompileError::invalid("call has too many arguments"))?;
        self.writer.emit(Instr::StartCall { kind, arg_bytes })?;
        let mut slot = 1;
        for (i, arg) in args.iter().enumerate() {
            self.writer.emit(Instr::ArgOut {
                kind,
                ty: arg.ty.reg_type()?,
                slot,
                src: arg.location,
            })?;
            slot += signature.param_size(i as u32)? / VAR_SIZE;
        }
        Ok(())
    }

    fn finish_call(
        &mut self,
        signature: &Signature,
        kind: CallKind,
        args: &[EmitInfo],
        index: Option<EmitInfo>,
    ) -> Result<EmitInfo> {
        let arg_slots = (VAR_SIZE + signature.params_size()) / VAR_SIZE;
        self.max_arg_out_depth = self.max_arg_out_depth.max(arg_slots);

        let result = signature.result();
        let ret = if result.is_void() {
            None
        } else {
            Some(result.reg_type()?)
        };
        self.writer.emit(Instr::Call {
            kind,
            arg_slots: arg_slots as u16,
            ret,
        })?;

        if let Some(index) = index {
            self.release_location(&index)?;
        }
        for arg in args.iter().rev() {
            self.release_location(arg)?;
        }

        let Some(ty) = ret else {
            return Ok(EmitInfo::VOID);
        };
        let dst = self.acquire_tmp(result)?;
        self.writer.emit(Instr::ConvReturnValue { kind, ty, dst })?;
        Ok(EmitInfo::new(dst, result))
    }
}
