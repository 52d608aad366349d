//! Structured control flow lowered to labels and jumps.

use super::{BlockInfo, EmitInfo, FunctionGenerator};
use crate::error::{CompileError, Result};
use crate::reader::{ExprReader, Node};
use crate::types::WasmType;
use wasmbc_bytecode::{Instr, RETURN_REGISTER};

/// Which block a fall-through value is moved into.
#[derive(Clone, Copy)]
enum YieldTarget {
    /// The innermost entry of the block stack.
    Innermost,
    /// A block kept off the stack (the implicit block around a loop).
    Detached,
}

impl<R: ExprReader> FunctionGenerator<'_, R> {
    /// The function body: a block yielding the function result.
    pub(super) fn emit_function_block(&mut self) -> Result<EmitInfo> {
        let label = self.writer.define_label();
        self.push_label(self.function.result(), label)?;
        self.emit_block_common(YieldTarget::Innermost, None, false)?;
        self.writer.mark_label(label)?;
        let info = self.pop_label(label)?;
        self.unreachable = false;
        Ok(info)
    }

    /// Move the function result into the return register.
    pub(super) fn emit_return_expr(&mut self, info: EmitInfo) -> Result<()> {
        if info.is_void() {
            self.writer.emit(Instr::LdUndef {
                dst: RETURN_REGISTER,
            })?;
            return Ok(());
        }
        self.writer.emit(Instr::Return {
            ty: info.ty.reg_type()?,
            src: info.location,
        })?;
        self.release_location(&info)
    }

    /// Emit expressions up to the matching `end` (or `else`, when
    /// `end_on_else`). Returns whether the sequence stopped at an `else`.
    fn emit_block_common(
        &mut self,
        target: YieldTarget,
        mut detached: Option<&mut BlockInfo>,
        end_on_else: bool,
    ) -> Result<bool> {
        self.push_scope_marker();
        self.unreachable = false;

        let ended_on_else = loop {
            match self.reader.read_expr()? {
                Node::End => break false,
                Node::Else if end_on_else => break true,
                Node::Else => return Err(CompileError::UnexpectedOpcode("else")),
                Node::Nyi(what) => return Err(CompileError::Nyi(what)),
                node if self.unreachable && node.is_block_opcode() => {
                    self.skip_dead_construct()?;
                }
                node if self.unreachable => {
                    log::trace!("skipping unreachable {node:?}");
                }
                node => {
                    let info = self.emit_expr(node)?;
                    if info.is_void() {
                        continue;
                    }
                    if self.unreachable {
                        self.release_location(&info)?;
                    } else {
                        self.push_eval_stack(info);
                    }
                }
            }
        };

        if !self.unreachable {
            let block = match target {
                YieldTarget::Innermost => self.block_at_mut(0)?,
                YieldTarget::Detached => detached
                    .as_deref_mut()
                    .ok_or_else(|| CompileError::invalid("detached block missing"))?,
            };
            let yield_info = block.yield_info;
            if let Some(yield_info) = yield_info {
                block.did_yield = true;
                let value = self.pop_eval_stack(yield_info.ty, "block yield")?;
                self.move_value(yield_info, value)?;
                self.release_location(&value)?;
            }
        }

        self.pop_scope_marker()?;
        Ok(ended_on_else)
    }

    /// Read past a block, loop or if opened in dead code, up to its
    /// matching `end`. Nothing is emitted and no label or register is taken.
    fn skip_dead_construct(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.reader.read_expr()? {
                Node::End => depth -= 1,
                Node::Nyi(what) => return Err(CompileError::Nyi(what)),
                node if node.is_block_opcode() => depth += 1,
                node => log::trace!("skipping unreachable {node:?}"),
            }
        }
        Ok(())
    }

    /// `dst = src`, both of the same type.
    fn move_value(&mut self, dst: EmitInfo, src: EmitInfo) -> Result<()> {
        if dst.location == src.location {
            return Ok(());
        }
        self.writer.emit(Instr::Mov {
            ty: dst.ty.reg_type()?,
            dst: dst.location,
            src: src.location,
        })?;
        Ok(())
    }

    pub(super) fn emit_block(&mut self, ty: WasmType) -> Result<EmitInfo> {
        let outer_unreachable = self.unreachable;
        let label = self.writer.define_label();
        self.push_label(ty, label)?;
        self.emit_block_common(YieldTarget::Innermost, None, false)?;
        self.writer.mark_label(label)?;
        let info = self.pop_label(label)?;
        self.unreachable = outer_unreachable;
        Ok(info)
    }

    /// A loop runs its body once unless a branch asks for another
    /// iteration. Branches to the loop go through a landing pad that jumps
    /// back to the head.
    pub(super) fn emit_loop(&mut self, ty: WasmType) -> Result<EmitInfo> {
        let outer_unreachable = self.unreachable;
        let tail = self.writer.define_label();
        let head = self.writer.define_label();
        let landing_pad = self.writer.define_label();
        let loop_id = self.writer.enter_loop(head)?;

        // The exit block is not branchable from inside the loop, so it stays
        // off the block stack while the body is emitted.
        self.push_label(ty, tail)?;
        let mut implicit = self
            .blocks
            .pop()
            .ok_or_else(|| CompileError::invalid("block stack underflow"))?;

        self.push_label(WasmType::Void, landing_pad)?;
        self.emit_block_common(YieldTarget::Detached, Some(&mut implicit), false)?;
        self.pop_label(landing_pad)?;

        self.writer.br(tail)?;
        self.writer.mark_label(landing_pad)?;
        self.writer.br(head)?;
        self.writer.mark_label(tail)?;
        let info = self.finish_block(implicit)?;
        self.writer.exit_loop(loop_id)?;

        self.unreachable = outer_unreachable;
        Ok(info)
    }

    pub(super) fn emit_if(&mut self, ty: WasmType) -> Result<EmitInfo> {
        let outer_unreachable = self.unreachable;
        let false_label = self.writer.define_label();
        let end_label = self.writer.define_label();

        let cond = self.pop_eval_stack(WasmType::I32, "if condition")?;
        self.release_location(&cond)?;
        self.writer.emit(Instr::BrFalse {
            target: false_label,
            cond: cond.location,
        })?;

        self.push_label(ty, end_label)?;
        let has_else = self.emit_block_common(YieldTarget::Innermost, None, true)?;
        self.writer.br(end_label)?;
        self.writer.mark_label(false_label)?;
        if has_else {
            self.emit_block_common(YieldTarget::Innermost, None, false)?;
        } else if !ty.is_void() {
            return Err(CompileError::invalid(format!(
                "if yielding {ty} has no else"
            )));
        }
        self.writer.mark_label(end_label)?;
        let info = self.pop_label(end_label)?;

        self.unreachable = outer_unreachable;
        Ok(info)
    }

    /// Move `value` into the yield register of the block at `depth`, if it
    /// has one.
    fn yield_to_block(&mut self, depth: u32, value: Option<EmitInfo>) -> Result<()> {
        let block = self.block_at_mut(depth)?;
        let Some(yield_info) = block.yield_info else {
            return Ok(());
        };
        block.did_yield = true;
        let value = value.ok_or(CompileError::MissingOperand)?;
        if value.ty != yield_info.ty {
            return Err(CompileError::TypeMismatch {
                context: "branch yield",
                expected: yield_info.ty,
                found: value.ty,
            });
        }
        self.move_value(yield_info, value)
    }

    pub(super) fn emit_br(&mut self, depth: u32) -> Result<EmitInfo> {
        let block = *self.block_at(depth)?;
        if let Some(yield_info) = block.yield_info {
            let value = self.pop_eval_stack(yield_info.ty, "br yield")?;
            self.yield_to_block(depth, Some(value))?;
            self.release_location(&value)?;
        }
        self.writer.br(block.label)?;
        self.set_unreachable(true)?;
        Ok(EmitInfo::VOID)
    }

    /// The yielded value stays on the stack for the fall-through path.
    pub(super) fn emit_br_if(&mut self, depth: u32) -> Result<EmitInfo> {
        let cond = self.pop_eval_stack(WasmType::I32, "br_if condition")?;
        self.release_location(&cond)?;

        let block = *self.block_at(depth)?;
        let mut result = EmitInfo::VOID;
        if let Some(yield_info) = block.yield_info {
            result = self.pop_eval_stack(yield_info.ty, "br_if yield")?;
            self.yield_to_block(depth, Some(result))?;
        }
        self.writer.emit(Instr::BrTrue {
            target: block.label,
            cond: cond.location,
        })?;
        Ok(result)
    }

    /// One value, popped once, is yielded to every target; all targets must
    /// therefore agree on their yield type.
    pub(super) fn emit_br_table(&mut self, targets: &[u32], default: u32) -> Result<EmitInfo> {
        let default_block = *self.block_at(default)?;
        let yield_type = default_block.yield_type();
        for &depth in targets {
            let found = self.block_at(depth)?.yield_type();
            if found != yield_type {
                return Err(CompileError::TypeMismatch {
                    context: "br_table targets",
                    expected: yield_type.unwrap_or(WasmType::Void),
                    found: found.unwrap_or(WasmType::Void),
                });
            }
        }

        let scrutinee = self.pop_eval_stack(WasmType::I32, "br_table index")?;
        let value = match yield_type {
            Some(ty) => Some(self.pop_eval_stack(ty, "br_table yield")?),
            None => None,
        };

        self.writer.emit(Instr::BeginSwitch {
            scrutinee: scrutinee.location,
        })?;
        for (case, &depth) in targets.iter().enumerate() {
            self.yield_to_block(depth, value)?;
            let target = self.block_at(depth)?.label;
            let case = i32::try_from(case)
                .map_err(|_| CompileError::invalid("br_table has too many targets"))?;
            self.writer.emit(Instr::Case {
                target,
                scrutinee: scrutinee.location,
                value: case,
            })?;
        }
        self.yield_to_block(default, value)?;
        self.writer.emit(Instr::EndSwitch {
            target: default_block.label,
        })?;

        self.release_location(&scrutinee)?;
        if let Some(value) = value {
            self.release_location(&value)?;
        }
        self.set_unreachable(true)?;
        Ok(EmitInfo::VOID)
    }

    pub(super) fn emit_return(&mut self) -> Result<EmitInfo> {
        let result = self.function.result();
        if !result.is_void() {
            let value = self.pop_eval_stack(result, "return value")?;
            self.writer.emit(Instr::Return {
                ty: result.reg_type()?,
                src: value.location,
            })?;
            self.release_location(&value)?;
        }
        let exit = self.exit_label()?;
        self.writer.br(exit)?;
        self.set_unreachable(true)?;
        Ok(EmitInfo::VOID)
    }

    pub(super) fn emit_unreachable(&mut self) -> Result<EmitInfo> {
        self.writer.emit(Instr::Unreachable)?;
        self.set_unreachable(true)?;
        Ok(EmitInfo::VOID)
    }
}
