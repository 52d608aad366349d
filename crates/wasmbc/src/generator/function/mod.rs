//! Per-function bytecode generation.
//!
//! `FunctionGenerator` walks one function's expressions in order, simulating
//! the WebAssembly evaluation stack with register locations. Every value on
//! the stack lives in a temporary register; opcodes pop their operands,
//! release them, and push a freshly acquired result. Structured control flow
//! becomes labels and jumps on the `ByteCodeWriter`.
//!
//! - `control.rs`: blocks, loops, if/else, branches and returns
//! - `translate.rs`: the opcode dispatch and everything that is not control flow

mod control;
mod translate;

use crate::error::{CompileError, Result};
use crate::module::{FunctionInfo, WasmModule};
use crate::reader::ExprReader;
use crate::types::WasmType;
use wasmbc_bytecode::{
    ByteCodeWriter, Code, Const, FrameLayout, Instr, Label, RegSlot, RegType, RegisterSpace,
    RESERVED_REGISTER_COUNT,
};

/// A value on the evaluation stack: where it lives and what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EmitInfo {
    pub(crate) location: RegSlot,
    pub(crate) ty: WasmType,
}

impl EmitInfo {
    /// Result of an opcode that produces nothing.
    pub(crate) const VOID: EmitInfo = EmitInfo {
        location: RegSlot(0),
        ty: WasmType::Void,
    };

    pub(crate) fn new(location: RegSlot, ty: WasmType) -> Self {
        Self { location, ty }
    }

    pub(crate) fn is_void(&self) -> bool {
        self.ty.is_void()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StackEntry {
    /// Bottom of the values belonging to one block.
    ScopeMarker,
    Value(EmitInfo),
}

/// One lexically open block, loop or if.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockInfo {
    /// Where branches to this block go.
    pub(crate) label: Label,
    /// Register receiving the block's result, for non-void blocks.
    pub(crate) yield_info: Option<EmitInfo>,
    pub(crate) did_yield: bool,
}

impl BlockInfo {
    pub(crate) fn yield_type(&self) -> Option<WasmType> {
        self.yield_info.map(|info| info.ty)
    }
}

/// Output of a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCode {
    pub code: Code,
    pub layout: FrameLayout,
    pub uses_heap_buffer: bool,
}

pub struct FunctionGenerator<'m, R> {
    module: &'m WasmModule,
    function: &'m FunctionInfo,
    name: String,
    reader: R,
    writer: ByteCodeWriter,
    eval_stack: Vec<StackEntry>,
    blocks: Vec<BlockInfo>,
    int_space: RegisterSpace,
    float_space: RegisterSpace,
    double_space: RegisterSpace,
    /// Register of each local, params first.
    locals: Vec<EmitInfo>,
    exit_label: Option<Label>,
    max_arg_out_depth: u32,
    unreachable: bool,
    uses_heap_buffer: bool,
}

impl<'m, R: ExprReader> FunctionGenerator<'m, R> {
    pub fn new(module: &'m WasmModule, index: u32, reader: R) -> Result<Self> {
        let function = module.function(index)?;
        let name = match function.body() {
            Some(body) => body.name.clone(),
            None => function
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("wasm-function[{index}]")),
        };
        Ok(Self {
            module,
            function,
            name,
            reader,
            writer: ByteCodeWriter::new(),
            eval_stack: Vec::new(),
            blocks: Vec::new(),
            int_space: RegisterSpace::new(RegType::Int, RESERVED_REGISTER_COUNT),
            float_space: RegisterSpace::new(RegType::Float, RESERVED_REGISTER_COUNT),
            double_space: RegisterSpace::new(RegType::Double, RESERVED_REGISTER_COUNT),
            locals: Vec::new(),
            exit_label: None,
            max_arg_out_depth: 0,
            unreachable: false,
            uses_heap_buffer: false,
        })
    }

    /// Generate the function's bytecode.
    ///
    /// Either the whole function is generated, or an error naming the
    /// function and the byte offset of the failing opcode is returned and
    /// nothing written so far survives.
    pub fn generate(mut self) -> Result<GeneratedCode> {
        log::debug!("generating bytecode for {}", self.name);
        match self.generate_body() {
            Ok(generated) => Ok(generated),
            Err(err) => {
                self.writer.reset();
                Err(CompileError::InFunction {
                    name: self.name,
                    offset: self.reader.current_offset(),
                    size: self.reader.body_size(),
                    source: Box::new(err),
                })
            }
        }
    }

    fn generate_body(&mut self) -> Result<GeneratedCode> {
        self.writer.begin();
        let exit_label = self.writer.define_label();
        self.exit_label = Some(exit_label);
        self.enregister_locals()?;

        let result = self.emit_function_block()?;
        self.emit_return_expr(result)?;
        if !self.eval_stack.is_empty() {
            return Err(CompileError::StackNotEmpty(self.eval_stack.len()));
        }
        if !self.reader.is_completed() {
            return Err(CompileError::invalid(
                "function body continues past its final end",
            ));
        }

        self.writer.mark_label(exit_label)?;
        self.writer.emit(Instr::Ret)?;
        let code = self.writer.end()?;

        let layout = FrameLayout::compute(
            &self.int_space,
            &self.float_space,
            &self.double_space,
            self.max_arg_out_depth,
        )
        .ok_or_else(|| CompileError::invalid(format!("frame of {} is too large", self.name)))?;

        log::debug!(
            "{}: {} instructions, {} registers",
            self.name,
            code.len(),
            layout.var_count
        );
        Ok(GeneratedCode {
            code,
            layout,
            uses_heap_buffer: self.uses_heap_buffer,
        })
    }

    /// Give every param and local its own register; zero the declared locals.
    fn enregister_locals(&mut self) -> Result<()> {
        let param_count = self.function.param_count() as usize;
        for (i, &ty) in self.function.locals().iter().enumerate() {
            let reg_type = ty.reg_type()?;
            let location = self.space(reg_type).acquire_register()?;
            if i >= param_count {
                self.writer.emit(Instr::LdConst {
                    dst: location,
                    value: Const::zero(reg_type),
                })?;
            }
            self.locals.push(EmitInfo::new(location, ty));
        }
        Ok(())
    }

    // ── Register spaces ─────────────────────────────────────────────────────

    fn space(&mut self, ty: RegType) -> &mut RegisterSpace {
        match ty {
            RegType::Int => &mut self.int_space,
            RegType::Float => &mut self.float_space,
            RegType::Double => &mut self.double_space,
        }
    }

    fn acquire_tmp(&mut self, ty: WasmType) -> Result<RegSlot> {
        let reg_type = ty.reg_type()?;
        let slot = self.space(reg_type).acquire_tmp_register();
        log::trace!("acquire {reg_type} {slot}");
        Ok(slot)
    }

    fn release_location(&mut self, info: &EmitInfo) -> Result<()> {
        if info.is_void() {
            return Ok(());
        }
        let reg_type = info.ty.reg_type()?;
        log::trace!("release {reg_type} {}", info.location);
        self.space(reg_type).release_location(info.location)?;
        Ok(())
    }

    // ── Evaluation stack ────────────────────────────────────────────────────

    fn push_eval_stack(&mut self, info: EmitInfo) {
        self.eval_stack.push(StackEntry::Value(info));
    }

    /// Pop a value, checking it against `expected` unless that is `Void`.
    fn pop_eval_stack(&mut self, expected: WasmType, context: &'static str) -> Result<EmitInfo> {
        let info = match self.eval_stack.last() {
            Some(StackEntry::Value(info)) => *info,
            Some(StackEntry::ScopeMarker) | None => return Err(CompileError::MissingOperand),
        };
        self.eval_stack.pop();
        if !expected.is_void() && info.ty != expected {
            return Err(CompileError::TypeMismatch {
                context,
                expected,
                found: info.ty,
            });
        }
        Ok(info)
    }

    fn push_scope_marker(&mut self) {
        self.eval_stack.push(StackEntry::ScopeMarker);
    }

    /// Close the current scope; only the marker may be left.
    fn pop_scope_marker(&mut self) -> Result<()> {
        let values = self
            .eval_stack
            .iter()
            .rev()
            .take_while(|entry| **entry != StackEntry::ScopeMarker)
            .count();
        if values > 0 {
            return Err(CompileError::StackNotEmpty(values));
        }
        match self.eval_stack.pop() {
            Some(StackEntry::ScopeMarker) => Ok(()),
            _ => Err(CompileError::invalid("evaluation stack has no open scope")),
        }
    }

    /// Enter or leave unreachable mode. Entering releases every value of the
    /// current scope.
    fn set_unreachable(&mut self, unreachable: bool) -> Result<()> {
        self.unreachable = unreachable;
        if !unreachable {
            return Ok(());
        }
        while let Some(StackEntry::Value(info)) = self.eval_stack.last().copied() {
            self.eval_stack.pop();
            self.release_location(&info)?;
        }
        Ok(())
    }

    // ── Block stack ─────────────────────────────────────────────────────────

    /// Open a block; non-void blocks get a yield register.
    fn push_label(&mut self, ty: WasmType, label: Label) -> Result<()> {
        let yield_info = if ty.is_void() {
            None
        } else {
            Some(EmitInfo::new(self.acquire_tmp(ty)?, ty))
        };
        self.blocks.push(BlockInfo {
            label,
            yield_info,
            did_yield: false,
        });
        Ok(())
    }

    /// Close the innermost block and return its result.
    ///
    /// A non-void block nothing ever yielded to gets a zero, so that its
    /// result register is always written.
    fn pop_label(&mut self, label: Label) -> Result<EmitInfo> {
        let block = self
            .blocks
            .pop()
            .ok_or_else(|| CompileError::invalid("block stack underflow"))?;
        if block.label != label {
            return Err(CompileError::invalid(format!(
                "closing {label} but innermost block is {}",
                block.label
            )));
        }
        self.finish_block(block)
    }

    fn finish_block(&mut self, block: BlockInfo) -> Result<EmitInfo> {
        let Some(info) = block.yield_info else {
            return Ok(EmitInfo::VOID);
        };
        if !block.did_yield {
            let reg_type = info.ty.reg_type()?;
            self.writer.emit(Instr::LdConst {
                dst: info.location,
                value: Const::zero(reg_type),
            })?;
        }
        Ok(info)
    }

    /// Block at relative `depth`; 0 is the innermost.
    fn block_at(&self, depth: u32) -> Result<&BlockInfo> {
        let nesting = self.blocks.len();
        (depth as usize)
            .checked_add(1)
            .and_then(|d| nesting.checked_sub(d))
            .and_then(|i| self.blocks.get(i))
            .ok_or(CompileError::InvalidBranchTarget { depth, nesting })
    }

    fn block_at_mut(&mut self, depth: u32) -> Result<&mut BlockInfo> {
        let nesting = self.blocks.len();
        let index = (depth as usize)
            .checked_add(1)
            .and_then(|d| nesting.checked_sub(d))
            .ok_or(CompileError::InvalidBranchTarget { depth, nesting })?;
        Ok(&mut self.blocks[index])
    }

    fn exit_label(&self) -> Result<Label> {
        self.exit_label
            .ok_or_else(|| CompileError::invalid("function exit label not defined"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ThunkReader;

    fn module_with(params: Vec<WasmType>, result: WasmType) -> WasmModule {
        let mut module = WasmModule::default();
        let sig = module.add_signature(params, result);
        module.add_function_import(sig, "env", "f").unwrap();
        module.calculate_equivalent_signatures();
        module.set_func_offset();
        module.set_table_offset();
        module.set_global_offset();
        module
    }

    #[test]
    fn thunk_forwards_arguments_to_host() {
        let module = module_with(vec![WasmType::I32, WasmType::F64], WasmType::I32);
        let generated = FunctionGenerator::new(&module, 0, ThunkReader::new(2, 0))
            .unwrap()
            .generate()
            .unwrap();
        let instrs = &generated.code.instrs;
        assert!(instrs.iter().any(|i| matches!(
            i,
            Instr::LdFunc { slot: 1 }
        )));
        assert!(matches!(
            instrs.iter().find(|i| matches!(i, Instr::Call { .. })),
            Some(Instr::Call {
                kind: wasmbc_bytecode::CallKind::External,
                arg_slots: 3,
                ret: Some(RegType::Int),
            })
        ));
        assert_eq!(instrs.last(), Some(&Instr::Ret));
        assert_eq!(generated.layout.int.var_count, 1);
        assert_eq!(generated.layout.double.var_count, 1);
        assert_eq!(generated.layout.out_param_max_depth, 3);
    }

    #[test]
    fn thunk_with_float_param_is_nyi() {
        let module = module_with(vec![WasmType::F32], WasmType::Void);
        let err = FunctionGenerator::new(&module, 0, ThunkReader::new(1, 0))
            .unwrap()
            .generate()
            .unwrap_err();
        assert!(matches!(err.root(), CompileError::Nyi(_)));
        assert!(err.to_string().contains("env.f.Thunk[0]"));
    }

    #[test]
    fn branch_depth_is_bounded() {
        let module = module_with(vec![], WasmType::Void);
        let mut generator =
            FunctionGenerator::new(&module, 0, ThunkReader::new(0, 0)).unwrap();
        let label = generator.writer.define_label();
        generator.push_label(WasmType::Void, label).unwrap();
        assert!(generator.block_at(0).is_ok());
        assert!(matches!(
            generator.block_at(1),
            Err(CompileError::InvalidBranchTarget { depth: 1, nesting: 1 })
        ));
    }

    #[test]
    fn scope_marker_detects_leftover_values() {
        let module = module_with(vec![], WasmType::Void);
        let mut generator =
            FunctionGenerator::new(&module, 0, ThunkReader::new(0, 0)).unwrap();
        generator.push_scope_marker();
        let slot = generator.acquire_tmp(WasmType::I32).unwrap();
        generator.push_eval_stack(EmitInfo::new(slot, WasmType::I32));
        assert!(matches!(
            generator.pop_scope_marker(),
            Err(CompileError::StackNotEmpty(1))
        ));
        generator.set_unreachable(true).unwrap();
        assert_eq!(generator.int_space.live_tmp_count(), 0);
        assert!(generator.pop_scope_marker().is_ok());
    }
}
