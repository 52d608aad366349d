//! In-memory model of a decoded module.
//!
//! The model owns every signature, function, global and segment of one
//! module. It is populated by the module generator section by section, and
//! treated as read-only once per-function bytecode generation starts.
//!
//! # Module environment
//!
//! At run time a module instance is a flat array of 8-byte slots:
//!
//! ```text
//!   [0]                      linear memory handle
//!   [import_func_offset..]   host functions, one per function import
//!   [func_offset..]          every function of the index space (thunks first)
//!   [table_offset..]         one indirect call table per signature
//!   [global_offset..]        global storage, grouped by type
//! ```
//!
//! Each offset depends on the counts before it, so the module generator
//! fixes them one at a time as the corresponding sections are read.

mod function;
mod global;
mod segment;
mod signature;

pub use function::{FunctionImport, FunctionInfo, FunctionSource};
pub use global::{Global, GlobalKind};
pub use segment::{DataSegment, ElementSegment, InitExpr};
pub use signature::Signature;

use crate::error::{CompileError, Result};
use crate::types::{Literal, WasmType};
use wasmbc_bytecode::VAR_SIZE;

/// Maximum number of 64 KiB pages in a 32-bit linear memory.
pub const MAX_MEMORY_PAGES: u32 = 65536;

/// Linear memory declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub min_pages: u32,
    pub max_pages: Option<u32>,
    pub imported: bool,
}

/// Kind of an exported item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Function,
    Table,
    Memory,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// Which part of the function index space an index falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionIndexType {
    ImportThunk,
    Function,
    Invalid,
}

/// Slot offsets of each region of the module environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentLayout {
    pub memory_offset: u32,
    pub import_func_offset: u32,
    pub func_offset: u32,
    pub table_offset: u32,
    pub global_offset: u32,
}

impl Default for EnvironmentLayout {
    fn default() -> Self {
        Self {
            memory_offset: 0,
            import_func_offset: 1,
            func_offset: 1,
            table_offset: 1,
            global_offset: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct WasmModule {
    binary: Vec<u8>,
    signatures: Vec<Signature>,
    /// Canonical signature id for every signature id.
    equivalent_signatures: Vec<u32>,
    functions: Vec<FunctionInfo>,
    imports: Vec<FunctionImport>,
    globals: Vec<Global>,
    /// Number of globals per type, indexed by `bank_slot`.
    global_counts: [u32; 4],
    exports: Vec<Export>,
    memory: Option<MemoryInfo>,
    table_size: Option<u32>,
    element_segments: Vec<ElementSegment>,
    data_segments: Vec<DataSegment>,
    start_function: Option<u32>,
    layout: EnvironmentLayout,
}

fn bank_slot(ty: WasmType) -> Option<usize> {
    WasmType::VALUE_TYPES.iter().position(|&t| t == ty)
}

impl WasmModule {
    /// Create an empty model that keeps its own copy of `binary`.
    ///
    /// Function bodies are recorded as ranges into this copy and decoded
    /// again when their bytecode is generated.
    pub fn new(binary: &[u8]) -> Self {
        Self {
            binary: binary.to_vec(),
            ..Self::default()
        }
    }

    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    // ── Signatures ──────────────────────────────────────────────────────────

    /// Register a signature; returns its id.
    pub fn add_signature(&mut self, params: Vec<WasmType>, result: WasmType) -> u32 {
        let id = self.signatures.len() as u32;
        self.signatures.push(Signature::new(id, params, result));
        id
    }

    pub fn signature(&self, id: u32) -> Result<&Signature> {
        self.signatures
            .get(id as usize)
            .ok_or_else(|| CompileError::out_of_range("signature", id, self.signatures.len()))
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn signature_count(&self) -> u32 {
        self.signatures.len() as u32
    }

    /// Map every signature to the first signature with the same shape.
    pub fn calculate_equivalent_signatures(&mut self) {
        self.equivalent_signatures = self
            .signatures
            .iter()
            .enumerate()
            .map(|(i, sig)| {
                self.signatures[..i]
                    .iter()
                    .find(|earlier| earlier.is_equivalent(sig))
                    .map_or(i as u32, Signature::id)
            })
            .collect();
    }

    /// Canonical id among signatures structurally equal to `id`.
    pub fn equivalent_signature_id(&self, id: u32) -> Result<u32> {
        self.signature(id)?;
        Ok(self
            .equivalent_signatures
            .get(id as usize)
            .copied()
            .unwrap_or(id))
    }

    // ── Functions ───────────────────────────────────────────────────────────

    /// Declare a function with signature `signature_id`; returns its index.
    pub fn add_function(&mut self, signature_id: u32) -> Result<u32> {
        let sig = self.signature(signature_id).map_err(|_| {
            CompileError::invalid(format!("function signature {signature_id} is out of bound"))
        })?;
        let (params, result) = (sig.params().to_vec(), sig.result());
        let number = self.functions.len() as u32;
        self.functions.push(FunctionInfo::new(
            number,
            signature_id,
            &params,
            result,
            FunctionSource::Pending,
        ));
        Ok(number)
    }

    /// Register a host function import and its forwarding thunk.
    ///
    /// Imports must be added before any defined function.
    pub fn add_function_import(&mut self, signature_id: u32, module: &str, field: &str) -> Result<()> {
        if self.functions.len() != self.imports.len() {
            return Err(CompileError::invalid(
                "function imports must precede defined functions",
            ));
        }
        let sig = self.signature(signature_id).map_err(|_| {
            CompileError::invalid(format!("function signature {signature_id} is out of bound"))
        })?;
        let (params, result) = (sig.params().to_vec(), sig.result());
        let import_index = self.imports.len() as u32;
        self.imports.push(FunctionImport {
            module: module.to_string(),
            field: field.to_string(),
            signature_id,
        });
        let number = self.functions.len() as u32;
        let mut thunk = FunctionInfo::new(
            number,
            signature_id,
            &params,
            result,
            FunctionSource::Thunk { import_index },
        );
        thunk.set_name(format!("{module}.{field}.Thunk[{number}]"));
        self.functions.push(thunk);
        Ok(())
    }

    pub fn function(&self, index: u32) -> Result<&FunctionInfo> {
        self.functions
            .get(index as usize)
            .ok_or_else(|| CompileError::out_of_range("function", index, self.functions.len()))
    }

    pub fn function_mut(&mut self, index: u32) -> Result<&mut FunctionInfo> {
        let count = self.functions.len();
        self.functions
            .get_mut(index as usize)
            .ok_or_else(|| CompileError::out_of_range("function", index, count))
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    /// Number of entries in the function index space, thunks included.
    pub fn function_count(&self) -> u32 {
        self.functions.len() as u32
    }

    /// Number of functions defined by this module.
    pub fn defined_function_count(&self) -> u32 {
        self.function_count() - self.import_count()
    }

    /// One past the largest valid function index.
    pub fn max_function_index(&self) -> u32 {
        self.function_count()
    }

    pub fn function_index_type(&self, index: u32) -> FunctionIndexType {
        if index < self.import_count() {
            FunctionIndexType::ImportThunk
        } else if index < self.function_count() {
            FunctionIndexType::Function
        } else {
            FunctionIndexType::Invalid
        }
    }

    pub fn function_signature(&self, index: u32) -> Result<&Signature> {
        self.signature(self.function(index)?.signature_id())
    }

    pub fn function_import(&self, index: u32) -> Result<&FunctionImport> {
        self.imports
            .get(index as usize)
            .ok_or_else(|| CompileError::out_of_range("import", index, self.imports.len()))
    }

    /// Number of function imports.
    pub fn import_count(&self) -> u32 {
        self.imports.len() as u32
    }

    // ── Globals ─────────────────────────────────────────────────────────────

    /// Declare a global; returns its index.
    pub fn add_global(
        &mut self,
        ty: WasmType,
        kind: GlobalKind,
        init: Option<InitExpr>,
    ) -> Result<u32> {
        let slot = bank_slot(ty)
            .ok_or_else(|| CompileError::invalid(format!("invalid global type {ty}")))?;
        let mutable = kind == GlobalKind::Mutable;
        let bank_index = self.global_counts[slot];
        self.global_counts[slot] += 1;
        let index = self.globals.len() as u32;
        self.globals
            .push(Global::new(ty, kind, mutable, init, bank_index));
        Ok(index)
    }

    /// Declare an immutable global provided by the host.
    pub fn add_global_import(
        &mut self,
        ty: WasmType,
        mutable: bool,
        module: &str,
        field: &str,
    ) -> Result<u32> {
        if mutable {
            return Err(CompileError::Nyi(format!(
                "mutable imported global {module}.{field}"
            )));
        }
        self.add_global(
            ty,
            GlobalKind::ImportedReference {
                module: module.to_string(),
                field: field.to_string(),
            },
            None,
        )
    }

    pub fn global(&self, index: u32) -> Result<&Global> {
        self.globals
            .get(index as usize)
            .ok_or_else(|| CompileError::out_of_range("global", index, self.globals.len()))
    }

    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    pub fn global_count(&self) -> u32 {
        self.globals.len() as u32
    }

    /// Slot of global `index` within the module environment, in units of the
    /// global's own type size.
    ///
    /// Globals are grouped by type in `VALUE_TYPES` order; each group starts
    /// at a multiple of its type size.
    pub fn offset_for_global(&self, index: u32) -> Result<u32> {
        let global = self.global(index)?;
        let base = u64::from(self.layout.global_offset) * u64::from(VAR_SIZE);
        let mut byte_offset = base;
        for (slot, ty) in WasmType::VALUE_TYPES.iter().enumerate() {
            let size = u64::from(ty.byte_size());
            byte_offset = byte_offset.next_multiple_of(size);
            if *ty == global.ty() {
                let offset = byte_offset / size + u64::from(global.bank_index());
                return u32::try_from(offset)
                    .map_err(|_| CompileError::invalid(format!("global {index} offset overflows")));
            }
            byte_offset += u64::from(self.global_counts[slot]) * size;
        }
        Err(CompileError::invalid(format!("invalid global type {}", global.ty())))
    }

    /// Bytes of global storage, including alignment padding between groups.
    pub fn globals_byte_size(&self) -> u64 {
        WasmType::VALUE_TYPES
            .iter()
            .zip(self.global_counts)
            .fold(0u64, |acc, (ty, count)| {
                let size = u64::from(ty.byte_size());
                acc.next_multiple_of(size) + u64::from(count) * size
            })
    }

    // ── Exports, memory, table, start ───────────────────────────────────────

    pub fn add_export(&mut self, name: &str, kind: ExportKind, index: u32) -> Result<()> {
        let count = match kind {
            ExportKind::Function => self.function_count(),
            ExportKind::Global => self.global_count(),
            ExportKind::Memory => u32::from(self.memory.is_some()),
            ExportKind::Table => u32::from(self.table_size.is_some()),
        };
        if index >= count {
            return Err(CompileError::invalid(format!(
                "export {name} refers to {kind:?} {index}, which does not exist"
            )));
        }
        self.exports.push(Export {
            name: name.to_string(),
            kind,
            index,
        });
        Ok(())
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// First export name of function `index`, if it is exported.
    pub fn function_export_name(&self, index: u32) -> Option<&str> {
        self.exports
            .iter()
            .find(|e| e.kind == ExportKind::Function && e.index == index)
            .map(|e| e.name.as_str())
    }

    pub fn initialize_memory(&mut self, min_pages: u32, max_pages: Option<u32>, imported: bool) -> Result<()> {
        if self.memory.is_some() {
            return Err(CompileError::invalid("memory already allocated"));
        }
        if min_pages > MAX_MEMORY_PAGES {
            return Err(CompileError::invalid(format!(
                "memory size {min_pages} exceeds {MAX_MEMORY_PAGES} pages"
            )));
        }
        if let Some(max) = max_pages {
            if max < min_pages {
                return Err(CompileError::invalid(format!(
                    "memory maximum size {max} is smaller than minimum {min_pages}"
                )));
            }
        }
        self.memory = Some(MemoryInfo {
            min_pages,
            max_pages,
            imported,
        });
        Ok(())
    }

    pub fn memory(&self) -> Option<&MemoryInfo> {
        self.memory.as_ref()
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    pub fn set_table_size(&mut self, size: u32) -> Result<()> {
        if self.table_size.is_some() {
            return Err(CompileError::invalid("table already allocated"));
        }
        self.table_size = Some(size);
        Ok(())
    }

    pub fn table_size(&self) -> u32 {
        self.table_size.unwrap_or(0)
    }

    /// Function index stored at `index` of the table after element
    /// initialization, if any segment covers it. The first covering
    /// segment wins.
    pub fn table_value(&self, index: u32) -> Result<Option<u32>> {
        if index >= self.table_size() {
            return Err(CompileError::out_of_range(
                "table element",
                index,
                self.table_size() as usize,
            ));
        }
        Ok(self
            .element_segments
            .iter()
            .find_map(|seg| seg.element_at(index)))
    }

    pub fn set_start_function(&mut self, index: u32) {
        if index < self.function_count() {
            self.start_function = Some(index);
        } else {
            log::warn!("ignoring start function {index}: out of range");
        }
    }

    pub fn start_function(&self) -> Option<u32> {
        self.start_function
    }

    // ── Segments ────────────────────────────────────────────────────────────

    pub fn add_element_segment(&mut self, table_index: u32, offset: InitExpr, elements: Vec<u32>) -> Result<()> {
        if table_index != 0 {
            return Err(CompileError::invalid(format!(
                "invalid table index {table_index}"
            )));
        }
        if let Some(&bad) = elements.iter().find(|&&f| f >= self.function_count()) {
            return Err(CompileError::out_of_range(
                "function",
                bad,
                self.functions.len(),
            ));
        }
        let index = self.element_segments.len() as u32;
        self.element_segments
            .push(ElementSegment::new(index, table_index, offset, elements));
        Ok(())
    }

    pub fn element_segment(&self, index: u32) -> Result<&ElementSegment> {
        self.element_segments.get(index as usize).ok_or_else(|| {
            CompileError::out_of_range("element segment", index, self.element_segments.len())
        })
    }

    pub fn element_segments(&self) -> &[ElementSegment] {
        &self.element_segments
    }

    /// Evaluate every element segment's base and check it fits the table.
    pub fn resolve_table_element_offsets(&mut self) -> Result<()> {
        let table_size = self.table_size();
        for i in 0..self.element_segments.len() {
            let offset = self.offset_from_init(self.element_segments[i].offset_expr())?;
            self.element_segments[i].resolve(offset, table_size)?;
        }
        Ok(())
    }

    pub fn add_data_segment(&mut self, offset: InitExpr, data: Vec<u8>) -> u32 {
        let index = self.data_segments.len() as u32;
        self.data_segments
            .push(DataSegment::new(index, offset, data));
        index
    }

    pub fn data_segment(&self, index: u32) -> Result<&DataSegment> {
        self.data_segments.get(index as usize).ok_or_else(|| {
            CompileError::out_of_range("data segment", index, self.data_segments.len())
        })
    }

    pub fn data_segments(&self) -> &[DataSegment] {
        &self.data_segments
    }

    /// Destination address of data segment `index` in linear memory.
    pub fn data_segment_destination(&self, index: u32) -> Result<u32> {
        let segment = self.data_segment(index)?;
        self.offset_from_init(segment.offset_expr())
    }

    /// Evaluate a segment base address.
    ///
    /// Accepts an `i32.const`, or a `global.get` of an immutable i32 global
    /// whose value is known at compile time.
    pub fn offset_from_init(&self, expr: &InitExpr) -> Result<u32> {
        match expr {
            InitExpr::Const(Literal::I32(v)) => Ok(*v as u32),
            InitExpr::GetGlobal(index) => {
                let global = self.global(*index)?;
                match global.const_value() {
                    Some(Literal::I32(v)) => Ok(v as u32),
                    _ => Err(CompileError::invalid(format!(
                        "global {index} must be an immutable i32 constant"
                    ))),
                }
            }
            InitExpr::Const(other) => Err(CompileError::invalid(format!(
                "invalid init_expr for element offset: {} constant",
                other.wasm_type()
            ))),
        }
    }

    // ── Environment layout ──────────────────────────────────────────────────

    pub fn layout(&self) -> &EnvironmentLayout {
        &self.layout
    }

    /// Place defined functions right after the host imports.
    pub(crate) fn set_func_offset(&mut self) {
        self.layout.func_offset = self.layout.import_func_offset + self.import_count();
    }

    /// Place the indirect tables after the function index space.
    pub(crate) fn set_table_offset(&mut self) {
        self.layout.table_offset = self.layout.func_offset + self.function_count();
    }

    /// Place global storage after one table per signature.
    pub(crate) fn set_global_offset(&mut self) {
        self.layout.global_offset = self.layout.table_offset + self.signature_count();
    }

    /// Number of 8-byte slots in the module environment.
    pub fn module_environment_size(&self) -> u64 {
        1 + u64::from(self.import_count())
            + u64::from(self.function_count())
            + u64::from(self.signature_count())
            + self.globals_byte_size().div_ceil(u64::from(VAR_SIZE))
    }
}
