//! WebAssembly binary reader.
//!
//! This module wraps the `wasmparser` crate. Construction scans the header
//! and the section table once; afterwards sections are visited in whatever
//! order the module generator asks for them (`read_next_section` +
//! `process_current_section`), and function bodies are decoded one
//! expression at a time through an [`ExprReader`].
//!
//! The reader only checks binary well-formedness. Types and stack effects are
//! the generators' business.

mod body;
mod node;

pub use body::{ExprReader, FunctionBodyReader, ThunkReader};
pub use node::{CallTarget, Node};

use crate::error::{CompileError, Result};
use crate::module::{ExportKind, FunctionSource, GlobalKind, InitExpr, WasmModule};
use crate::types::{Literal, WasmType};
use wasmparser::{
    DataKind, DataSectionReader, ElementItems, ElementKind,
    ElementSectionReader, Encoding, ExportSectionReader, ExternalKind, FunctionBody,
    FunctionSectionReader, GlobalSectionReader, ImportSectionReader, KnownCustom,
    MemorySectionReader, NameSectionReader, Operator, Parser, Payload, TableSectionReader,
    TypeRef, TypeSectionReader,
};

/// Largest number of locals a single function may declare.
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;

/// Section kinds the module generator knows about, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionCode {
    Signatures,
    ImportTable,
    FunctionSignatures,
    IndirectFunctionTable,
    Memory,
    Global,
    ExportTable,
    StartFunction,
    Element,
    FunctionBodies,
    DataSegments,
    Names,
}

/// Static properties of a section kind.
#[derive(Debug, Clone, Copy)]
pub struct SectionInfo {
    pub code: SectionCode,
    pub name: &'static str,
    /// Section that must be present whenever this one is.
    pub precedent: Option<SectionCode>,
    /// Errors while processing are logged and ignored.
    pub ignore_errors: bool,
}

const fn section(
    code: SectionCode,
    name: &'static str,
    precedent: Option<SectionCode>,
    ignore_errors: bool,
) -> SectionInfo {
    SectionInfo {
        code,
        name,
        precedent,
        ignore_errors,
    }
}

/// Section table in processing order.
pub const SECTIONS: [SectionInfo; 12] = [
    section(SectionCode::Signatures, "type", None, false),
    section(SectionCode::ImportTable, "import", None, false),
    section(
        SectionCode::FunctionSignatures,
        "function",
        Some(SectionCode::Signatures),
        false,
    ),
    section(SectionCode::IndirectFunctionTable, "table", None, false),
    section(SectionCode::Memory, "memory", None, false),
    section(SectionCode::Global, "global", None, false),
    section(SectionCode::ExportTable, "export", None, false),
    section(
        SectionCode::StartFunction,
        "start",
        Some(SectionCode::Signatures),
        false,
    ),
    section(SectionCode::Element, "element", None, false),
    section(
        SectionCode::FunctionBodies,
        "code",
        Some(SectionCode::FunctionSignatures),
        false,
    ),
    section(SectionCode::DataSegments, "data", None, false),
    section(SectionCode::Names, "name", Some(SectionCode::Signatures), true),
];

impl SectionCode {
    pub fn info(self) -> &'static SectionInfo {
        &SECTIONS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }
}

/// Undecoded contents of one section.
enum SectionPayload<'a> {
    Type(TypeSectionReader<'a>),
    Import(ImportSectionReader<'a>),
    Function(FunctionSectionReader<'a>),
    Table(TableSectionReader<'a>),
    Memory(MemorySectionReader<'a>),
    Global(GlobalSectionReader<'a>),
    Export(ExportSectionReader<'a>),
    Start(u32),
    Element(ElementSectionReader<'a>),
    Code(Vec<FunctionBody<'a>>),
    Data(DataSectionReader<'a>),
    Name(NameSectionReader<'a>),
}

pub struct WasmBinaryReader<'a> {
    sections: [Option<SectionPayload<'a>>; SECTIONS.len()],
    current: Option<SectionCode>,
}

impl<'a> WasmBinaryReader<'a> {
    /// Check the header and index every section of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = Self {
            sections: std::array::from_fn(|_| None),
            current: None,
        };

        for payload in Parser::new(0).parse_all(bytes) {
            match payload? {
                Payload::Version { num, encoding, .. } => {
                    if encoding != Encoding::Module || num != 1 {
                        return Err(CompileError::invalid(format!(
                            "unsupported binary version {num} ({encoding:?})"
                        )));
                    }
                }
                Payload::TypeSection(r) => reader.insert(SectionCode::Signatures, SectionPayload::Type(r))?,
                Payload::ImportSection(r) => reader.insert(SectionCode::ImportTable, SectionPayload::Import(r))?,
                Payload::FunctionSection(r) => {
                    reader.insert(SectionCode::FunctionSignatures, SectionPayload::Function(r))?
                }
                Payload::TableSection(r) => {
                    reader.insert(SectionCode::IndirectFunctionTable, SectionPayload::Table(r))?
                }
                Payload::MemorySection(r) => reader.insert(SectionCode::Memory, SectionPayload::Memory(r))?,
                Payload::GlobalSection(r) => reader.insert(SectionCode::Global, SectionPayload::Global(r))?,
                Payload::ExportSection(r) => reader.insert(SectionCode::ExportTable, SectionPayload::Export(r))?,
                Payload::StartSection { func, .. } => {
                    reader.insert(SectionCode::StartFunction, SectionPayload::Start(func))?
                }
                Payload::ElementSection(r) => reader.insert(SectionCode::Element, SectionPayload::Element(r))?,
                Payload::CodeSectionStart { count, .. } => reader.insert(
                    SectionCode::FunctionBodies,
                    SectionPayload::Code(Vec::with_capacity(count as usize)),
                )?,
                Payload::CodeSectionEntry(body) => {
                    if let Some(SectionPayload::Code(bodies)) =
                        &mut reader.sections[SectionCode::FunctionBodies as usize]
                    {
                        bodies.push(body);
                    }
                }
                Payload::DataSection(r) => reader.insert(SectionCode::DataSegments, SectionPayload::Data(r))?,
                Payload::DataCountSection { .. } => {}
                Payload::CustomSection(custom) => match custom.as_known() {
                    KnownCustom::Name(names) => {
                        if reader.sections[SectionCode::Names as usize].is_some() {
                            log::warn!("ignoring duplicate name section");
                        } else {
                            reader.sections[SectionCode::Names as usize] =
                                Some(SectionPayload::Name(names));
                        }
                    }
                    _ => log::debug!("skipping custom section {:?}", custom.name()),
                },
                Payload::UnknownSection { id, .. } => {
                    return Err(CompileError::invalid(format!("unknown section id {id}")));
                }
                Payload::End(_) => break,
                _ => return Err(CompileError::Nyi("non-MVP section".into())),
            }
        }

        Ok(reader)
    }

    fn insert(&mut self, code: SectionCode, payload: SectionPayload<'a>) -> Result<()> {
        let slot = &mut self.sections[code as usize];
        if slot.is_some() {
            return Err(CompileError::DuplicateSection(code.name()));
        }
        *slot = Some(payload);
        Ok(())
    }

    /// Whether the binary contains section `code`. Makes it current if so.
    pub fn read_next_section(&mut self, code: SectionCode) -> bool {
        let present = self.sections[code as usize].is_some();
        self.current = present.then_some(code);
        present
    }

    /// Decode the current section into `module`.
    pub fn process_current_section(&mut self, module: &mut WasmModule) -> Result<()> {
        let code = self
            .current
            .take()
            .ok_or_else(|| CompileError::invalid("no current section"))?;
        let Some(payload) = self.sections[code as usize].take() else {
            return Err(CompileError::invalid(format!(
                "{} section already processed",
                code.name()
            )));
        };
        log::debug!("processing {} section", code.name());

        let result = match payload {
            SectionPayload::Type(r) => read_signatures(r, module),
            SectionPayload::Import(r) => read_imports(r, module),
            SectionPayload::Function(r) => read_function_signatures(r, module),
            SectionPayload::Table(r) => read_table(r, module),
            SectionPayload::Memory(r) => read_memory(r, module),
            SectionPayload::Global(r) => read_globals(r, module),
            SectionPayload::Export(r) => read_exports(r, module),
            SectionPayload::Start(func) => {
                module.set_start_function(func);
                Ok(())
            }
            SectionPayload::Element(r) => read_elements(r, module),
            SectionPayload::Code(bodies) => read_function_bodies(bodies, module),
            SectionPayload::Data(r) => read_data_segments(r, module),
            SectionPayload::Name(r) => read_names(r, module),
        };

        match result {
            Err(err) if code.info().ignore_errors => {
                log::warn!("ignoring invalid {} section: {err}", code.name());
                Ok(())
            }
            Err(err) => Err(CompileError::Section {
                section: code.name(),
                source: Box::new(err),
            }),
            Ok(()) => Ok(()),
        }
    }
}

// ── Section decoders ────────────────────────────────────────────────────────

fn read_signatures(reader: TypeSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for rec_group in reader {
        for sub_type in rec_group?.types() {
            let wasmparser::CompositeInnerType::Func(func_ty) = &sub_type.composite_type.inner
            else {
                return Err(CompileError::Nyi("non-function type".into()));
            };
            let params = func_ty
                .params()
                .iter()
                .map(|&vt| WasmType::from_wasmparser(vt))
                .collect::<Result<Vec<_>>>()?;
            let result = match func_ty.results() {
                [] => WasmType::Void,
                [vt] => WasmType::from_wasmparser(*vt)?,
                many => {
                    return Err(CompileError::Nyi(format!(
                        "signature with {} results",
                        many.len()
                    )))
                }
            };
            module.add_signature(params, result);
        }
    }
    Ok(())
}

fn read_imports(reader: ImportSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for import in reader {
        let import = import?;
        match import.ty {
            TypeRef::Func(sig) => module.add_function_import(sig, import.module, import.name)?,
            TypeRef::Table(table) => module.set_table_size(table_size(table.initial)?)?,
            TypeRef::Memory(memory) => {
                let (min, max) = memory_limits(&memory)?;
                module.initialize_memory(min, max, true)?;
            }
            TypeRef::Global(global) => {
                let ty = WasmType::from_wasmparser(global.content_type)?;
                module.add_global_import(ty, global.mutable, import.module, import.name)?;
            }
            _ => {
                return Err(CompileError::Nyi(format!(
                    "import kind of {}.{}",
                    import.module, import.name
                )))
            }
        }
    }
    Ok(())
}

fn read_function_signatures(
    reader: FunctionSectionReader<'_>,
    module: &mut WasmModule,
) -> Result<()> {
    for sig in reader {
        module.add_function(sig?)?;
    }
    Ok(())
}

fn table_size(initial: u64) -> Result<u32> {
    u32::try_from(initial)
        .map_err(|_| CompileError::invalid(format!("table size {initial} out of range")))
}

fn read_table(reader: TableSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for table in reader {
        module.set_table_size(table_size(table?.ty.initial)?)?;
    }
    Ok(())
}

fn memory_limits(memory: &wasmparser::MemoryType) -> Result<(u32, Option<u32>)> {
    if memory.memory64 || memory.shared {
        return Err(CompileError::Nyi("64-bit or shared memory".into()));
    }
    let pages = |n: u64| {
        u32::try_from(n).map_err(|_| CompileError::invalid(format!("memory size {n} out of range")))
    };
    Ok((pages(memory.initial)?, memory.maximum.map(pages).transpose()?))
}

fn read_memory(reader: MemorySectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for memory in reader {
        let (min, max) = memory_limits(&memory?)?;
        module.initialize_memory(min, max, false)?;
    }
    Ok(())
}

/// Decode a constant initializer expression.
pub fn read_init_expr(expr: &wasmparser::ConstExpr<'_>) -> Result<InitExpr> {
    let mut reader = expr.get_operators_reader();
    let init = match reader.read()? {
        Operator::I32Const { value } => InitExpr::Const(Literal::I32(value)),
        Operator::I64Const { value } => InitExpr::Const(Literal::I64(value)),
        Operator::F32Const { value } => InitExpr::Const(Literal::F32(f32::from_bits(value.bits()))),
        Operator::F64Const { value } => InitExpr::Const(Literal::F64(f64::from_bits(value.bits()))),
        Operator::GlobalGet { global_index } => InitExpr::GetGlobal(global_index),
        op => return Err(CompileError::invalid(format!("invalid init_expr {op:?}"))),
    };
    match reader.read()? {
        Operator::End => Ok(init),
        op => Err(CompileError::invalid(format!(
            "init_expr must be a single instruction, found {op:?}"
        ))),
    }
}

fn read_globals(reader: GlobalSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for global in reader {
        let global = global?;
        let ty = WasmType::from_wasmparser(global.ty.content_type)?;
        let mut init = read_init_expr(&global.init_expr)?;

        // Copy values of constant globals so the new global is constant too.
        if let InitExpr::GetGlobal(index) = init {
            let source = module.global(index)?;
            if source.ty() != ty {
                return Err(CompileError::TypeMismatch {
                    context: "global initializer",
                    expected: ty,
                    found: source.ty(),
                });
            }
            if let Some(lit) = source.const_value() {
                init = InitExpr::Const(lit);
            }
        }
        if let InitExpr::Const(lit) = init {
            if lit.wasm_type() != ty {
                return Err(CompileError::TypeMismatch {
                    context: "global initializer",
                    expected: ty,
                    found: lit.wasm_type(),
                });
            }
        }

        let kind = if global.ty.mutable {
            GlobalKind::Mutable
        } else {
            GlobalKind::Const
        };
        module.add_global(ty, kind, Some(init))?;
    }
    Ok(())
}

fn read_exports(reader: ExportSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for export in reader {
        let export = export?;
        let kind = match export.kind {
            ExternalKind::Func => ExportKind::Function,
            ExternalKind::Table => ExportKind::Table,
            ExternalKind::Memory => ExportKind::Memory,
            ExternalKind::Global => ExportKind::Global,
            ExternalKind::Tag => return Err(CompileError::Nyi("tag export".into())),
        };
        module.add_export(export.name, kind, export.index)?;
    }
    Ok(())
}

fn read_elements(reader: ElementSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for element in reader {
        let element = element?;
        let ElementKind::Active {
            table_index,
            offset_expr,
        } = element.kind
        else {
            log::debug!("skipping passive or declared element segment");
            continue;
        };
        let offset = read_init_expr(&offset_expr)?;
        let functions = match element.items {
            ElementItems::Functions(funcs) => funcs.into_iter().collect::<Result<Vec<u32>, _>>()?,
            ElementItems::Expressions(..) => {
                return Err(CompileError::Nyi("expression element segments".into()))
            }
        };
        module.add_element_segment(table_index.unwrap_or(0), offset, functions)?;
    }
    Ok(())
}

fn read_function_bodies(bodies: Vec<FunctionBody<'_>>, module: &mut WasmModule) -> Result<()> {
    let declared = module.defined_function_count();
    if bodies.len() != declared as usize {
        return Err(CompileError::invalid(format!(
            "function body count {} does not match declared function count {declared}",
            bodies.len()
        )));
    }

    let first = module.import_count();
    for (i, body) in bodies.into_iter().enumerate() {
        let function = module.function_mut(first + i as u32)?;
        let mut declared_locals = 0u32;
        for local in body.get_locals_reader()? {
            let (count, vt) = local?;
            declared_locals = declared_locals.saturating_add(count);
            if declared_locals > MAX_FUNCTION_LOCALS {
                return Err(CompileError::invalid(format!(
                    "function {} declares more than {MAX_FUNCTION_LOCALS} locals",
                    function.number()
                )));
            }
            function.add_locals(WasmType::from_wasmparser(vt)?, count);
        }

        let operators = body.get_operators_reader()?.get_binary_reader();
        let start = operators.original_position();
        function.set_source(FunctionSource::Binary {
            body: body.range(),
            operators: start..start + operators.bytes_remaining(),
        });
    }
    Ok(())
}

fn read_data_segments(reader: DataSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for data in reader {
        let data = data?;
        match data.kind {
            DataKind::Active {
                memory_index: 0,
                offset_expr,
            } => {
                let offset = read_init_expr(&offset_expr)?;
                module.add_data_segment(offset, data.data.to_vec());
            }
            DataKind::Active { memory_index, .. } => {
                return Err(CompileError::invalid(format!(
                    "invalid memory index {memory_index}"
                )))
            }
            DataKind::Passive => log::debug!("skipping passive data segment"),
        }
    }
    Ok(())
}

fn read_names(reader: NameSectionReader<'_>, module: &mut WasmModule) -> Result<()> {
    for subsection in reader {
        if let wasmparser::Name::Function(names) = subsection? {
            for naming in names {
                let naming = naming?;
                // Thunks keep their synthesized names.
                if let Ok(function) = module.function_mut(naming.index) {
                    if !function.is_import_thunk() {
                        function.set_name(naming.name);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_from(wat: &str) -> WasmModule {
        let wasm = wat::parse_str(wat).unwrap();
        let mut module = WasmModule::new(&wasm);
        let mut reader = WasmBinaryReader::new(&wasm).unwrap();
        for info in &SECTIONS {
            if reader.read_next_section(info.code) {
                reader.process_current_section(&mut module).unwrap();
            }
        }
        module
    }

    #[test]
    fn section_table_is_in_canonical_order() {
        for (i, info) in SECTIONS.iter().enumerate() {
            assert_eq!(info.code as usize, i);
            if let Some(p) = info.precedent {
                assert!(p < info.code, "{} precedes its precedent", info.name);
            }
        }
        assert_eq!(SectionCode::FunctionBodies.name(), "code");
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(WasmBinaryReader::new(b"\0asn\x01\0\0\0").is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        // Type section announces 4 bytes but only 2 follow.
        let bytes = [0x00, 0x61, 0x73, 0x6d, 0x01, 0, 0, 0, 0x01, 0x04, 0x01, 0x60];
        assert!(WasmBinaryReader::new(&bytes).is_err());
    }

    #[test]
    fn rejects_duplicate_sections() {
        let bytes = [
            0x00, 0x61, 0x73, 0x6d, 0x01, 0, 0, 0, // header
            0x01, 0x01, 0x00, // empty type section
            0x01, 0x01, 0x00, // and again
        ];
        // wasmparser may catch the repeat itself; either way it is fatal.
        let err = WasmBinaryReader::new(&bytes).err().unwrap();
        assert!(matches!(
            err,
            CompileError::DuplicateSection("type") | CompileError::Binary(_)
        ));
    }

    #[test]
    fn reports_present_sections_only() {
        let wasm = wat::parse_str("(module (memory 1))").unwrap();
        let mut reader = WasmBinaryReader::new(&wasm).unwrap();
        assert!(!reader.read_next_section(SectionCode::Signatures));
        assert!(reader.read_next_section(SectionCode::Memory));
    }

    #[test]
    fn decodes_imports_and_globals() {
        let module = module_from(
            r#"
            (module
                (import "env" "log" (func (param i32)))
                (import "env" "base" (global i32))
                (import "env" "mem" (memory 1 4))
                (global (mut f64) (f64.const 1.5))
                (global i32 (i32.const 7))
                (func (param i32) (local f32 f32) (local f64)))
            "#,
        );
        assert_eq!(module.import_count(), 1);
        assert_eq!(module.function_count(), 2);
        assert!(module.function(0).unwrap().is_import_thunk());
        assert_eq!(module.global_count(), 3);
        assert!(matches!(
            module.global(0).unwrap().kind(),
            GlobalKind::ImportedReference { .. }
        ));
        assert!(module.global(1).unwrap().is_mutable());
        assert_eq!(module.global(2).unwrap().const_value(), Some(Literal::I32(7)));
        let memory = module.memory().unwrap();
        assert_eq!((memory.min_pages, memory.max_pages), (1, Some(4)));
        assert!(memory.imported);

        let f = module.function(1).unwrap();
        assert_eq!(
            f.locals(),
            &[WasmType::I32, WasmType::F32, WasmType::F32, WasmType::F64]
        );
        assert!(matches!(f.source(), FunctionSource::Binary { .. }));
    }

    #[test]
    fn decodes_segments() {
        let module = module_from(
            r#"
            (module
                (table 4 funcref)
                (memory 1)
                (func $f)
                (elem (i32.const 1) $f $f)
                (data (i32.const 16) "hi"))
            "#,
        );
        assert_eq!(module.table_size(), 4);
        let seg = module.element_segment(0).unwrap();
        assert_eq!(seg.elements(), &[0, 0]);
        assert_eq!(seg.offset_expr(), &InitExpr::Const(Literal::I32(1)));
        assert_eq!(module.data_segment(0).unwrap().data(), b"hi");
        assert_eq!(module.data_segment_destination(0).unwrap(), 16);
    }

    #[test]
    fn name_section_names_functions() {
        let module = module_from(
            r#"
            (module
                (import "env" "ext" (func $ext))
                (func $helper))
            "#,
        );
        assert_eq!(module.function(0).unwrap().name(), Some("env.ext.Thunk[0]"));
        assert_eq!(module.function(1).unwrap().name(), Some("helper"));
    }

    #[test]
    fn section_errors_name_the_section() {
        // A function section entry referring to a missing signature.
        let bytes = [
            0x00, 0x61, 0x73, 0x6d, 0x01, 0, 0, 0, // header
            0x03, 0x02, 0x01, 0x05, // function section: one function of type 5
        ];
        let mut module = WasmModule::new(&bytes);
        let mut reader = WasmBinaryReader::new(&bytes).unwrap();
        assert!(reader.read_next_section(SectionCode::FunctionSignatures));
        let err = reader.process_current_section(&mut module).unwrap_err();
        assert!(matches!(err, CompileError::Section { section: "function", .. }));
        assert!(err.to_string().contains("out of bound"));
    }
}
