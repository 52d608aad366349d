//! Section-by-section module generation.

use crate::error::{CompileError, Result};
use crate::module::WasmModule;
use crate::reader::{SectionCode, WasmBinaryReader, SECTIONS};
use crate::types::WasmType;
use wasmbc_bytecode::FunctionBody;

/// Number of argument size entries a header always has.
const MIN_ARG_SIZE_ENTRIES: usize = 3;

/// Visits sections in canonical order, enforcing their precedence and
/// fixing environment offsets as soon as the counts they depend on are known.
pub struct ModuleGenerator<'a> {
    reader: WasmBinaryReader<'a>,
    visited: [bool; SECTIONS.len()],
}

impl<'a> ModuleGenerator<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        Ok(Self {
            reader: WasmBinaryReader::new(bytes)?,
            visited: [false; SECTIONS.len()],
        })
    }

    /// Populate `module` from every section of the binary.
    pub fn generate(mut self, module: &mut WasmModule) -> Result<()> {
        for info in &SECTIONS {
            if !self.reader.read_next_section(info.code) {
                continue;
            }
            if let Some(precedent) = info.precedent {
                if !self.visited[precedent as usize] {
                    return Err(CompileError::MissingPrecedent {
                        precedent: precedent.name(),
                        section: info.name,
                    });
                }
            }
            self.visited[info.code as usize] = true;
            self.reader.process_current_section(module)?;
            after_section(info.code, module)?;
        }

        if self.visited[SectionCode::FunctionSignatures as usize]
            && !self.visited[SectionCode::FunctionBodies as usize]
        {
            return Err(CompileError::MissingSection(SectionCode::FunctionBodies.name()));
        }
        // Headers wait for the name section, which comes last.
        finish_functions(module)?;
        log::debug!(
            "module: {} functions ({} imported), {} signatures, {} globals, environment of {} slots",
            module.function_count(),
            module.import_count(),
            module.signature_count(),
            module.global_count(),
            module.module_environment_size()
        );
        Ok(())
    }
}

fn after_section(code: SectionCode, module: &mut WasmModule) -> Result<()> {
    match code {
        SectionCode::Signatures => module.calculate_equivalent_signatures(),
        SectionCode::FunctionSignatures => module.set_func_offset(),
        SectionCode::IndirectFunctionTable => module.set_table_offset(),
        SectionCode::Element => module.resolve_table_element_offsets()?,
        SectionCode::FunctionBodies => fix_function_offsets(module),
        _ => {}
    }
    Ok(())
}

/// Fix the offsets the code section waits for.
fn fix_function_offsets(module: &mut WasmModule) {
    module.set_func_offset();
    module.set_table_offset();
    module.set_global_offset();
}

/// Fix any offsets still open and build every header.
fn finish_functions(module: &mut WasmModule) -> Result<()> {
    fix_function_offsets(module);
    for index in 0..module.function_count() {
        let header = generate_function_header(module, index)?;
        module.function_mut(index)?.set_body(header);
    }
    Ok(())
}

/// Build the host-side header of function `index`: display name, argument
/// shape and return type. The code is attached later.
pub fn generate_function_header(module: &WasmModule, index: u32) -> Result<FunctionBody> {
    let function = module.function(index)?;
    let signature = module.signature(function.signature_id())?;

    let name = match (function.name(), module.function_export_name(index)) {
        (Some(name), _) => name.to_string(),
        (None, Some(export)) => format!("{export}[{index}]"),
        (None, None) => format!("wasm-function[{index}]"),
    };
    let mut body = FunctionBody::new(name, index);

    for (i, &param) in signature.params().iter().enumerate() {
        if param == WasmType::I64 {
            return Err(CompileError::Nyi(format!(
                "i64 parameter in signature of {}",
                body.name
            )));
        }
        let size = signature.param_size(i as u32)?;
        body.arg_types.push(param.reg_type()?);
        body.arg_sizes.push(size);
        body.arg_byte_size += size;
    }
    if body.arg_sizes.len() < MIN_ARG_SIZE_ENTRIES {
        body.arg_sizes.resize(MIN_ARG_SIZE_ENTRIES, 0);
    }
    body.return_type = match signature.result() {
        WasmType::Void => None,
        ty => Some(ty.reg_type()?),
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmbc_bytecode::RegType;

    const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    fn generate(bytes: &[u8]) -> Result<WasmModule> {
        let mut module = WasmModule::new(bytes);
        ModuleGenerator::new(bytes)?.generate(&mut module)?;
        Ok(module)
    }

    #[test]
    fn function_section_without_code_is_rejected() {
        let mut bytes = HEADER.to_vec();
        bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]); // type: () -> ()
        bytes.extend([0x03, 0x02, 0x01, 0x00]); // function: one of type 0
        let err = generate(&bytes).unwrap_err();
        assert!(matches!(err, CompileError::MissingSection("code")));
        assert_eq!(err.to_string(), "missing required section: code");
    }

    #[test]
    fn code_without_function_section_is_rejected() {
        let mut bytes = HEADER.to_vec();
        bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
        bytes.extend([0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b]); // code: one empty body
        let err = generate(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CompileError::MissingPrecedent {
                precedent: "function",
                section: "code"
            }
        ));
    }

    #[test]
    fn headers_follow_name_priority() {
        let wasm = wat::parse_str(
            r#"
            (module
                (func $named (param i32 f64) (result f32) f32.const 0)
                (func (export "run"))
                (func))
            "#,
        )
        .unwrap();
        let module = generate(&wasm).unwrap();

        let named = module.function(0).unwrap().body().unwrap();
        assert_eq!(named.name, "named");
        assert_eq!(named.arg_types, vec![RegType::Int, RegType::Double]);
        assert_eq!(named.arg_sizes, vec![8, 8, 0]);
        assert_eq!(named.arg_byte_size, 16);
        assert_eq!(named.return_type, Some(RegType::Float));
        assert!(named.is_deferred());

        assert_eq!(module.function(1).unwrap().body().unwrap().name, "run[1]");
        assert_eq!(
            module.function(2).unwrap().body().unwrap().name,
            "wasm-function[2]"
        );
    }

    #[test]
    fn i64_params_are_nyi() {
        let wasm = wat::parse_str("(module (func (param i64)))").unwrap();
        let err = generate(&wasm).unwrap_err();
        assert!(matches!(err, CompileError::Nyi(_)));
    }

    #[test]
    fn offsets_advance_with_sections() {
        let wasm = wat::parse_str(
            r#"
            (module
                (type $v (func))
                (type $i (func (param i32)))
                (import "env" "a" (func (type $v)))
                (import "env" "b" (func (type $i)))
                (table 2 funcref)
                (global (mut i32) (i32.const 0))
                (func (type $v))
                (elem (i32.const 0) 2 0))
            "#,
        )
        .unwrap();
        let module = generate(&wasm).unwrap();
        let layout = module.layout();
        assert_eq!(layout.import_func_offset, 1);
        assert_eq!(layout.func_offset, 3);
        assert_eq!(layout.table_offset, 6);
        assert_eq!(layout.global_offset, 8);
        assert_eq!(module.table_value(0).unwrap(), Some(2));
        assert_eq!(module.table_value(1).unwrap(), Some(0));
        assert!(module.functions().iter().all(|f| f.body().is_some()));
    }
}
