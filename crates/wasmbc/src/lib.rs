//! wasmbc: WebAssembly to register-based bytecode compiler.
//!
//! The pipeline has two phases. The module generator reads every section of
//! a binary into a [`WasmModule`] and builds a header for each function.
//! The function generator then lowers each function body into register
//! bytecode ([`wasmbc_bytecode::Code`]) plus a frame layout, attached to the
//! function's header.

pub mod error;
pub mod generator;
pub mod module;
pub mod reader;
pub mod types;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use error::CompileError;
pub use generator::{FunctionGenerator, GeneratedCode, ModuleGenerator};
pub use module::WasmModule;
pub use types::WasmType;

use std::collections::BTreeSet;

/// Configuration options for compilation
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Only build function headers; bytecode is generated on demand with
    /// [`generate_function`].
    pub deferred: bool,
    /// Leave functions that fail to compile without code instead of failing
    /// the module.
    pub skip_invalid_functions: bool,
    /// Functions whose generation is switched off.
    pub disabled_functions: BTreeSet<u32>,
}

/// Compile a WebAssembly module to register bytecode.
///
/// # Example
/// ```no_run
/// use wasmbc::{compile, CompileOptions};
///
/// let wasm_bytes = std::fs::read("input.wasm").unwrap();
/// let module = compile(&wasm_bytes, &CompileOptions::default()).unwrap();
/// for function in module.functions() {
///     println!("{}", function.body().unwrap());
/// }
/// ```
pub fn compile(wasm_bytes: &[u8], options: &CompileOptions) -> Result<WasmModule> {
    let mut module = WasmModule::new(wasm_bytes);
    ModuleGenerator::new(wasm_bytes)
        .and_then(|generator| generator.generate(&mut module))
        .context("failed to read WebAssembly module")?;

    if options.deferred {
        return Ok(module);
    }

    for index in 0..module.function_count() {
        match generate_function(&mut module, index, options) {
            Ok(()) => {}
            Err(err) if options.skip_invalid_functions => {
                log::warn!("skipping function {index}: {:#}", anyhow::Error::new(err));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to compile function {index}"))
            }
        }
    }
    Ok(module)
}

/// Whether `wasm_bytes` compiles without error.
pub fn validate(wasm_bytes: &[u8]) -> bool {
    match compile(wasm_bytes, &CompileOptions::default()) {
        Ok(_) => true,
        Err(err) => {
            log::debug!("validation failed: {err:#}");
            false
        }
    }
}

/// Generate and attach the bytecode of function `index`.
///
/// On failure nothing is attached and any earlier code stays in place.
pub fn generate_function(
    module: &mut WasmModule,
    index: u32,
    options: &CompileOptions,
) -> Result<(), CompileError> {
    if options.disabled_functions.contains(&index) {
        return Err(CompileError::Skipped);
    }
    let generated = generator::generate_code(module, index)?;
    let body = module
        .function_mut(index)?
        .body_mut()
        .ok_or_else(|| CompileError::invalid(format!("function {index} has no header")))?;
    body.attach(generated.code, generated.layout, generated.uses_heap_buffer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: &str = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
    "#;

    #[test]
    fn deferred_compile_leaves_bodies_empty() {
        let wasm = wat::parse_str(ADD).unwrap();
        let options = CompileOptions {
            deferred: true,
            ..CompileOptions::default()
        };
        let mut module = compile(&wasm, &options).unwrap();
        assert!(module.function(0).unwrap().body().unwrap().is_deferred());

        generate_function(&mut module, 0, &options).unwrap();
        assert!(!module.function(0).unwrap().body().unwrap().is_deferred());
    }

    #[test]
    fn disabled_function_is_skipped() {
        let wasm = wat::parse_str(ADD).unwrap();
        let mut options = CompileOptions::default();
        options.disabled_functions.insert(0);
        assert!(compile(&wasm, &options).is_err());

        options.skip_invalid_functions = true;
        let module = compile(&wasm, &options).unwrap();
        assert!(module.function(0).unwrap().body().unwrap().is_deferred());
    }

    #[test]
    fn validate_reports_success() {
        assert!(validate(&wat::parse_str(ADD).unwrap()));
        assert!(!validate(b"not wasm"));
    }
}
