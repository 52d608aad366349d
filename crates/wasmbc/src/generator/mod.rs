//! Module and function generators.
//!
//! The module generator drives the binary reader over every section and
//! fills a [`WasmModule`]. The function generator then turns one function at
//! a time into register bytecode, reading the module but never changing it.

mod function;
mod module;

pub use function::{FunctionGenerator, GeneratedCode};
pub use module::{generate_function_header, ModuleGenerator};

use crate::error::{CompileError, Result};
use crate::module::{FunctionSource, WasmModule};
use crate::reader::{FunctionBodyReader, ThunkReader};

/// Generate bytecode for function `index` with the reader its source calls for.
pub fn generate_code(module: &WasmModule, index: u32) -> Result<GeneratedCode> {
    let function = module.function(index)?;
    match function.source() {
        FunctionSource::Thunk { import_index } => {
            let reader = ThunkReader::new(function.param_count(), *import_index);
            FunctionGenerator::new(module, index, reader)?.generate()
        }
        FunctionSource::Binary { operators, .. } => {
            let reader = FunctionBodyReader::new(module.binary(), operators.clone())?;
            FunctionGenerator::new(module, index, reader)?.generate()
        }
        FunctionSource::Pending => Err(CompileError::invalid(format!(
            "function {index} has no body"
        ))),
    }
}
