//! Compilation errors.
//!
//! Every failure in the reader, module model and generators is a
//! `CompileError`. Compilation is fail-fast: the first error aborts the
//! current function (and, unless the caller opts out, the module).

use crate::types::WasmType;
use thiserror::Error;
use wasmbc_bytecode::BytecodeError;

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("malformed binary: {0}")]
    Binary(#[from] wasmparser::BinaryReaderError),

    #[error("error while reading {section} section")]
    Section {
        section: &'static str,
        #[source]
        source: Box<CompileError>,
    },

    #[error("{precedent} section missing before {section}")]
    MissingPrecedent {
        precedent: &'static str,
        section: &'static str,
    },

    #[error("missing required section: {0}")]
    MissingSection(&'static str),

    #[error("duplicate {0} section")]
    DuplicateSection(&'static str),

    #[error("{kind} index {index} is out of range (count {count})")]
    IndexOutOfRange {
        kind: &'static str,
        index: u64,
        count: u64,
    },

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: &'static str,
        expected: WasmType,
        found: WasmType,
    },

    #[error("call argument {index} does not match formal type: expected {expected}, found {found}")]
    ArgumentMismatch {
        index: u32,
        expected: WasmType,
        found: WasmType,
    },

    #[error("invalid branch target: depth {depth} with {nesting} open blocks")]
    InvalidBranchTarget { depth: u32, nesting: usize },

    #[error("{0} NYI")]
    Nyi(String),

    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(String),

    #[error("missing operand")]
    MissingOperand,

    #[error("expected stack to be empty, but has {0}")]
    StackNotEmpty(usize),

    #[error("unexpected {0} opcode")]
    UnexpectedOpcode(&'static str),

    #[error("out of bounds element in table[{segment}][{index}], table size: {table_size}")]
    ElementOutOfBounds {
        segment: u32,
        index: u64,
        table_size: u32,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("function {name} at offset {offset}/{size}")]
    InFunction {
        name: String,
        offset: usize,
        size: usize,
        #[source]
        source: Box<CompileError>,
    },

    #[error("compilation skipped")]
    Skipped,

    #[error("internal error: {0}")]
    Internal(#[from] BytecodeError),
}

impl CompileError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CompileError::Invalid(msg.into())
    }

    pub(crate) fn out_of_range(kind: &'static str, index: impl Into<u64>, count: usize) -> Self {
        CompileError::IndexOutOfRange {
            kind,
            index: index.into(),
            count: count as u64,
        }
    }

    /// The underlying error with section and function context stripped.
    pub fn root(&self) -> &CompileError {
        match self {
            CompileError::Section { source, .. } | CompileError::InFunction { source, .. } => {
                source.root()
            }
            other => other,
        }
    }
}
