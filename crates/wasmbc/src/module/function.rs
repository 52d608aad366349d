use crate::types::WasmType;
use std::ops::Range;
use wasmbc_bytecode::FunctionBody;

/// Where a function's expressions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionSource {
    /// Synthetic forwarding body for a function import.
    Thunk { import_index: u32 },
    /// Declared in the function section; the code section has not been read yet.
    Pending,
    /// Body in the module binary.
    Binary {
        /// Whole body entry, locals included.
        body: Range<usize>,
        /// The operator stream only.
        operators: Range<usize>,
    },
}

/// A host function import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionImport {
    pub module: String,
    pub field: String,
    pub signature_id: u32,
}

/// One entry in the function index space.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    number: u32,
    name: Option<String>,
    signature_id: u32,
    /// Params first, then declared locals.
    locals: Vec<WasmType>,
    param_count: u32,
    result: WasmType,
    source: FunctionSource,
    body: Option<FunctionBody>,
}

impl FunctionInfo {
    pub(crate) fn new(
        number: u32,
        signature_id: u32,
        params: &[WasmType],
        result: WasmType,
        source: FunctionSource,
    ) -> Self {
        Self {
            number,
            name: None,
            signature_id,
            locals: params.to_vec(),
            param_count: params.len() as u32,
            result,
            source,
            body: None,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn signature_id(&self) -> u32 {
        self.signature_id
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn result(&self) -> WasmType {
        self.result
    }

    pub fn locals(&self) -> &[WasmType] {
        &self.locals
    }

    pub fn local_count(&self) -> u32 {
        self.locals.len() as u32
    }

    pub fn local(&self, index: u32) -> Option<WasmType> {
        self.locals.get(index as usize).copied()
    }

    pub(crate) fn add_locals(&mut self, ty: WasmType, count: u32) {
        self.locals
            .extend(std::iter::repeat(ty).take(count as usize));
    }

    pub fn source(&self) -> &FunctionSource {
        &self.source
    }

    pub(crate) fn set_source(&mut self, source: FunctionSource) {
        self.source = source;
    }

    pub fn is_import_thunk(&self) -> bool {
        matches!(self.source, FunctionSource::Thunk { .. })
    }

    /// Byte size of the body in the binary; zero for thunks.
    pub fn body_size(&self) -> usize {
        match &self.source {
            FunctionSource::Binary { body, .. } => body.len(),
            _ => 0,
        }
    }

    pub fn body(&self) -> Option<&FunctionBody> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut FunctionBody> {
        self.body.as_mut()
    }

    pub(crate) fn set_body(&mut self, body: FunctionBody) {
        self.body = Some(body);
    }
}
