use super::segment::InitExpr;
use crate::types::{Literal, WasmType};

/// How a global is stored and whether it can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalKind {
    /// Immutable, defined by this module.
    Const,
    /// Mutable, defined by this module.
    Mutable,
    /// Provided by the host.
    ImportedReference { module: String, field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    ty: WasmType,
    kind: GlobalKind,
    mutable: bool,
    init: Option<InitExpr>,
    /// Position among the globals of the same type.
    bank_index: u32,
}

impl Global {
    pub(crate) fn new(
        ty: WasmType,
        kind: GlobalKind,
        mutable: bool,
        init: Option<InitExpr>,
        bank_index: u32,
    ) -> Self {
        Self {
            ty,
            kind,
            mutable,
            init,
            bank_index,
        }
    }

    pub fn ty(&self) -> WasmType {
        self.ty
    }

    pub fn kind(&self) -> &GlobalKind {
        &self.kind
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn init(&self) -> Option<&InitExpr> {
        self.init.as_ref()
    }

    pub fn bank_index(&self) -> u32 {
        self.bank_index
    }

    /// The value, when it is a local constant initialized by a literal.
    pub fn const_value(&self) -> Option<Literal> {
        match (&self.kind, &self.init) {
            (GlobalKind::Const, Some(InitExpr::Const(lit))) => Some(*lit),
            _ => None,
        }
    }
}
