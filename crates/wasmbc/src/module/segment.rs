use crate::error::{CompileError, Result};
use crate::types::Literal;

/// Restricted constant expression used by global initializers and segment
/// base addresses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitExpr {
    Const(Literal),
    GetGlobal(u32),
}

/// Active element segment: function indices copied into a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    index: u32,
    table_index: u32,
    offset_expr: InitExpr,
    elements: Vec<u32>,
    /// Base offset, known once globals are resolved.
    offset: Option<u32>,
}

impl ElementSegment {
    pub fn new(index: u32, table_index: u32, offset_expr: InitExpr, elements: Vec<u32>) -> Self {
        Self {
            index,
            table_index,
            offset_expr,
            elements,
            offset: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn table_index(&self) -> u32 {
        self.table_index
    }

    pub fn offset_expr(&self) -> &InitExpr {
        &self.offset_expr
    }

    pub fn elements(&self) -> &[u32] {
        &self.elements
    }

    pub fn len(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Resolved base offset; `None` until `resolve` ran.
    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    /// Fix the base offset, checking the segment fits into a table of
    /// `table_size` entries.
    pub(crate) fn resolve(&mut self, offset: u32, table_size: u32) -> Result<()> {
        let limit = u64::from(offset) + u64::from(self.len());
        if limit > u64::from(table_size) {
            return Err(CompileError::ElementOutOfBounds {
                segment: self.index,
                index: limit - 1,
                table_size,
            });
        }
        self.offset = Some(offset);
        Ok(())
    }

    /// Function index this segment puts at `table_index`, if it covers it.
    pub fn element_at(&self, table_index: u32) -> Option<u32> {
        let offset = self.offset?;
        let rel = table_index.checked_sub(offset)?;
        self.elements.get(rel as usize).copied()
    }
}

/// Active data segment: bytes copied into linear memory at instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    index: u32,
    offset_expr: InitExpr,
    data: Vec<u8>,
}

impl DataSegment {
    pub fn new(index: u32, offset_expr: InitExpr, data: Vec<u8>) -> Self {
        Self {
            index,
            offset_expr,
            data,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn offset_expr(&self) -> &InitExpr {
        &self.offset_expr
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
