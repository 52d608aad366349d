//! Expression-level readers for function bodies.

use super::node::{CallTarget, Node};
use crate::error::{CompileError, Result};
use std::ops::Range;

/// A cursor over one function's expressions.
pub trait ExprReader {
    /// Decode the next opcode.
    fn read_expr(&mut self) -> Result<Node>;

    /// Offset of the next opcode relative to the start of the body.
    fn current_offset(&self) -> usize;

    /// Size of the body in bytes (or nodes, for synthetic bodies).
    fn body_size(&self) -> usize;

    /// Whether every expression of the body has been consumed.
    fn is_completed(&self) -> bool;
}

/// Reads operators straight out of the module binary.
pub struct FunctionBodyReader<'a> {
    reader: wasmparser::BinaryReader<'a>,
    start: usize,
    size: usize,
}

impl<'a> FunctionBodyReader<'a> {
    /// `operators` is the range of the operator stream within `binary`.
    pub fn new(binary: &'a [u8], operators: Range<usize>) -> Result<Self> {
        let bytes = binary.get(operators.clone()).ok_or_else(|| {
            CompileError::invalid(format!(
                "function body {operators:?} lies outside the binary ({} bytes)",
                binary.len()
            ))
        })?;
        Ok(Self {
            reader: wasmparser::BinaryReader::new(bytes, operators.start),
            start: operators.start,
            size: operators.len(),
        })
    }
}

impl ExprReader for FunctionBodyReader<'_> {
    fn read_expr(&mut self) -> Result<Node> {
        if self.reader.eof() {
            return Err(CompileError::invalid("unexpected end of function body"));
        }
        let op = self.reader.read_operator()?;
        log::trace!("{:>6}: {:?}", self.current_offset(), op);
        Node::from_operator(op)
    }

    fn current_offset(&self) -> usize {
        self.reader.original_position() - self.start
    }

    fn body_size(&self) -> usize {
        self.size
    }

    fn is_completed(&self) -> bool {
        self.reader.eof()
    }
}

/// Synthetic body of an import thunk: push every param, call the host
/// function, return its result.
pub struct ThunkReader {
    nodes: Vec<Node>,
    pos: usize,
}

impl ThunkReader {
    pub fn new(param_count: u32, import_index: u32) -> Self {
        let mut nodes: Vec<Node> = (0..param_count).map(Node::GetLocal).collect();
        nodes.push(Node::Call(CallTarget::Import(import_index)));
        nodes.push(Node::End);
        Self { nodes, pos: 0 }
    }
}

impl ExprReader for ThunkReader {
    fn read_expr(&mut self) -> Result<Node> {
        let node = self
            .nodes
            .get(self.pos)
            .cloned()
            .ok_or_else(|| CompileError::invalid("unexpected end of function body"))?;
        self.pos += 1;
        Ok(node)
    }

    fn current_offset(&self) -> usize {
        self.pos
    }

    fn body_size(&self) -> usize {
        self.nodes.len()
    }

    fn is_completed(&self) -> bool {
        self.pos == self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Literal;
    use wasmbc_bytecode::BinaryOp;

    #[test]
    fn thunk_forwards_params() {
        let mut r = ThunkReader::new(2, 5);
        assert_eq!(r.read_expr().unwrap(), Node::GetLocal(0));
        assert_eq!(r.read_expr().unwrap(), Node::GetLocal(1));
        assert_eq!(r.read_expr().unwrap(), Node::Call(CallTarget::Import(5)));
        assert!(!r.is_completed());
        assert_eq!(r.read_expr().unwrap(), Node::End);
        assert!(r.is_completed());
        assert!(r.read_expr().is_err());
    }

    #[test]
    fn body_reader_decodes_operators() {
        // i32.const 1; i32.const 2; i32.add; end
        let binary = [0xff, 0x41, 0x01, 0x41, 0x02, 0x6a, 0x0b];
        let mut r = FunctionBodyReader::new(&binary, 1..7).unwrap();
        assert_eq!(r.body_size(), 6);
        assert_eq!(r.read_expr().unwrap(), Node::Const(Literal::I32(1)));
        assert_eq!(r.current_offset(), 2);
        assert_eq!(r.read_expr().unwrap(), Node::Const(Literal::I32(2)));
        assert_eq!(r.read_expr().unwrap(), Node::Binary(BinaryOp::I32Add));
        assert_eq!(r.read_expr().unwrap(), Node::End);
        assert!(r.is_completed());
        assert!(r.read_expr().is_err());
    }

    #[test]
    fn body_range_must_be_in_bounds() {
        assert!(FunctionBodyReader::new(&[0x0b], 0..4).is_err());
    }

    #[test]
    fn truncated_operator_is_a_binary_error() {
        // i32.const with a missing immediate
        let binary = [0x41];
        let mut r = FunctionBodyReader::new(&binary, 0..1).unwrap();
        assert!(matches!(r.read_expr(), Err(CompileError::Binary(_))));
    }
}
