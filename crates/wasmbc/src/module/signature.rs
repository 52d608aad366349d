use crate::error::{CompileError, Result};
use crate::types::WasmType;
use std::fmt;
use wasmbc_bytecode::VAR_SIZE;

/// A function type: ordered params and a single (possibly void) result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    id: u32,
    params: Vec<WasmType>,
    result: WasmType,
}

impl Signature {
    pub fn new(id: u32, params: Vec<WasmType>, result: WasmType) -> Self {
        Self { id, params, result }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn params(&self) -> &[WasmType] {
        &self.params
    }

    pub fn param_count(&self) -> u32 {
        self.params.len() as u32
    }

    pub fn param(&self, index: u32) -> Result<WasmType> {
        self.params
            .get(index as usize)
            .copied()
            .ok_or_else(|| CompileError::out_of_range("param", index, self.params.len()))
    }

    pub fn result(&self) -> WasmType {
        self.result
    }

    /// Bytes the argument occupies in an outgoing call frame. Every argument
    /// takes at least one full slot.
    pub fn param_size(&self, index: u32) -> Result<u32> {
        Ok(self.param(index)?.byte_size().max(VAR_SIZE))
    }

    /// Bytes all arguments occupy in an outgoing call frame.
    pub fn params_size(&self) -> u32 {
        self.params
            .iter()
            .map(|ty| ty.byte_size().max(VAR_SIZE))
            .sum()
    }

    /// Structural equality: same params in the same order and same result.
    /// The id does not take part.
    pub fn is_equivalent(&self, other: &Signature) -> bool {
        self.result == other.result && self.params == other.params
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, ") -> {}", self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(id: u32, params: &[WasmType], result: WasmType) -> Signature {
        Signature::new(id, params.to_vec(), result)
    }

    #[test]
    fn equivalence_ignores_id() {
        let a = sig(0, &[WasmType::I32, WasmType::F64], WasmType::I32);
        let b = sig(7, &[WasmType::I32, WasmType::F64], WasmType::I32);
        assert!(a.is_equivalent(&b));
        assert!(b.is_equivalent(&a));
        assert!(a.is_equivalent(&a));
    }

    #[test]
    fn equivalence_is_order_sensitive() {
        let a = sig(0, &[WasmType::I32, WasmType::F64], WasmType::Void);
        let b = sig(1, &[WasmType::F64, WasmType::I32], WasmType::Void);
        assert!(!a.is_equivalent(&b));
        let c = sig(2, &[WasmType::I32, WasmType::F64], WasmType::I32);
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn every_param_takes_a_slot() {
        let s = sig(0, &[WasmType::I32, WasmType::F32, WasmType::F64], WasmType::Void);
        assert_eq!(s.param_size(0).unwrap(), 8);
        assert_eq!(s.params_size(), 24);
        assert!(s.param(3).is_err());
    }

    #[test]
    fn display() {
        let s = sig(0, &[WasmType::I32, WasmType::I32], WasmType::I32);
        assert_eq!(s.to_string(), "(i32, i32) -> i32");
    }
}
