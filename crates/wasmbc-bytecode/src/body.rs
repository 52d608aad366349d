//! Host container for one compiled function.
//!
//! The header part (name, argument shape, return type) is filled in as soon as
//! the module structure is known. Code and frame layout are attached later,
//! once the function's bytecode has been generated; until then the body is
//! "deferred".

use crate::{Code, RegType, RegisterSpace, RESERVED_REGISTER_COUNT, VAR_SIZE};
use std::fmt;

/// Register counts and placement of one typed bank within the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BankLayout {
    /// Reserved slots at the bottom of the bank.
    pub const_count: u32,
    /// Local registers (params included).
    pub var_count: u32,
    /// Maximum simultaneously live temporaries.
    pub tmp_count: u32,
    /// Byte offset of the bank from the start of the frame.
    pub byte_offset: u32,
}

impl BankLayout {
    pub fn register_count(&self) -> u32 {
        self.const_count + self.var_count + self.tmp_count
    }
}

/// Frame layout computed after generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    pub int: BankLayout,
    pub float: BankLayout,
    pub double: BankLayout,
    /// Largest number of outgoing argument slots any call needs.
    pub out_param_max_depth: u32,
    /// Total registers over all banks.
    pub var_count: u32,
}

impl FrameLayout {
    /// Lay out the three banks one after another.
    ///
    /// Int registers start after the reserved untyped slots, float registers
    /// follow, and double registers start at the next 8-byte boundary.
    /// Returns `None` if the frame would not fit in an `i32` byte size.
    pub fn compute(
        int: &RegisterSpace,
        float: &RegisterSpace,
        double: &RegisterSpace,
        out_param_max_depth: u32,
    ) -> Option<Self> {
        let bank = |space: &RegisterSpace, byte_offset: u32| BankLayout {
            const_count: space.reserved_count(),
            var_count: space.var_count(),
            tmp_count: space.tmp_count(),
            byte_offset,
        };

        let int_offset = RESERVED_REGISTER_COUNT.checked_mul(VAR_SIZE)?;
        let float_offset =
            int_offset.checked_add(int.register_count().checked_mul(RegType::Int.byte_size())?)?;
        let double_offset = float_offset
            .checked_add(float.register_count().checked_mul(RegType::Float.byte_size())?)?
            .checked_next_multiple_of(RegType::Double.byte_size())?;
        let frame_end = double_offset
            .checked_add(double.register_count().checked_mul(RegType::Double.byte_size())?)?;
        if frame_end > i32::MAX as u32 {
            return None;
        }

        Some(Self {
            int: bank(int, int_offset),
            float: bank(float, float_offset),
            double: bank(double, double_offset),
            out_param_max_depth,
            var_count: int.register_count() + float.register_count() + double.register_count(),
        })
    }

    /// Total frame size in bytes.
    pub fn byte_size(&self) -> u32 {
        self.double.byte_offset + self.double.register_count() * RegType::Double.byte_size()
    }
}

/// A compiled (or still deferred) function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub name: String,
    /// Index in the module's function index space.
    pub number: u32,
    pub arg_types: Vec<RegType>,
    /// Byte size of each argument slot. Always at least three entries.
    pub arg_sizes: Vec<u32>,
    /// Sum of the argument sizes of the declared params.
    pub arg_byte_size: u32,
    pub return_type: Option<RegType>,
    pub uses_heap_buffer: bool,
    pub layout: Option<FrameLayout>,
    pub code: Option<Code>,
}

impl FunctionBody {
    pub fn new(name: impl Into<String>, number: u32) -> Self {
        Self {
            name: name.into(),
            number,
            arg_types: Vec::new(),
            arg_sizes: Vec::new(),
            arg_byte_size: 0,
            return_type: None,
            uses_heap_buffer: false,
            layout: None,
            code: None,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.arg_types.len()
    }

    /// Whether bytecode is still to be generated.
    pub fn is_deferred(&self) -> bool {
        self.code.is_none()
    }

    /// Attach generated code. Replaces any previous code.
    pub fn attach(&mut self, code: Code, layout: FrameLayout, uses_heap_buffer: bool) {
        self.code = Some(code);
        self.layout = Some(layout);
        self.uses_heap_buffer = uses_heap_buffer;
    }
}

impl fmt::Display for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {} #{} (", self.name, self.number)?;
        for (i, ty) in self.arg_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")?;
        if let Some(ret) = self.return_type {
            write!(f, " -> {ret}")?;
        }
        writeln!(f)?;

        let (Some(layout), Some(code)) = (&self.layout, &self.code) else {
            return writeln!(f, "  <deferred>");
        };
        for (name, bank) in [
            ("int", &layout.int),
            ("float", &layout.float),
            ("double", &layout.double),
        ] {
            writeln!(
                f,
                "  {name:<6} vars={} tmps={} offset={}",
                bank.var_count, bank.tmp_count, bank.byte_offset
            )?;
        }
        writeln!(f, "  out params={}", layout.out_param_max_depth)?;
        write!(f, "{code}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(bank: RegType, vars: u32, tmps: u32) -> RegisterSpace {
        let mut s = RegisterSpace::new(bank, RESERVED_REGISTER_COUNT);
        for _ in 0..vars {
            s.acquire_register().unwrap();
        }
        for _ in 0..tmps {
            s.acquire_tmp_register();
        }
        s
    }

    #[test]
    fn banks_are_laid_out_in_order() {
        let int = space(RegType::Int, 2, 1); // 5 registers
        let float = space(RegType::Float, 0, 1); // 3 registers
        let double = space(RegType::Double, 1, 0); // 3 registers
        let layout = FrameLayout::compute(&int, &float, &double, 3).unwrap();

        assert_eq!(layout.int.byte_offset, 16);
        assert_eq!(layout.float.byte_offset, 16 + 5 * 4);
        // 36 + 12 = 48 is already 8-aligned.
        assert_eq!(layout.double.byte_offset, 48);
        assert_eq!(layout.int.var_count, 2);
        assert_eq!(layout.int.tmp_count, 1);
        assert_eq!(layout.var_count, 11);
        assert_eq!(layout.byte_size(), 48 + 3 * 8);
    }

    #[test]
    fn double_bank_is_aligned() {
        let int = space(RegType::Int, 1, 0); // 3 registers -> 12 bytes
        let float = space(RegType::Float, 0, 0); // 2 registers -> 8 bytes
        let double = space(RegType::Double, 0, 0);
        let layout = FrameLayout::compute(&int, &float, &double, 0).unwrap();
        // 16 + 12 + 8 = 36 -> 40
        assert_eq!(layout.double.byte_offset, 40);
        assert_eq!(layout.double.byte_offset % 8, 0);
    }

    #[test]
    fn new_body_is_deferred() {
        let body = FunctionBody::new("f", 0);
        assert!(body.is_deferred());
        assert!(body.to_string().contains("<deferred>"));
    }
}
