//! Per-type virtual register allocation.
//!
//! A `RegisterSpace` is a bump allocator with stack discipline. Locals are
//! handed out first and never released; temporaries live above them and must
//! be released in strict reverse order of acquisition. Registers are
//! unlimited, so there is no spilling: the only state is the top of the stack
//! and the high-water mark used later for frame sizing.
//!
//! ```text
//!   0 .. reserved      reserved slots (return value, module env)
//!   reserved .. first  locals (params first, then declared locals)
//!   first .. next      live temporaries
//!   next .. count      dead temporaries, still part of the frame
//! ```

use crate::{BytecodeError, RegSlot, RegType};

#[derive(Debug, Clone)]
pub struct RegisterSpace {
    bank: RegType,
    reserved: u32,
    /// First temporary register; everything below is reserved or a local.
    first_tmp: u32,
    /// Next temporary to hand out.
    next: u32,
    /// High-water mark over the whole function.
    register_count: u32,
}

impl RegisterSpace {
    pub fn new(bank: RegType, reserved: u32) -> Self {
        Self {
            bank,
            reserved,
            first_tmp: reserved,
            next: reserved,
            register_count: reserved,
        }
    }

    pub fn bank(&self) -> RegType {
        self.bank
    }

    /// Acquire a register for a local variable.
    ///
    /// Must not be called while temporaries are live.
    pub fn acquire_register(&mut self) -> Result<RegSlot, BytecodeError> {
        if self.next != self.first_tmp {
            return Err(BytecodeError::LocalAfterTemporary { bank: self.bank });
        }
        let slot = RegSlot(self.first_tmp);
        self.first_tmp += 1;
        self.next += 1;
        self.register_count = self.register_count.max(self.next);
        Ok(slot)
    }

    /// Push a fresh temporary.
    pub fn acquire_tmp_register(&mut self) -> RegSlot {
        let slot = RegSlot(self.next);
        self.next += 1;
        self.register_count = self.register_count.max(self.next);
        slot
    }

    /// Pop a temporary. Only the most recently acquired one may be released.
    pub fn release_tmp_register(&mut self, slot: RegSlot) -> Result<(), BytecodeError> {
        if self.next == self.first_tmp {
            return Err(BytecodeError::NoTemporaryLive {
                bank: self.bank,
                found: slot,
            });
        }
        let top = RegSlot(self.next - 1);
        if slot != top {
            return Err(BytecodeError::ReleaseOutOfOrder {
                bank: self.bank,
                expected: top,
                found: slot,
            });
        }
        self.next -= 1;
        Ok(())
    }

    /// Release `slot` if it is a temporary; locals and reserved slots are ignored.
    pub fn release_location(&mut self, slot: RegSlot) -> Result<(), BytecodeError> {
        if self.is_tmp_register(slot) {
            self.release_tmp_register(slot)
        } else {
            Ok(())
        }
    }

    pub fn is_tmp_register(&self, slot: RegSlot) -> bool {
        slot.0 >= self.first_tmp
    }

    /// Number of temporaries currently live.
    pub fn live_tmp_count(&self) -> u32 {
        self.next - self.first_tmp
    }

    pub fn reserved_count(&self) -> u32 {
        self.reserved
    }

    /// Number of local registers.
    pub fn var_count(&self) -> u32 {
        self.first_tmp - self.reserved
    }

    /// Maximum number of temporaries that were live at once.
    pub fn tmp_count(&self) -> u32 {
        self.register_count - self.first_tmp
    }

    /// Total registers the frame must hold for this bank.
    pub fn register_count(&self) -> u32 {
        self.register_count
    }
}
