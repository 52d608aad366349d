//! Integration tests: the shapes of code a function generator produces.
//!
//! Each example drives the register spaces and the writer by hand, the way
//! the compiler does for a small WebAssembly function, and checks the
//! resulting code and frame layout.

use wasmbc_bytecode::*;

struct Banks {
    int: RegisterSpace,
    float: RegisterSpace,
    double: RegisterSpace,
}

impl Banks {
    fn new() -> Self {
        Self {
            int: RegisterSpace::new(RegType::Int, RESERVED_REGISTER_COUNT),
            float: RegisterSpace::new(RegType::Float, RESERVED_REGISTER_COUNT),
            double: RegisterSpace::new(RegType::Double, RESERVED_REGISTER_COUNT),
        }
    }

    fn layout(&self, out_params: u32) -> FrameLayout {
        FrameLayout::compute(&self.int, &self.float, &self.double, out_params).unwrap()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Example 1: (func (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn add_function() {
    let mut banks = Banks::new();
    let mut w = ByteCodeWriter::new();
    w.begin();
    let exit = w.define_label();

    let a = banks.int.acquire_register().unwrap();
    let b = banks.int.acquire_register().unwrap();
    let result = banks.int.acquire_tmp_register();

    let lhs = banks.int.acquire_tmp_register();
    w.emit(Instr::Mov { ty: RegType::Int, dst: lhs, src: a }).unwrap();
    let rhs = banks.int.acquire_tmp_register();
    w.emit(Instr::Mov { ty: RegType::Int, dst: rhs, src: b }).unwrap();
    banks.int.release_tmp_register(rhs).unwrap();
    banks.int.release_tmp_register(lhs).unwrap();
    let sum = banks.int.acquire_tmp_register();
    w.emit(Instr::Binary { op: BinaryOp::I32Add, dst: sum, lhs, rhs }).unwrap();
    w.emit(Instr::Mov { ty: RegType::Int, dst: result, src: sum }).unwrap();
    banks.int.release_tmp_register(sum).unwrap();

    w.emit(Instr::Return { ty: RegType::Int, src: result }).unwrap();
    banks.int.release_tmp_register(result).unwrap();
    w.mark_label(exit).unwrap();
    w.emit(Instr::Ret).unwrap();
    let code = w.end().unwrap();

    assert_eq!(code.len(), 6);
    assert_eq!(code.label_offset(exit), Some(5));
    assert_eq!(banks.int.live_tmp_count(), 0);

    let layout = banks.layout(0);
    assert_eq!(layout.int.var_count, 2);
    assert_eq!(layout.int.tmp_count, 3);
    assert_eq!(layout.int.byte_offset, RESERVED_REGISTER_COUNT * VAR_SIZE);
    assert_eq!(layout.float.byte_offset, 16 + 7 * 4);
    assert_eq!(layout.double.byte_offset, 56);
}

// ═══════════════════════════════════════════════════════════════════════
// Example 2: a loop with a landing pad
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn loop_with_landing_pad() {
    let mut banks = Banks::new();
    let mut w = ByteCodeWriter::new();
    w.begin();
    let counter = banks.int.acquire_register().unwrap();

    let tail = w.define_label();
    let head = w.define_label();
    let pad = w.define_label();
    let id = w.enter_loop(head).unwrap();

    let one = banks.int.acquire_tmp_register();
    w.emit(Instr::LdConst { dst: one, value: Const::Int(1) }).unwrap();
    w.emit(Instr::Binary { op: BinaryOp::I32Sub, dst: counter, lhs: counter, rhs: one }).unwrap();
    banks.int.release_tmp_register(one).unwrap();
    w.emit(Instr::BrTrue { target: pad, cond: counter }).unwrap();

    w.br(tail).unwrap();
    w.mark_label(pad).unwrap();
    w.br(head).unwrap();
    w.mark_label(tail).unwrap();
    w.exit_loop(id).unwrap();
    w.emit(Instr::Ret).unwrap();
    let code = w.end().unwrap();

    assert_eq!(code.loops.len(), 1);
    assert_eq!(code.loops[0].start, 0);
    assert_eq!(code.loops[0].end, Some(5));
    assert_eq!(code.label_offset(pad), Some(4));
    assert_eq!(code.label_offset(head), Some(0));

    let listing = code.to_string();
    assert!(listing.contains("L1:"));
    assert!(listing.contains("Br L1"));
}

// ═══════════════════════════════════════════════════════════════════════
// Example 3: mixed banks, an outgoing call and a double-aligned frame
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn call_with_mixed_arguments() {
    let mut banks = Banks::new();
    let mut w = ByteCodeWriter::new();
    w.begin();

    let i = banks.int.acquire_tmp_register();
    w.emit(Instr::LdConst { dst: i, value: Const::Int(7) }).unwrap();
    let f = banks.float.acquire_tmp_register();
    w.emit(Instr::LdConst { dst: f, value: Const::Float(0.5) }).unwrap();
    let d = banks.double.acquire_tmp_register();
    w.emit(Instr::LdConst { dst: d, value: Const::Double(2.0) }).unwrap();

    w.emit(Instr::StartCall { kind: CallKind::Internal, arg_bytes: 32 }).unwrap();
    for (slot, (ty, src)) in [(RegType::Int, i), (RegType::Float, f), (RegType::Double, d)]
        .into_iter()
        .enumerate()
    {
        w.emit(Instr::ArgOut { kind: CallKind::Internal, ty, slot: slot as u32 + 1, src }).unwrap();
    }
    w.emit(Instr::LdFunc { slot: 3 }).unwrap();
    w.emit(Instr::Call { kind: CallKind::Internal, arg_slots: 4, ret: Some(RegType::Double) }).unwrap();

    banks.double.release_tmp_register(d).unwrap();
    banks.float.release_tmp_register(f).unwrap();
    banks.int.release_tmp_register(i).unwrap();
    let ret = banks.double.acquire_tmp_register();
    w.emit(Instr::ConvReturnValue { kind: CallKind::Internal, ty: RegType::Double, dst: ret }).unwrap();
    banks.double.release_tmp_register(ret).unwrap();
    w.emit(Instr::Ret).unwrap();
    let code = w.end().unwrap();
    assert_eq!(code.len(), 11);

    let layout = banks.layout(4);
    // 16 reserved bytes, then 3 int and 3 float registers; 40 is already aligned.
    assert_eq!(layout.float.byte_offset, 28);
    assert_eq!(layout.double.byte_offset, 40);
    assert_eq!(layout.byte_size(), 40 + 3 * 8);
    assert_eq!(layout.out_param_max_depth, 4);
    assert_eq!(layout.var_count, 9);
}

#[test]
fn temporaries_must_be_released_in_order() {
    let mut int = RegisterSpace::new(RegType::Int, RESERVED_REGISTER_COUNT);
    let first = int.acquire_tmp_register();
    let second = int.acquire_tmp_register();
    assert_eq!(
        int.release_tmp_register(first),
        Err(BytecodeError::ReleaseOutOfOrder {
            bank: RegType::Int,
            expected: second,
            found: first
        })
    );
    int.release_tmp_register(second).unwrap();
    int.release_tmp_register(first).unwrap();
    assert!(int.release_tmp_register(first).is_err());
}

#[test]
fn failed_function_leaves_nothing_behind() {
    let mut w = ByteCodeWriter::new();
    w.begin();
    let dangling = w.define_label();
    w.br(dangling).unwrap();
    assert_eq!(w.end(), Err(BytecodeError::UnmarkedLabel(dangling)));

    w.reset();
    assert!(!w.is_active());
    assert_eq!(w.instruction_count(), 0);
    assert!(w.emit(Instr::Ret).is_err());
}
