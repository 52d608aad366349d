//! Module-level properties: section ordering, environment layout,
//! signatures and segments.

use anyhow::{Context, Result};
use wasmbc::module::{ExportKind, InitExpr};
use wasmbc::{compile, validate, CompileError, CompileOptions, WasmModule};

const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

fn compile_wat(wat_source: &str) -> Result<WasmModule> {
    let wasm_bytes = wat::parse_str(wat_source).context("failed to parse WAT")?;
    compile(&wasm_bytes, &CompileOptions::default())
}

fn root(err: &anyhow::Error) -> &CompileError {
    err.downcast_ref::<CompileError>()
        .expect("error should come from the compiler")
        .root()
}

#[test]
fn test_element_segment_past_table_end() {
    let err = compile_wat(
        r#"
        (module
            (table 4 funcref)
            (func $f)
            (elem (i32.const 2) $f $f $f))
        "#,
    )
    .err()
    .expect("segment does not fit");
    assert!(matches!(
        root(&err),
        CompileError::ElementOutOfBounds {
            segment: 0,
            index: 4,
            table_size: 4
        }
    ));
}

#[test]
fn test_element_segment_based_on_constant_global() -> Result<()> {
    let module = compile_wat(
        r#"
        (module
            (global $base i32 (i32.const 1))
            (table 3 funcref)
            (func $f)
            (func $g)
            (elem (global.get $base) $g $f))
        "#,
    )?;
    assert_eq!(module.table_value(0)?, None);
    assert_eq!(module.table_value(1)?, Some(1));
    assert_eq!(module.table_value(2)?, Some(0));
    assert!(module.table_value(3).is_err());
    Ok(())
}

#[test]
fn test_missing_code_section() {
    let mut bytes = HEADER.to_vec();
    bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]); // type: () -> ()
    bytes.extend([0x03, 0x02, 0x01, 0x00]); // function: one of type 0

    let err = compile(&bytes, &CompileOptions::default()).err().expect("no code section");
    assert!(matches!(root(&err), CompileError::MissingSection("code")));
    assert!(!validate(&bytes));
}

#[test]
fn test_missing_precedent() {
    let mut bytes = HEADER.to_vec();
    bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
    bytes.extend([0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b]); // code without function section

    let err = compile(&bytes, &CompileOptions::default()).err().expect("no function section");
    assert_eq!(
        root(&err).to_string(),
        "function section missing before code"
    );
}

#[test]
fn test_body_count_mismatch() {
    let mut bytes = HEADER.to_vec();
    bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
    bytes.extend([0x03, 0x03, 0x02, 0x00, 0x00]); // two functions
    bytes.extend([0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b]); // one body

    let err = compile(&bytes, &CompileOptions::default()).err().expect("body count");
    let compile_err = err.downcast_ref::<CompileError>().expect("compile error");
    assert!(matches!(compile_err, CompileError::Section { section: "code", .. }));
}

#[test]
fn test_environment_offsets_are_monotonic() -> Result<()> {
    let sources = [
        "(module)",
        "(module (func))",
        r#"(module (import "env" "f" (func)) (func))"#,
        r#"
        (module
            (import "env" "f" (func (param i32)))
            (import "env" "g" (func))
            (table 2 funcref)
            (memory 1)
            (global (mut f32) (f32.const 0))
            (global i32 (i32.const 3))
            (func (param i32))
            (func (result i32) i32.const 0))
        "#,
    ];
    for source in sources {
        let module = compile_wat(source)?;
        let layout = module.layout();
        assert!(layout.memory_offset < layout.import_func_offset, "{source}");
        assert!(layout.import_func_offset <= layout.func_offset, "{source}");
        assert!(layout.func_offset <= layout.table_offset, "{source}");
        assert!(layout.table_offset <= layout.global_offset, "{source}");
        if module.import_count() == 0 {
            assert_eq!(layout.import_func_offset, layout.func_offset, "{source}");
        }
        assert_eq!(
            layout.table_offset - layout.func_offset,
            module.function_count(),
            "{source}"
        );
    }
    Ok(())
}

#[test]
fn test_signature_equivalence_is_an_equivalence() -> Result<()> {
    let module = compile_wat(
        r#"
        (module
            (type (func (param i32)))
            (type (func (param f64) (result i32)))
            (type (func (param i32)))
            (type (func))
            (type (func (param f64) (result i32)))
            (type (func (param i32))))
        "#,
    )?;
    let sigs = module.signatures();
    for a in sigs {
        assert!(a.is_equivalent(a));
        for b in sigs {
            assert_eq!(a.is_equivalent(b), b.is_equivalent(a));
            for c in sigs {
                if a.is_equivalent(b) && b.is_equivalent(c) {
                    assert!(a.is_equivalent(c));
                }
            }
        }
    }
    assert_eq!(module.equivalent_signature_id(2)?, 0);
    assert_eq!(module.equivalent_signature_id(5)?, 0);
    assert_eq!(module.equivalent_signature_id(4)?, 1);
    assert_eq!(module.equivalent_signature_id(3)?, 3);
    Ok(())
}

#[test]
fn test_exports_start_and_data() -> Result<()> {
    let module = compile_wat(
        r#"
        (module
            (memory (export "mem") 1)
            (global $base i32 (i32.const 64))
            (func $main (export "main"))
            (start $main)
            (data (i32.const 8) "abc")
            (data (global.get $base) "xyz"))
        "#,
    )?;
    assert_eq!(module.start_function(), Some(0));
    assert!(module
        .exports()
        .iter()
        .any(|e| e.name == "mem" && e.kind == ExportKind::Memory));
    assert_eq!(module.function_export_name(0), Some("main"));

    assert_eq!(module.data_segments().len(), 2);
    assert_eq!(module.data_segment(0)?.data(), b"abc");
    assert_eq!(module.data_segment_destination(0)?, 8);
    assert_eq!(
        module.data_segment(1)?.offset_expr(),
        &InitExpr::GetGlobal(0)
    );
    assert_eq!(module.data_segment_destination(1)?, 64);
    Ok(())
}

#[test]
fn test_environment_size() -> Result<()> {
    let module = compile_wat(
        r#"
        (module
            (import "env" "f" (func))
            (global f64 (f64.const 0))
            (global i32 (i32.const 0))
            (func))
        "#,
    )?;
    // memory + 1 import + 2 functions + 1 signature + 16 bytes of globals
    assert_eq!(module.module_environment_size(), 1 + 1 + 2 + 1 + 2);
    Ok(())
}

#[test]
fn test_malformed_binaries_are_rejected() {
    assert!(!validate(b""));
    assert!(!validate(&HEADER[..6]));
    let mut bad_version = HEADER.to_vec();
    bad_version[4] = 2;
    assert!(!validate(&bad_version));
    assert!(validate(&HEADER));
}
