use criterion::{criterion_group, criterion_main, Criterion};
use std::fmt::Write;
use std::hint::black_box;
use wasmbc::{compile, CompileOptions};

/// A module with `count` copies of an iterative fibonacci plus a memory
/// summing loop, so every part of the generator gets exercised.
fn synthetic_module(count: usize) -> Vec<u8> {
    let mut wat = String::from("(module (memory 1) (global $acc (mut i32) (i32.const 0))\n");
    for i in 0..count {
        write!(
            wat,
            r#"
            (func $fib{i} (export "fib{i}") (param $n i32) (result i32)
                (local $a i32) (local $b i32) (local $t i32)
                (local.set $b (i32.const 1))
                (block $done
                    (loop $next
                        (br_if $done (i32.eqz (local.get $n)))
                        (local.set $t (i32.add (local.get $a) (local.get $b)))
                        (local.set $a (local.get $b))
                        (local.set $b (local.get $t))
                        (local.set $n (i32.sub (local.get $n) (i32.const 1)))
                        (br $next)))
                (local.get $a))
            (func $sum{i} (param $len i32) (result f64) (local $i i32) (local $s f64)
                (block $done
                    (loop $next
                        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
                        (local.set $s (f64.add (local.get $s)
                            (f64.load offset=16 (i32.shl (local.get $i) (i32.const 3)))))
                        (global.set $acc (call $fib{i} (local.get $i)))
                        (local.set $i (i32.add (local.get $i) (i32.const 1)))
                        (br $next)))
                (local.get $s))
            "#
        )
        .unwrap();
    }
    wat.push(')');
    wat::parse_str(&wat).unwrap()
}

fn compile_small_bench(c: &mut Criterion) {
    let wasm = synthetic_module(4);
    let options = CompileOptions::default();
    c.bench_function("compile 8 functions", |b| {
        b.iter(|| compile(black_box(&wasm), &options).unwrap())
    });
}

fn compile_large_bench(c: &mut Criterion) {
    let wasm = synthetic_module(256);
    let options = CompileOptions::default();
    c.bench_function("compile 512 functions", |b| {
        b.iter(|| compile(black_box(&wasm), &options).unwrap())
    });
}

fn read_deferred_bench(c: &mut Criterion) {
    let wasm = synthetic_module(256);
    let options = CompileOptions {
        deferred: true,
        ..CompileOptions::default()
    };
    c.bench_function("read 512 functions deferred", |b| {
        b.iter(|| compile(black_box(&wasm), &options).unwrap())
    });
}

criterion_group!(
    benches,
    compile_small_bench,
    compile_large_bench,
    read_deferred_bench
);
criterion_main!(benches);
