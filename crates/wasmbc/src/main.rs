use anyhow::{Context, Result};
use clap::Parser;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use wasmbc::{compile, validate, CompileOptions, WasmModule};

/// wasmbc: compile WebAssembly to register-based bytecode.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Output listing file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Only read the module and build function headers
    #[arg(long)]
    deferred: bool,

    /// Keep going when a function fails to compile
    #[arg(long)]
    skip_invalid: bool,

    /// Do not generate bytecode for this function index (repeatable)
    #[arg(long = "disable", value_name = "INDEX")]
    disabled: Vec<u32>,

    /// Only report whether the module compiles
    #[arg(long)]
    validate: bool,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn listing(module: &WasmModule) -> Result<String> {
    let mut out = String::new();
    let layout = module.layout();
    writeln!(
        out,
        "; environment: {} slots (functions at {}, tables at {}, globals at {})",
        module.module_environment_size(),
        layout.func_offset,
        layout.table_offset,
        layout.global_offset
    )?;
    for function in module.functions() {
        match function.body() {
            Some(body) => writeln!(out, "{body}")?,
            None => writeln!(out, "; function {} has no header", function.number())?,
        }
    }
    Ok(out)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let wasm_bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    if cli.validate {
        let valid = validate(&wasm_bytes);
        println!("{}: {}", cli.input.display(), if valid { "valid" } else { "invalid" });
        if !valid {
            std::process::exit(1);
        }
        return Ok(());
    }

    let options = CompileOptions {
        deferred: cli.deferred,
        skip_invalid_functions: cli.skip_invalid,
        disabled_functions: cli.disabled.iter().copied().collect(),
    };

    eprintln!("wasmbc: compiling {}", cli.input.display());
    let module = compile(&wasm_bytes, &options).context("compilation failed")?;
    let text = listing(&module)?;

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &text)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        eprintln!("wasmbc: wrote {}", output_path.display());
    } else {
        print!("{text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["wasmbc", "input.wasm"]);
        assert_eq!(cli.input, PathBuf::from("input.wasm"));
        assert!(cli.output.is_none());
        assert!(!cli.deferred && !cli.skip_invalid && !cli.validate);
        assert!(cli.disabled.is_empty());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn cli_collects_repeated_flags() {
        let cli = Cli::parse_from([
            "wasmbc", "in.wasm", "--disable", "3", "--disable", "5", "-vv", "--skip-invalid",
        ]);
        assert_eq!(cli.disabled, vec![3, 5]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.skip_invalid);
    }

    #[test]
    fn listing_names_every_function() {
        let wasm = wat::parse_str(r#"(module (func (export "f")) (func))"#).unwrap();
        let module = compile(&wasm, &CompileOptions::default()).unwrap();
        let text = listing(&module).unwrap();
        assert!(text.contains("f[0]"));
        assert!(text.contains("wasm-function[1]"));
    }
}
