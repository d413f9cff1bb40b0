//! the main compiler binary. takes an emission mode, a source file, and an
//! output path.
//!
//! run with `--help` for more info.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use minic::back::code_gen;
use minic::front::{lower, parse};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the emission mode: -koopa (IR text), -riscv, or -perf
    #[arg(allow_hyphen_values = true, value_parser = parse_mode)]
    mode: Mode,
    /// the input source file
    input: PathBuf,
    /// the output file
    #[arg(short = 'o')]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    /// emit the IR text only
    Koopa,
    /// emit RISC-V assembly
    Riscv,
    /// emit RISC-V assembly (performance-graded runs use the same path)
    Perf,
}

fn parse_mode(text: &str) -> Result<Mode, String> {
    match text {
        "-koopa" => Ok(Mode::Koopa),
        "-riscv" => Ok(Mode::Riscv),
        "-perf" => Ok(Mode::Perf),
        _ => Err(format!(
            "unknown mode '{text}', expected -koopa, -riscv or -perf"
        )),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let input = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let ast = parse(&input)?;
    let mut ir = lower(ast);

    // debug dump of the IR
    println!("{ir}");

    let output = match args.mode {
        Mode::Koopa => ir.to_string(),
        Mode::Riscv | Mode::Perf => {
            ir.gather_super();
            ir.alloc_preserve();
            code_gen(&ir).code()
        }
    };
    fs::write(&args.output, output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    Ok(())
}
