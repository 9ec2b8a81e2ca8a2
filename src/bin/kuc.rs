//! kuc driver.
//!
//! Reads the JSON AST produced by the ku frontend, lowers it and writes the
//! NASM translation unit. Assembling and linking are left to `nasm -felf32`
//! and `ld -m elf_i386`.

use clap::Parser;
use kuc::ast::Program;
use kuc::codegen::{compile_with_options, CompileOptions};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kuc", about = "ku code generator (32-bit x86 NASM)", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// AST of the program, as emitted by the frontend
    ast: PathBuf,

    /// Write the assembly here instead of next to the input
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print the parsed AST
    #[arg(long = "ast")]
    ast_dump: bool,

    /// Print the generated assembly
    #[arg(long)]
    asm: bool,

    /// Print compilation statistics
    #[arg(long)]
    stats: bool,

    /// Leave `;` comments out of the output
    #[arg(long)]
    no_comments: bool,

    /// Entry point symbol
    #[arg(long, default_value = "_start")]
    entry: String,

    /// More logging (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let source = fs::read_to_string(&cli.ast)?;
    let program: Program = serde_json::from_str(&source)?;
    if cli.ast_dump {
        println!("{program:#?}");
    }

    let options = CompileOptions {
        emit_comments: !cli.no_comments,
        entry: cli.entry,
    };
    let assembly = match compile_with_options(&program, options) {
        Ok(assembly) => assembly,
        Err(e) => {
            eprintln!("{}: error: {}", cli.ast.display(), e);
            std::process::exit(1);
        }
    };

    if cli.asm {
        print!("{}", assembly.text);
    }
    let output = cli.output.unwrap_or_else(|| cli.ast.with_extension("asm"));
    fs::write(&output, &assembly.text)?;
    log::info!("wrote {}", output.display());

    if cli.stats {
        eprintln!("{}", assembly.stats);
    }
    Ok(())
}
