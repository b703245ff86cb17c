use std::fs::File;
use std::io::{stderr, Read, Write};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use thslc_core::{CompileOptions, Compiler, Stage};

#[derive(Parser, Debug)]
#[command(author, version, about = "THSL to SPIR-V compiler", long_about = None)]
struct Args {
    #[arg(help = "Input THSL shader file path.")]
    input: String,

    #[arg(
        short,
        long,
        help = "Output file path. Defaults to {input}.spv, or {input}.pp with --pp."
    )]
    out: Option<String>,

    #[arg(long, help = "Compile a vertex shader.")]
    vertex: bool,

    #[arg(long, help = "Compile a fragment shader.")]
    fragment: bool,

    #[arg(long = "noW", help = "Suppress warnings.")]
    no_warnings: bool,

    #[arg(long = "soE", help = "Stop on error: any warning fails the compile.")]
    stop_on_error: bool,

    #[arg(long = "eD", help = "Enable debug messages.")]
    debug_messages: bool,

    #[arg(long = "eDI", help = "Emit debug info (OpName) into the module.")]
    debug_info: bool,

    #[arg(long = "pp", help = "Run the preprocessor only and emit the expanded source.")]
    preprocess_only: bool,

    #[arg(long = "deffp64", help = "Unsuffixed floats default to 64-bit.")]
    fp64: bool,

    #[arg(long = "moIMP", help = "Disable implicit conversions.")]
    no_implicit_conversions: bool,

    #[arg(
        short = 'D',
        value_name = "NAME[,NAME...]",
        help = "Predefine macros, comma separated."
    )]
    defines: Vec<String>,

    #[arg(
        short = 'I',
        value_name = "DIR[,DIR...]",
        help = "Include search directories, comma separated."
    )]
    includes: Vec<String>,
}

fn main() {
    let args = Args::parse();

    let level = if args.debug_messages {
        log::LevelFilter::Debug
    } else if args.no_warnings {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    if args.vertex == args.fragment {
        writeln!(stderr(), "error: exactly one of --vertex or --fragment must be given").unwrap();
        exit(1);
    }

    let opts = CompileOptions {
        stage: if args.vertex {
            Stage::Vertex
        } else {
            Stage::Fragment
        },
        include_dirs: args
            .includes
            .iter()
            .flat_map(|list| list.split(','))
            .map(PathBuf::from)
            .collect(),
        defines: args
            .defines
            .iter()
            .flat_map(|list| list.split(','))
            .map(|name| (name.to_owned(), String::new()))
            .collect(),
        warnings: !args.no_warnings,
        stop_on_error: args.stop_on_error,
        debug_info: args.debug_info,
        fp64_default: args.fp64,
        implicit_conversions: !args.no_implicit_conversions,
    };

    let mut source = String::new();
    File::open(&args.input)
        .and_then(|mut f| f.read_to_string(&mut source))
        .unwrap_or_else(|e| {
            writeln!(stderr(), "error: failed to read input file: {}", e).unwrap();
            exit(1);
        });

    if args.preprocess_only {
        let expanded = Compiler::preprocess(&source, &args.input, &opts).unwrap_or_else(|e| {
            writeln!(stderr(), "error: {}", e).unwrap();
            exit(1);
        });
        let out_path = format!("{}.pp", args.out.as_ref().unwrap_or(&args.input));
        write_output(&out_path, expanded.as_bytes());
        return;
    }

    let output = Compiler::compile(&source, &args.input, &opts).unwrap_or_else(|e| {
        writeln!(stderr(), "error: {}", e).unwrap();
        exit(1);
    });

    if opts.stop_on_error && output.warnings > 0 {
        writeln!(
            stderr(),
            "error: {} warning(s) treated as errors, no output written",
            output.warnings
        )
        .unwrap();
        exit(1);
    }

    let out_path = args
        .out
        .clone()
        .unwrap_or_else(|| format!("{}.spv", args.input));
    write_output(&out_path, &output.spv.into_bytes());
}

fn write_output(path: &str, bytes: &[u8]) {
    File::create(path)
        .and_then(|mut f| f.write_all(bytes))
        .unwrap_or_else(|e| {
            writeln!(stderr(), "error: failed to write output file \"{}\": {}", path, e).unwrap();
            exit(1);
        });
}
