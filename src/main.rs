// Copyright (c) 2016-2020 Fabian Schuiki

//! The command-line front-end. Parses the flags into a [`fpp::Config`] and
//! hands off to the library; all preprocessing semantics live there.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fpp::{Config, Severity};

#[derive(Parser)]
#[command(name = "fpp", version, about = "Preprocess a source file")]
struct Args {
    /// The file to preprocess.
    input: PathBuf,
    /// Define a macro, as NAME or NAME=VALUE.
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    define: Vec<String>,
    /// Undefine a macro after the -D definitions are applied.
    #[arg(short = 'U', value_name = "NAME")]
    undef: Vec<String>,
    /// Add a directory to the include search path.
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,
    /// Write output to a file instead of standard output.
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,
    /// Emit source lines verbatim; only directives are processed.
    #[arg(long)]
    no_expand: bool,
    /// Strip comments from emitted source lines.
    #[arg(long)]
    strip_comments: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config {
        include_dirs: args.include,
        expand_macros: !args.no_expand,
        exclude_comments: args.strip_comments,
        ..Config::default()
    };
    for spec in &args.define {
        config.define(spec);
    }
    for name in &args.undef {
        config.undefine(name);
    }

    let result = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => {
                let mut out = BufWriter::new(file);
                fpp::preprocess(&args.input, &mut out, config).and_then(|diags| {
                    out.flush()?;
                    Ok(diags)
                })
            }
            Err(error) => {
                eprintln!("fpp: cannot create '{}': {}", path.display(), error);
                return ExitCode::FAILURE;
            }
        },
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            fpp::preprocess(&args.input, &mut out, config)
        }
    };

    match result {
        Ok(diags) => {
            let mut failed = false;
            for diag in &diags {
                eprintln!("{}", diag);
                failed |= diag.severity == Severity::Error;
            }
            if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(error) => {
            eprintln!("fpp: {}", error);
            ExitCode::FAILURE
        }
    }
}
