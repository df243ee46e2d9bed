use std::io::{self, IsTerminal};
use std::path::Path;
use std::process;
use std::thread;

use anyhow::{anyhow, Context, Result};
use tracehook_cli::{parse_args, run, usage, Invocation};
use tracehook_core::init_tracing;
use tracehook_core::runtime::io::{stderr_sink, stdout_sink};

/// Scripts recurse on the interpreter's native stack
const INTERPRETER_STACK_SIZE: usize = 256 * 1024 * 1024;

fn main() -> Result<()> {
    // Initialize logging
    init_tracing();

    let mut args = std::env::args();
    let prog = args
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tracehook".to_string());

    let options = match parse_args(args) {
        Ok(Invocation::Help) => {
            print!("{}", usage(&prog));
            return Ok(());
        }
        Ok(Invocation::Run(options)) => options,
        Err(err) => {
            eprintln!("{err}");
            process::exit(err.status);
        }
    };

    let color = io::stderr().is_terminal();
    let worker = thread::Builder::new()
        .name("tracehook-main".to_string())
        .stack_size(INTERPRETER_STACK_SIZE)
        .spawn(move || run(&options, stdout_sink(), stderr_sink(), color))
        .context("failed to start interpreter thread")?;

    match worker.join().map_err(|_| anyhow!("interpreter thread panicked"))? {
        Ok(status) => process::exit(status),
        Err(err) => {
            // tracer identity lost mid-run
            eprintln!("fatal: {err}");
            process::abort();
        }
    }
}
