use std::fs;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, Command};
use tracehook_core::{init_tracing, Interpreter, InterpreterConfig, TraceConfigUpdate, TraceSession};
use tracehook_repl::Repl;

/// Cells recurse on the interpreter's native stack
const INTERPRETER_STACK_SIZE: usize = 256 * 1024 * 1024;

fn main() -> Result<()> {
    // Initialize logging
    init_tracing();

    let matches = Command::new("tracehook-repl")
        .version(tracehook_core::VERSION)
        .about("Interactive shell that traces cells as they run")
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("Feed the lines of FILE to the REPL instead of reading the terminal")
                .index(1),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Never colorize trace output")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("autotrace")
                .long("autotrace")
                .help("Start with autotrace on")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let input_file = matches.get_one::<String>("file").cloned();
    let color = !matches.get_flag("no-color") && io::stderr().is_terminal();
    let autotrace = matches.get_flag("autotrace");

    let worker = thread::Builder::new()
        .name("tracehook-repl".to_string())
        .stack_size(INTERPRETER_STACK_SIZE)
        .spawn(move || -> Result<()> {
            let mut interp = Interpreter::new(InterpreterConfig::from_env());
            interp.prepend_sys_path(Path::new(""));
            let mut session = TraceSession::new(interp);
            session.configure(TraceConfigUpdate {
                color: Some(color),
                ..Default::default()
            })?;
            session.autotrace(Some(autotrace));
            run_repl(&mut Repl::new(session), input_file)
        })
        .context("failed to start interpreter thread")?;

    worker.join().map_err(|_| anyhow!("interpreter thread panicked"))?
}

fn run_repl(repl: &mut Repl, input_file: Option<String>) -> Result<()> {
    use rustyline::{error::ReadlineError, DefaultEditor};

    let file_lines: Option<Vec<String>> = match input_file {
        Some(filename) => {
            let content = fs::read_to_string(&filename).with_context(|| format!("failed to read {filename}"))?;
            Some(content.lines().map(str::to_string).collect())
        }
        None => None,
    };

    let is_interactive = file_lines.is_none() && io::stdin().is_terminal();
    if is_interactive {
        println!("Tracehook REPL v{}", tracehook_core::VERSION);
        println!("Type .help for help, .quit to exit");
        println!();
    }

    let mut rl = DefaultEditor::new()?;
    let mut file_line_iter = file_lines.as_ref().map(|lines| lines.iter());

    while repl.is_running() {
        let prompt = repl.prompt();

        // Get the next line from either file or interactive input
        let line_result = match file_line_iter.as_mut() {
            Some(iter) => match iter.next() {
                Some(line) => Ok(line.clone()),
                None => break,
            },
            None => rl.readline(prompt),
        };

        match line_result {
            Ok(line) => {
                if !is_interactive {
                    println!("{prompt}{line}");
                } else if !line.trim().is_empty() {
                    rl.add_history_entry(&line)?;
                }
                repl.process_line(&line);
            }
            Err(ReadlineError::Interrupted) => {
                if repl.is_collecting() {
                    println!("^C");
                    repl.cancel();
                } else {
                    println!("Use .quit to exit");
                }
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    // run a cell left open at end of input
    if repl.is_collecting() {
        repl.process_line("");
    }

    Ok(())
}
