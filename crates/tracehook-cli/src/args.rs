//! Command-line grammar.
//!
//! Flags come first; the first token that is not a recognized flag (or the
//! name following `-m`) ends flag parsing and everything after it is handed
//! to the target untouched. `+X`/`-X` toggles cannot be expressed with a
//! derive-style parser, so this one is written by hand.

use std::collections::VecDeque;
use std::path::PathBuf;

use thiserror::Error;
use tracehook_core::tracer::DEFAULT_PREFIX;
use tracehook_core::TracePolicy;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Script(PathBuf),
    Module(String),
}

/// A fully parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub depth: u32,
    pub prefix: String,
    /// Extra directories whose modules are never instrumented
    pub ignore_paths: Vec<PathBuf>,
    pub policy: TracePolicy,
    pub target: Target,
    /// Arguments following the target
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    Run(CliOptions),
}

/// Bad command line; reported as `error: <message>`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error: {message}")]
pub struct UsageError {
    pub message: String,
    pub status: i32,
}

impl UsageError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: 1,
        }
    }
}

pub fn usage(prog: &str) -> String {
    format!(
        "usage: {prog} [-h] [-d DEPTH] [-p PREFIX] [-P MODULEPATH]* [+/-M] [+/-C] [+/-I] (-m MODULENAME | SCRIPTFILE) SCRIPTARGS...\n\
         \n\
         +/-M  Trace module-global statements. Wraps entire module in a function and calls it.  [Default: off]\n\
         +/-C  Trace class methods.  [Default: on]\n\
         +/-I  Trace inner (nested) functions.  [Default: on]\n\
         \n\
         -d DEPTH   Maximum call depth.  [Default: 1]\n\
         -p PREFIX  Trace output line prefix.  [Default: '{DEFAULT_PREFIX}']\n\
         -P MODULEPATH Add a directory whose modules are never instrumented. The runtime's\n\
         \x20          own module directories are always ignored.\n"
    )
}

fn value_of(args: &mut VecDeque<String>, flag: &str) -> Result<String, UsageError> {
    args.pop_front();
    args.pop_front()
        .ok_or_else(|| UsageError::new(format!("{flag} requires an argument")))
}

/// Parse the arguments following the program name
pub fn parse_args<I>(args: I) -> Result<Invocation, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut args: VecDeque<String> = args.into_iter().collect();
    let mut depth = 1;
    let mut prefix = DEFAULT_PREFIX.to_string();
    let mut ignore_paths = Vec::new();
    let mut policy = TracePolicy::default();
    let mut module = None;

    while let Some(arg) = args.front() {
        match arg.as_str() {
            "-h" => return Ok(Invocation::Help),
            "-d" => {
                let value = value_of(&mut args, "-d")?;
                let parsed: i64 = value
                    .parse()
                    .map_err(|_| UsageError::new("-d argument must be an integer"))?;
                if parsed < 1 {
                    return Err(UsageError::new("-d argument must be at least 1"));
                }
                depth = u32::try_from(parsed).unwrap_or(u32::MAX);
            }
            "-p" => prefix = value_of(&mut args, "-p")?,
            "-P" => ignore_paths.push(PathBuf::from(value_of(&mut args, "-P")?)),
            "+M" | "-M" => {
                policy.trace_modules = arg.starts_with('+');
                args.pop_front();
            }
            "+C" | "-C" => {
                policy.trace_methods = arg.starts_with('+');
                args.pop_front();
            }
            "+I" | "-I" => {
                policy.trace_nested = arg.starts_with('+');
                args.pop_front();
            }
            "-m" => {
                args.pop_front();
                let name = args.pop_front().ok_or(UsageError {
                    message: "-m must be followed by a module name".to_string(),
                    status: 2,
                })?;
                module = Some(name);
                break;
            }
            _ => break,
        }
    }

    let target = match module {
        Some(name) => Target::Module(name),
        None => match args.pop_front() {
            Some(path) => Target::Script(PathBuf::from(path)),
            None => return Err(UsageError::new("must specify either scriptfile or module (-m)")),
        },
    };

    Ok(Invocation::Run(CliOptions {
        depth,
        prefix,
        ignore_paths,
        policy,
        target,
        args: args.into_iter().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> Result<Invocation, UsageError> {
        parse_args(line.split_whitespace().map(str::to_string))
    }

    fn run(line: &str) -> CliOptions {
        match parse(line) {
            Ok(Invocation::Run(options)) => options,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let options = run("script.py");
        assert_eq!(options.depth, 1);
        assert_eq!(options.prefix, "DBG:");
        assert_eq!(options.policy, TracePolicy::default());
        assert_eq!(options.target, Target::Script("script.py".into()));
        assert!(options.args.is_empty());
    }

    #[test]
    fn test_flags_then_target_args() {
        let options = run("-d 3 -p >> +M -C -I -P /vendor -P /lib main.py -d 9 +M");
        assert_eq!(options.depth, 3);
        assert_eq!(options.prefix, ">>");
        assert!(options.policy.trace_modules);
        assert!(!options.policy.trace_methods);
        assert!(!options.policy.trace_nested);
        assert_eq!(options.ignore_paths, [PathBuf::from("/vendor"), PathBuf::from("/lib")]);
        assert_eq!(options.args, ["-d", "9", "+M"]);
    }

    #[test]
    fn test_module_target_stops_parsing() {
        let options = run("-m pkg.tool -h --verbose");
        assert_eq!(options.target, Target::Module("pkg.tool".into()));
        assert_eq!(options.args, ["-h", "--verbose"]);
    }

    #[test]
    fn test_help() {
        assert_eq!(parse("-d 2 -h script.py"), Ok(Invocation::Help));
        assert!(usage("tracehook").starts_with("usage: tracehook [-h]"));
    }

    #[test]
    fn test_errors() {
        let err = parse("-d").unwrap_err();
        assert_eq!(err.to_string(), "error: -d requires an argument");
        assert_eq!(err.status, 1);

        assert_eq!(parse("-d many x.py").unwrap_err().message, "-d argument must be an integer");
        assert_eq!(parse("-d 0 x.py").unwrap_err().message, "-d argument must be at least 1");
        assert_eq!(parse("-p").unwrap_err().message, "-p requires an argument");
        assert_eq!(
            parse("+C").unwrap_err().message,
            "must specify either scriptfile or module (-m)"
        );

        let err = parse("-m").unwrap_err();
        assert_eq!(err.message, "-m must be followed by a module name");
        assert_eq!(err.status, 2);
    }
}
