//! REPL command parsing and definitions
//!
//! Handles parsing of dot-commands (.help, .quit, .trace, ...). The options
//! of `.traceconfig` are parsed with clap.

use anyhow::{anyhow, Result};
use clap::Parser;
use tracehook_core::TraceConfigUpdate;

/// Available REPL commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Show help information
    Help,
    /// Exit the REPL
    Quit,
    /// Run code traced; `None` starts a trace block
    Trace(Option<String>),
    /// Trace the evaluation of an expression
    Etrace(String),
    /// Show or change the tracer settings
    TraceConfig(TraceConfigArgs),
    /// Switch automatic tracing, or report it with `None`
    Autotrace(Option<bool>),
}

/// Options of `.traceconfig`
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(
    name = ".traceconfig",
    about = "Show or change how traced cells are reported",
    disable_version_flag = true
)]
pub struct TraceConfigArgs {
    /// Print the settings after applying any changes
    #[arg(long)]
    pub show: bool,

    /// Colorize trace output
    #[arg(short = 'c', value_name = "on|off", value_parser = parse_switch)]
    pub color: Option<bool>,

    /// Prefix of every trace line
    #[arg(short = 'p', value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Remove all variable watches (before adding new ones)
    #[arg(short = 'W')]
    pub clear_watches: bool,

    /// Watch a variable or expression
    #[arg(short = 'w', value_name = "NAME")]
    pub watch: Vec<String>,

    /// Call depth traced below a cell
    #[arg(short = 'd', value_name = "N", allow_negative_numbers = true)]
    pub depth: Option<i64>,
}

impl TraceConfigArgs {
    /// Whether any setting is changed
    pub fn has_changes(&self) -> bool {
        self.color.is_some()
            || self.prefix.is_some()
            || self.clear_watches
            || !self.watch.is_empty()
            || self.depth.is_some()
    }
}

impl From<TraceConfigArgs> for TraceConfigUpdate {
    fn from(args: TraceConfigArgs) -> Self {
        TraceConfigUpdate {
            depth: args.depth,
            clear_watches: args.clear_watches,
            watch: args.watch,
            prefix: args.prefix,
            color: args.color,
        }
    }
}

/// `on`/`off` (or `true`/`false`), any case
fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        _ => Err(format!("expected 'on' or 'off', got '{value}'")),
    }
}

/// Split an argument string on whitespace, keeping quoted runs together
fn split_args(input: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    let mut pending = false;
    for ch in input.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                pending = true;
            }
            None if ch.is_whitespace() => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            None => {
                current.push(ch);
                pending = true;
            }
        }
    }
    if quote.is_some() {
        return Err(anyhow!("Unterminated quote"));
    }
    if pending {
        args.push(current);
    }
    Ok(args)
}

/// Parse a command string into a ReplCommand
pub fn parse_command(input: &str) -> Result<ReplCommand> {
    let trimmed = input.trim();

    let Some(body) = trimmed.strip_prefix('.') else {
        return Err(anyhow!("Commands must start with '.'"));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    match name {
        "" => Err(anyhow!("Empty command")),
        "help" | "h" => Ok(ReplCommand::Help),
        "quit" | "q" | "exit" => Ok(ReplCommand::Quit),
        "trace" => Ok(ReplCommand::Trace((!rest.is_empty()).then(|| rest.to_string()))),
        "etrace" => {
            if rest.is_empty() {
                return Err(anyhow!("Usage: .etrace <expression>"));
            }
            Ok(ReplCommand::Etrace(rest.to_string()))
        }
        "traceconfig" => {
            let argv = std::iter::once(".traceconfig".to_string()).chain(split_args(rest)?);
            let args = TraceConfigArgs::try_parse_from(argv).map_err(|e| anyhow!("{}", e.to_string().trim_end()))?;
            Ok(ReplCommand::TraceConfig(args))
        }
        "autotrace" if rest.is_empty() => Ok(ReplCommand::Autotrace(None)),
        "autotrace" => parse_switch(rest)
            .map(|on| ReplCommand::Autotrace(Some(on)))
            .map_err(|_| anyhow!("Usage: .autotrace [on|off]")),
        _ => Err(anyhow!("Unknown command: .{name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(input: &str) -> TraceConfigArgs {
        match parse_command(input).unwrap() {
            ReplCommand::TraceConfig(args) => args,
            other => panic!("Expected TraceConfig command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_help_and_quit() {
        assert_eq!(parse_command(".help").unwrap(), ReplCommand::Help);
        assert_eq!(parse_command(".h").unwrap(), ReplCommand::Help);
        assert_eq!(parse_command(".quit").unwrap(), ReplCommand::Quit);
        assert_eq!(parse_command(".exit").unwrap(), ReplCommand::Quit);
    }

    #[test]
    fn test_parse_trace() {
        assert_eq!(parse_command(".trace").unwrap(), ReplCommand::Trace(None));
        assert_eq!(
            parse_command(".trace   f(1, 2)  ").unwrap(),
            ReplCommand::Trace(Some("f(1, 2)".to_string()))
        );
        assert_eq!(
            parse_command(".etrace x * (y + 1)").unwrap(),
            ReplCommand::Etrace("x * (y + 1)".to_string())
        );
        assert!(parse_command(".etrace").is_err());
    }

    #[test]
    fn test_parse_traceconfig() {
        assert_eq!(config(".traceconfig"), TraceConfigArgs::default());

        let args = config(".traceconfig -d 3 -c off -p '> ' -W -w total -w count --show");
        assert_eq!(args.depth, Some(3));
        assert_eq!(args.color, Some(false));
        assert_eq!(args.prefix.as_deref(), Some("> "));
        assert!(args.clear_watches && args.show);
        assert_eq!(args.watch, ["total", "count"]);

        // range is checked when applied
        assert_eq!(config(".traceconfig -d -2").depth, Some(-2));

        let update = TraceConfigUpdate::from(args);
        assert!(update.clear_watches);
        assert_eq!(update.watch, ["total", "count"]);

        assert_eq!(config(".traceconfig -c On").color, Some(true));
        assert_eq!(config(".traceconfig -c ' false '").color, Some(false));
        assert!(parse_command(".traceconfig -c maybe").is_err());
        assert!(parse_command(".traceconfig -d many").is_err());
        assert!(parse_command(".traceconfig -p 'open").is_err());
    }

    #[test]
    fn test_parse_autotrace() {
        assert_eq!(parse_command(".autotrace").unwrap(), ReplCommand::Autotrace(None));
        assert_eq!(parse_command(".autotrace on").unwrap(), ReplCommand::Autotrace(Some(true)));
        assert_eq!(parse_command(".autotrace off").unwrap(), ReplCommand::Autotrace(Some(false)));
        assert_eq!(parse_command(".autotrace ON").unwrap(), ReplCommand::Autotrace(Some(true)));
        assert_eq!(parse_command(".autotrace False").unwrap(), ReplCommand::Autotrace(Some(false)));
        assert!(parse_command(".autotrace sometimes").is_err());
    }

    #[test]
    fn test_parse_invalid_command() {
        assert!(parse_command(".invalid").is_err());
        assert!(parse_command("help").is_err()); // Missing dot
        assert!(parse_command(".").is_err());
    }
}
