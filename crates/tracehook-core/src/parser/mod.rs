// Parser module - pest grammar over an indentation preprocessor
use pest::Parser as _;
use pest_derive::Parser;
use tracing::trace;

use crate::ast::{Expr, Module, SourceUnit};
use crate::error::{ParseError, ParseErrorKind};

mod builder;
pub mod indent;


use builder::AstBuilder;

#[derive(Parser)]
#[grammar = "parser/grammar.pest"]
struct ScriptGrammar;

/// What a piece of source is parsed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A statement sequence
    Exec,
    /// A single expression
    Eval,
}

/// Parse `source` in the given mode
pub fn parse(source: &str, filename: &str, mode: Mode) -> Result<SourceUnit, ParseError> {
    let processed = indent::preprocess(source, filename)?;
    let builder = AstBuilder::new(filename);
    let unit = match mode {
        Mode::Exec => {
            let pairs = ScriptGrammar::parse(Rule::file_input, &processed)
                .map_err(|e| convert_error(e, &processed, source, filename))?;
            SourceUnit::Module(builder.build_module(pairs)?)
        }
        Mode::Eval => {
            let pairs = ScriptGrammar::parse(Rule::eval_input, &processed)
                .map_err(|e| convert_error(e, &processed, source, filename))?;
            SourceUnit::Expression(builder.build_eval(pairs)?)
        }
    };
    trace!(filename, ?mode, "parsed source unit");
    Ok(unit)
}

/// Parse a statement sequence
pub fn parse_module(source: &str, filename: &str) -> Result<Module, ParseError> {
    match parse(source, filename, Mode::Exec)? {
        SourceUnit::Module(module) => Ok(module),
        SourceUnit::Expression(_) => Err(ParseError::syntax("expected statements", filename, 1, 0)),
    }
    .map_err(|e| e.with_source_line(source))
}

/// Parse a single expression
pub fn parse_expression(source: &str, filename: &str) -> Result<Expr, ParseError> {
    match parse(source, filename, Mode::Eval)? {
        SourceUnit::Expression(expr) => Ok(expr),
        SourceUnit::Module(_) => Err(ParseError::syntax("expected an expression", filename, 1, 0)),
    }
    .map_err(|e| e.with_source_line(source))
}

fn convert_error(
    error: pest::error::Error<Rule>,
    processed: &str,
    source: &str,
    filename: &str,
) -> ParseError {
    let (line, col) = match error.line_col {
        pest::error::LineColLocation::Pos(pos) => pos,
        pest::error::LineColLocation::Span(start, _) => start,
    };
    let offset = match error.location {
        pest::error::InputLocation::Pos(pos) => pos,
        pest::error::InputLocation::Span((start, _)) => start,
    };
    let at = processed[offset.min(processed.len())..].chars().next();
    let (kind, message) = match at {
        Some(indent::INDENT) => (ParseErrorKind::Indentation, "unexpected indent"),
        Some(indent::DEDENT) => (ParseErrorKind::Indentation, "expected an indented block"),
        _ if expects_block(&processed[..offset.min(processed.len())]) => {
            (ParseErrorKind::Indentation, "expected an indented block")
        }
        None => (ParseErrorKind::Syntax, "unexpected EOF while parsing"),
        _ => (ParseErrorKind::Syntax, "invalid syntax"),
    };
    ParseError::new(kind, message, filename, line as u32, col.saturating_sub(1) as u32, None)
        .with_source_line(source)
}

/// True when the text before an error ends with a block header and its line end
fn expects_block(before: &str) -> bool {
    let trimmed = before.trim_end_matches([' ', '\t', '\r', '\n']);
    match trimmed.strip_suffix(indent::NL) {
        Some(rest) => {
            let line = rest.rsplit('\n').next().unwrap_or(rest);
            let code = line.split('#').next().unwrap_or(line);
            code.trim_end().ends_with(':')
        }
        None => false,
    }
}
