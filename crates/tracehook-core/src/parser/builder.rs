// Pest pairs to AST conversion

use pest::iterators::{Pair, Pairs};

use super::{parse_expression, Rule};
use crate::ast::visit::{walk_expr_mut, VisitorMut};
use crate::ast::*;
use crate::error::ParseError;

type BuildResult<T> = Result<T, ParseError>;

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_and
            | Rule::kw_as
            | Rule::kw_assert
            | Rule::kw_break
            | Rule::kw_class
            | Rule::kw_continue
            | Rule::kw_def
            | Rule::kw_del
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_except
            | Rule::kw_finally
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_global
            | Rule::kw_if
            | Rule::kw_import
            | Rule::kw_in
            | Rule::kw_is
            | Rule::kw_lambda
            | Rule::kw_nonlocal
            | Rule::kw_not
            | Rule::kw_or
            | Rule::kw_pass
            | Rule::kw_raise
            | Rule::kw_return
            | Rule::kw_try
            | Rule::kw_while
    )
}

/// Inner pairs without keyword tokens
fn children(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

/// Length of `text` without trailing whitespace and a trailing comment
fn trimmed_len(text: &str) -> usize {
    let mut text = text.trim_end();
    loop {
        let line_start = text.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let mut quote = None;
        let mut comment = None;
        for (i, c) in text[line_start..].char_indices() {
            match (quote, c) {
                (None, '\'' | '"') => quote = Some(c),
                (Some(q), c) if c == q => quote = None,
                (None, '#') => {
                    comment = Some(line_start + i);
                    break;
                }
                _ => {}
            }
        }
        // a closing quote after '#' means the line ends inside a multi-line literal
        match comment.filter(|&at| !text[at..].ends_with(['\'', '"'])) {
            Some(at) => text = text[..at].trim_end(),
            None => return text.len(),
        }
    }
}

fn loc(pair: &Pair<'_, Rule>) -> Location {
    let span = pair.as_span();
    let (line, col) = span.start_pos().line_col();
    let end = span.start() + trimmed_len(span.as_str());
    let (end_line, end_col) = pest::Position::new(span.get_input(), end)
        .unwrap_or_else(|| span.end_pos())
        .line_col();
    Location::new(
        line as u32,
        col.saturating_sub(1) as u32,
        end_line as u32,
        end_col.saturating_sub(1) as u32,
    )
}

/// Compound statements end where their last body statement ends
fn end_at(mut location: Location, body: &[Stmt]) -> Location {
    if let Some(last) = body.last().and_then(|s| s.loc) {
        location.end_line = last.end_line;
        location.end_col = last.end_col;
    }
    location
}

pub struct AstBuilder<'a> {
    filename: &'a str,
}

impl<'a> AstBuilder<'a> {
    pub fn new(filename: &'a str) -> Self {
        Self { filename }
    }

    fn error(&self, pair: &Pair<'_, Rule>, message: impl Into<String>) -> ParseError {
        let location = loc(pair);
        ParseError::syntax(message, self.filename, location.line, location.col)
    }

    pub fn build_module(&self, mut pairs: Pairs<'_, Rule>) -> BuildResult<Module> {
        let mut body = Vec::new();
        if let Some(file) = pairs.next() {
            for pair in file.into_inner() {
                if pair.as_rule() != Rule::EOI {
                    self.build_stmt(pair, &mut body)?;
                }
            }
        }
        Ok(Module::new(body))
    }

    pub fn build_eval(&self, mut pairs: Pairs<'_, Rule>) -> BuildResult<Expr> {
        let file = pairs
            .next()
            .ok_or_else(|| ParseError::syntax("empty expression", self.filename, 1, 0))?;
        let span_pair = file.clone();
        for pair in file.into_inner() {
            if pair.as_rule() == Rule::testlist {
                return self.build_expr(pair);
            }
        }
        Err(self.error(&span_pair, "invalid syntax"))
    }

    // -----------------------------------------------------------------------
    // Statements

    fn build_block(&self, pair: Pair<'_, Rule>) -> BuildResult<Vec<Stmt>> {
        let mut body = Vec::new();
        for stmt in pair.into_inner() {
            self.build_stmt(stmt, &mut body)?;
        }
        Ok(body)
    }

    fn build_stmt(&self, pair: Pair<'_, Rule>, out: &mut Vec<Stmt>) -> BuildResult<()> {
        let location = loc(&pair);
        match pair.as_rule() {
            Rule::simple_stmts => {
                for simple in pair.into_inner() {
                    out.push(self.build_simple(simple)?);
                }
            }
            Rule::if_stmt => out.push(self.build_if(pair)?),
            Rule::while_stmt => {
                let mut inner = children(pair);
                let test = self.build_expr(self.next(&mut inner, "while condition")?)?;
                let body = self.build_block(self.next(&mut inner, "while body")?)?;
                let orelse = match inner.next() {
                    Some(clause) => self.build_clause_block(clause)?,
                    None => Vec::new(),
                };
                let location = end_at(location, if orelse.is_empty() { &body } else { &orelse });
                out.push(Stmt::at(StmtKind::While { test, body, orelse }, location));
            }
            Rule::for_stmt => {
                let mut inner = children(pair);
                let target = self.build_target_list(self.next(&mut inner, "for target")?)?;
                let iter = self.build_expr(self.next(&mut inner, "for iterable")?)?;
                let body = self.build_block(self.next(&mut inner, "for body")?)?;
                let orelse = match inner.next() {
                    Some(clause) => self.build_clause_block(clause)?,
                    None => Vec::new(),
                };
                let location = end_at(location, if orelse.is_empty() { &body } else { &orelse });
                out.push(Stmt::at(
                    StmtKind::For {
                        target,
                        iter,
                        body,
                        orelse,
                    },
                    location,
                ));
            }
            Rule::try_stmt => out.push(self.build_try(pair)?),
            Rule::funcdef => out.push(self.build_funcdef(pair)?),
            Rule::classdef => out.push(self.build_classdef(pair)?),
            _ => return Err(self.error(&pair, "invalid syntax")),
        }
        Ok(())
    }

    fn next<'i>(
        &self,
        inner: &mut impl Iterator<Item = Pair<'i, Rule>>,
        what: &str,
    ) -> BuildResult<Pair<'i, Rule>> {
        inner
            .next()
            .ok_or_else(|| ParseError::syntax(format!("missing {what}"), self.filename, 0, 0))
    }

    /// `else:` / `finally:` clause: the block is the only non-keyword child
    fn build_clause_block(&self, clause: Pair<'_, Rule>) -> BuildResult<Vec<Stmt>> {
        match children(clause).next() {
            Some(block) => self.build_block(block),
            None => Ok(Vec::new()),
        }
    }

    fn build_if(&self, pair: Pair<'_, Rule>) -> BuildResult<Stmt> {
        let location = loc(&pair);
        let mut inner = children(pair);
        let test = self.build_expr(self.next(&mut inner, "if condition")?)?;
        let body = self.build_block(self.next(&mut inner, "if body")?)?;

        let mut elifs = Vec::new();
        let mut orelse = Vec::new();
        for clause in inner {
            match clause.as_rule() {
                Rule::elif_clause => {
                    let clause_loc = loc(&clause);
                    let mut parts = children(clause);
                    let test = self.build_expr(self.next(&mut parts, "elif condition")?)?;
                    let body = self.build_block(self.next(&mut parts, "elif body")?)?;
                    elifs.push((clause_loc, test, body));
                }
                Rule::else_clause => orelse = self.build_clause_block(clause)?,
                _ => return Err(self.error(&clause, "invalid syntax")),
            }
        }

        let mut end_body = if orelse.is_empty() { None } else { Some(orelse.clone()) };
        for (clause_loc, test, body) in elifs.into_iter().rev() {
            let clause_end = end_at(clause_loc, end_body.as_deref().unwrap_or(&body));
            let nested = Stmt::at(StmtKind::If { test, body, orelse }, clause_end);
            end_body = Some(vec![nested.clone()]);
            orelse = vec![nested];
        }

        let location = end_at(location, if orelse.is_empty() { &body } else { &orelse });
        Ok(Stmt::at(StmtKind::If { test, body, orelse }, location))
    }

    fn build_try(&self, pair: Pair<'_, Rule>) -> BuildResult<Stmt> {
        let location = loc(&pair);
        let mut inner = children(pair);
        let body = self.build_block(self.next(&mut inner, "try body")?)?;
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();
        for clause in inner {
            match clause.as_rule() {
                Rule::except_clause => {
                    let clause_loc = loc(&clause);
                    let mut class = None;
                    let mut name = None;
                    let mut handler_body = Vec::new();
                    for part in children(clause) {
                        match part.as_rule() {
                            Rule::identifier => name = Some(part.as_str().to_string()),
                            Rule::block => handler_body = self.build_block(part)?,
                            _ => class = Some(self.build_expr(part)?),
                        }
                    }
                    handlers.push(ExceptHandler {
                        class,
                        name,
                        loc: Some(end_at(clause_loc, &handler_body)),
                        body: handler_body,
                    });
                }
                Rule::else_clause => orelse = self.build_clause_block(clause)?,
                Rule::finally_clause => finalbody = self.build_clause_block(clause)?,
                _ => return Err(self.error(&clause, "invalid syntax")),
            }
        }
        let last = [&finalbody, &orelse]
            .into_iter()
            .find(|b| !b.is_empty())
            .cloned()
            .or_else(|| handlers.last().map(|h| h.body.clone()))
            .unwrap_or_else(|| body.clone());
        Ok(Stmt::at(
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            end_at(location, &last),
        ))
    }

    fn build_funcdef(&self, pair: Pair<'_, Rule>) -> BuildResult<Stmt> {
        let location = loc(&pair);
        let mut decorators = Vec::new();
        let mut name = String::new();
        let mut params = Parameters::default();
        let mut body = Vec::new();
        for part in children(pair) {
            match part.as_rule() {
                Rule::decorator => decorators.push(self.build_decorator(part)?),
                Rule::identifier => name = part.as_str().to_string(),
                Rule::parameters => params = self.build_parameters(part)?,
                Rule::block => body = self.build_block(part)?,
                _ => return Err(self.error(&part, "invalid syntax")),
            }
        }
        Ok(Stmt::at(
            StmtKind::FunctionDef(FunctionDef {
                name,
                params,
                body: body.clone(),
                decorators,
            }),
            end_at(location, &body),
        ))
    }

    fn build_classdef(&self, pair: Pair<'_, Rule>) -> BuildResult<Stmt> {
        let location = loc(&pair);
        let mut decorators = Vec::new();
        let mut name = String::new();
        let mut bases = Vec::new();
        let mut body = Vec::new();
        for part in children(pair) {
            match part.as_rule() {
                Rule::decorator => decorators.push(self.build_decorator(part)?),
                Rule::identifier if name.is_empty() => name = part.as_str().to_string(),
                Rule::block => body = self.build_block(part)?,
                Rule::kwarg | Rule::star_arg | Rule::double_star_arg => {
                    return Err(self.error(&part, "class keyword arguments are not supported"))
                }
                _ => bases.push(self.build_expr(part)?),
            }
        }
        Ok(Stmt::at(
            StmtKind::ClassDef(ClassDef {
                name,
                bases,
                body: body.clone(),
                decorators,
            }),
            end_at(location, &body),
        ))
    }

    fn build_decorator(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        let span_pair = pair.clone();
        match pair.into_inner().next() {
            Some(expr) => self.build_expr(expr),
            None => Err(self.error(&span_pair, "invalid decorator")),
        }
    }

    fn build_parameters(&self, pair: Pair<'_, Rule>) -> BuildResult<Parameters> {
        let mut params = Parameters::default();
        let mut keyword_only = false;
        for item in pair.into_inner() {
            let item_loc = Some(loc(&item));
            match item.as_rule() {
                Rule::param => {
                    let mut parts = item.into_inner();
                    let name = self.next(&mut parts, "parameter name")?.as_str().to_string();
                    let default = match parts.next() {
                        Some(expr) => Some(self.build_expr(expr)?),
                        None => None,
                    };
                    let param = Param {
                        name,
                        default,
                        loc: item_loc,
                    };
                    if keyword_only {
                        params.kwonly.push(param);
                    } else {
                        params.args.push(param);
                    }
                }
                Rule::varargs_param => {
                    keyword_only = true;
                    let name = self.next(&mut item.into_inner(), "parameter name")?;
                    params.vararg = Some(Param {
                        name: name.as_str().to_string(),
                        default: None,
                        loc: item_loc,
                    });
                }
                Rule::bare_star => keyword_only = true,
                Rule::kwargs_param => {
                    let name = self.next(&mut item.into_inner(), "parameter name")?;
                    params.kwarg = Some(Param {
                        name: name.as_str().to_string(),
                        default: None,
                        loc: item_loc,
                    });
                }
                _ => return Err(self.error(&item, "invalid parameter")),
            }
        }

        let mut seen_default = false;
        for param in &params.args {
            if param.default.is_some() {
                seen_default = true;
            } else if seen_default {
                let at = param.loc.unwrap_or(Location::point(0, 0));
                return Err(ParseError::syntax(
                    "non-default argument follows default argument",
                    self.filename,
                    at.line,
                    at.col,
                ));
            }
        }
        Ok(params)
    }

    fn build_simple(&self, pair: Pair<'_, Rule>) -> BuildResult<Stmt> {
        let location = loc(&pair);
        let kind = match pair.as_rule() {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => StmtKind::Break,
            Rule::continue_stmt => StmtKind::Continue,
            Rule::return_stmt => match children(pair).next() {
                Some(value) => StmtKind::Return(Some(self.build_expr(value)?)),
                None => StmtKind::Return(None),
            },
            Rule::raise_stmt => {
                let mut exprs = children(pair);
                let exc = exprs.next().map(|e| self.build_expr(e)).transpose()?;
                let cause = exprs.next().map(|e| self.build_expr(e)).transpose()?;
                StmtKind::Raise { exc, cause }
            }
            Rule::global_stmt => {
                StmtKind::Global(children(pair).map(|p| p.as_str().to_string()).collect())
            }
            Rule::nonlocal_stmt => {
                StmtKind::Nonlocal(children(pair).map(|p| p.as_str().to_string()).collect())
            }
            Rule::del_stmt => StmtKind::Delete(
                children(pair)
                    .map(|p| self.build_expr(p))
                    .collect::<BuildResult<_>>()?,
            ),
            Rule::assert_stmt => {
                let mut exprs = children(pair);
                let test = self.build_expr(self.next(&mut exprs, "assertion")?)?;
                let msg = exprs.next().map(|e| self.build_expr(e)).transpose()?;
                StmtKind::Assert { test, msg }
            }
            Rule::import_stmt => {
                let mut names = Vec::new();
                for dotted in children(pair) {
                    let alias_loc = Some(loc(&dotted));
                    let mut parts = children(dotted);
                    let name = self.next(&mut parts, "module name")?.as_str().to_string();
                    let asname = parts.next().map(|p| p.as_str().to_string());
                    names.push(Alias {
                        name,
                        asname,
                        loc: alias_loc,
                    });
                }
                StmtKind::Import(names)
            }
            Rule::from_stmt => {
                let mut parts = children(pair);
                let module = self.next(&mut parts, "module name")?.as_str().to_string();
                let mut names = Vec::new();
                for item in parts {
                    let alias_loc = Some(loc(&item));
                    match item.as_rule() {
                        Rule::star_import => names.push(Alias {
                            name: "*".to_string(),
                            asname: None,
                            loc: alias_loc,
                        }),
                        _ => {
                            let mut idents = children(item);
                            let name = self.next(&mut idents, "imported name")?.as_str().to_string();
                            let asname = idents.next().map(|p| p.as_str().to_string());
                            names.push(Alias {
                                name,
                                asname,
                                loc: alias_loc,
                            });
                        }
                    }
                }
                StmtKind::ImportFrom { module, names }
            }
            Rule::expr_stmt => self.build_expr_stmt(pair)?,
            _ => return Err(self.error(&pair, "invalid syntax")),
        };
        Ok(Stmt::at(kind, location))
    }

    fn build_expr_stmt(&self, pair: Pair<'_, Rule>) -> BuildResult<StmtKind> {
        let mut exprs = Vec::new();
        let mut aug = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::augassign => {
                    let op = match part.as_str() {
                        "+=" => BinOp::Add,
                        "-=" => BinOp::Sub,
                        "*=" => BinOp::Mult,
                        "/=" => BinOp::Div,
                        "//=" => BinOp::FloorDiv,
                        "%=" => BinOp::Mod,
                        "**=" => BinOp::Pow,
                        _ => return Err(self.error(&part, "invalid augmented assignment")),
                    };
                    aug = Some(op);
                }
                _ => exprs.push(self.build_expr(part)?),
            }
        }
        match (aug, exprs.len()) {
            (Some(op), 2) => {
                let value = exprs.pop().unwrap_or_else(|| Expr::constant(Constant::None));
                let target = exprs.pop().unwrap_or_else(|| Expr::constant(Constant::None));
                Ok(StmtKind::AugAssign { target, op, value })
            }
            (None, 1) => Ok(StmtKind::Expr(exprs.remove(0))),
            (None, n) if n > 1 => {
                let value = exprs.pop().unwrap_or_else(|| Expr::constant(Constant::None));
                Ok(StmtKind::Assign {
                    targets: exprs,
                    value,
                })
            }
            _ => Err(ParseError::syntax("invalid syntax", self.filename, 0, 0)),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions

    fn build_target_list(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        self.build_sequence(pair)
    }

    /// `a, b` style lists: one element without a trailing comma is the element itself
    fn build_sequence(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        let location = loc(&pair);
        let mut items = Vec::new();
        let mut trailing = false;
        let mut starred = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::trailing_comma => trailing = true,
                Rule::star_expr | Rule::star_target => {
                    starred = true;
                    items.push(self.build_expr(part)?);
                }
                _ => items.push(self.build_expr(part)?),
            }
        }
        if items.len() == 1 && !trailing && !starred {
            Ok(items.remove(0))
        } else {
            Ok(Expr::at(ExprKind::Tuple(items), location))
        }
    }

    fn build_expr(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        let location = loc(&pair);
        match pair.as_rule() {
            Rule::testlist | Rule::target_list | Rule::subscript_list => self.build_sequence(pair),
            Rule::paren => match pair.into_inner().next() {
                Some(body) => self.build_sequence(body),
                None => Ok(Expr::at(ExprKind::Tuple(Vec::new()), location)),
            },
            Rule::ternary => {
                let mut parts = children(pair);
                let body = self.build_expr(self.next(&mut parts, "expression")?)?;
                match parts.next() {
                    None => Ok(body),
                    Some(test) => {
                        let test = self.build_expr(test)?;
                        let orelse = self.build_expr(self.next(&mut parts, "else branch")?)?;
                        Ok(Expr::at(
                            ExprKind::IfExp {
                                test: Box::new(test),
                                body: Box::new(body),
                                orelse: Box::new(orelse),
                            },
                            location,
                        ))
                    }
                }
            }
            Rule::lambdef => {
                let mut params = Parameters::default();
                let mut body = None;
                for part in children(pair) {
                    match part.as_rule() {
                        Rule::parameters => params = self.build_parameters(part)?,
                        _ => body = Some(self.build_expr(part)?),
                    }
                }
                let body = body.ok_or_else(|| {
                    ParseError::syntax("lambda without body", self.filename, location.line, location.col)
                })?;
                Ok(Expr::at(
                    ExprKind::Lambda {
                        params: Box::new(params),
                        body: Box::new(body),
                    },
                    location,
                ))
            }
            Rule::or_test | Rule::and_test => {
                let op = if pair.as_rule() == Rule::or_test {
                    BoolOp::Or
                } else {
                    BoolOp::And
                };
                let mut values = children(pair)
                    .map(|p| self.build_expr(p))
                    .collect::<BuildResult<Vec<_>>>()?;
                if values.len() == 1 {
                    Ok(values.remove(0))
                } else {
                    Ok(Expr::at(ExprKind::BoolOp { op, values }, location))
                }
            }
            Rule::not_test => {
                let mut inner = pair.into_inner().peekable();
                let negated = inner.peek().map(|p| p.as_rule()) == Some(Rule::kw_not);
                if negated {
                    inner.next();
                }
                let operand = self.build_expr(self.next(&mut inner, "operand")?)?;
                if negated {
                    Ok(Expr::at(
                        ExprKind::UnaryOp {
                            op: UnaryOp::Not,
                            operand: Box::new(operand),
                        },
                        location,
                    ))
                } else {
                    Ok(operand)
                }
            }
            Rule::comparison => {
                let mut inner = pair.into_inner();
                let left = self.build_expr(self.next(&mut inner, "operand")?)?;
                let mut ops = Vec::new();
                let mut comparators = Vec::new();
                while let Some(op) = inner.next() {
                    let text = op.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
                    let op = match text.as_str() {
                        "==" => CmpOp::Eq,
                        "!=" => CmpOp::NotEq,
                        "<" => CmpOp::Lt,
                        "<=" => CmpOp::LtE,
                        ">" => CmpOp::Gt,
                        ">=" => CmpOp::GtE,
                        "is" => CmpOp::Is,
                        "is not" => CmpOp::IsNot,
                        "in" => CmpOp::In,
                        "not in" => CmpOp::NotIn,
                        _ => return Err(self.error(&op, "invalid comparison")),
                    };
                    ops.push(op);
                    comparators.push(self.build_expr(self.next(&mut inner, "operand")?)?);
                }
                if ops.is_empty() {
                    Ok(left)
                } else {
                    Ok(Expr::at(
                        ExprKind::Compare {
                            left: Box::new(left),
                            ops,
                            comparators,
                        },
                        location,
                    ))
                }
            }
            Rule::arith | Rule::term => {
                let mut inner = pair.into_inner();
                let mut left = self.build_expr(self.next(&mut inner, "operand")?)?;
                while let Some(op) = inner.next() {
                    let op = match op.as_str() {
                        "+" => BinOp::Add,
                        "-" => BinOp::Sub,
                        "*" => BinOp::Mult,
                        "/" => BinOp::Div,
                        "//" => BinOp::FloorDiv,
                        "%" => BinOp::Mod,
                        _ => return Err(self.error(&op, "invalid operator")),
                    };
                    let right = self.build_expr(self.next(&mut inner, "operand")?)?;
                    let span = span_between(&left, &right, location);
                    left = Expr::at(
                        ExprKind::BinOp {
                            left: Box::new(left),
                            op,
                            right: Box::new(right),
                        },
                        span,
                    );
                }
                Ok(left)
            }
            Rule::factor => {
                let mut inner = pair.into_inner();
                let first = self.next(&mut inner, "operand")?;
                if first.as_rule() == Rule::unary_op {
                    let op = if first.as_str() == "-" {
                        UnaryOp::Neg
                    } else {
                        UnaryOp::Pos
                    };
                    let operand = self.build_expr(self.next(&mut inner, "operand")?)?;
                    Ok(Expr::at(
                        ExprKind::UnaryOp {
                            op,
                            operand: Box::new(operand),
                        },
                        location,
                    ))
                } else {
                    self.build_expr(first)
                }
            }
            Rule::power => {
                let mut inner = pair.into_inner();
                let base = self.build_expr(self.next(&mut inner, "operand")?)?;
                match inner.next() {
                    None => Ok(base),
                    Some(exponent) => Ok(Expr::at(
                        ExprKind::BinOp {
                            left: Box::new(base),
                            op: BinOp::Pow,
                            right: Box::new(self.build_expr(exponent)?),
                        },
                        location,
                    )),
                }
            }
            Rule::primary => self.build_primary(pair),
            Rule::star_expr | Rule::star_target | Rule::star_arg => {
                let inner = self.next(&mut pair.into_inner(), "starred operand")?;
                Ok(Expr::at(ExprKind::Starred(Box::new(self.build_expr(inner)?)), location))
            }
            Rule::slice => {
                let mut lower = None;
                let mut upper = None;
                let mut step = None;
                for part in pair.into_inner() {
                    let rule = part.as_rule();
                    let value = match part.into_inner().next() {
                        Some(expr) => Some(Box::new(self.build_expr(expr)?)),
                        None => None,
                    };
                    match rule {
                        Rule::slice_lower => lower = value,
                        Rule::slice_upper => upper = value,
                        _ => step = value,
                    }
                }
                Ok(Expr::at(ExprKind::Slice { lower, upper, step }, location))
            }
            Rule::list_display => match pair.into_inner().next() {
                None => Ok(Expr::at(ExprKind::List(Vec::new()), location)),
                Some(inner) if inner.as_rule() == Rule::list_comp => {
                    self.build_list_comp(inner, location)
                }
                Some(items) => Ok(Expr::at(
                    ExprKind::List(
                        items
                            .into_inner()
                            .map(|p| self.build_expr(p))
                            .collect::<BuildResult<_>>()?,
                    ),
                    location,
                )),
            },
            Rule::dict_display => {
                let mut keys = Vec::new();
                let mut values = Vec::new();
                for item in pair.into_inner() {
                    let mut kv = item.into_inner();
                    keys.push(self.build_expr(self.next(&mut kv, "dict key")?)?);
                    values.push(self.build_expr(self.next(&mut kv, "dict value")?)?);
                }
                Ok(Expr::at(ExprKind::Dict { keys, values }, location))
            }
            Rule::strings => self.build_strings(pair),
            Rule::number => self.build_number(pair),
            Rule::kw_none => Ok(Expr::at(ExprKind::Constant(Constant::None), location)),
            Rule::kw_true => Ok(Expr::at(ExprKind::Constant(Constant::Bool(true)), location)),
            Rule::kw_false => Ok(Expr::at(ExprKind::Constant(Constant::Bool(false)), location)),
            Rule::identifier => Ok(Expr::at(ExprKind::Name(pair.as_str().to_string()), location)),
            _ => Err(self.error(&pair, "invalid syntax")),
        }
    }

    fn build_list_comp(&self, pair: Pair<'_, Rule>, location: Location) -> BuildResult<Expr> {
        let mut inner = pair.into_inner();
        let elt = self.build_expr(self.next(&mut inner, "comprehension element")?)?;
        let mut generators = Vec::new();
        for comp in inner {
            let mut parts = children(comp);
            let target = self.build_target_list(self.next(&mut parts, "comprehension target")?)?;
            let iter = self.build_expr(self.next(&mut parts, "comprehension iterable")?)?;
            let mut ifs = Vec::new();
            for cond in parts {
                if let Some(test) = children(cond).next() {
                    ifs.push(self.build_expr(test)?);
                }
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(Expr::at(
            ExprKind::ListComp {
                elt: Box::new(elt),
                generators,
            },
            location,
        ))
    }

    fn build_primary(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        let mut inner = pair.into_inner();
        let mut expr = self.build_expr(self.next(&mut inner, "expression")?)?;
        let start = expr.loc;
        for trailer in inner {
            let trailer_loc = loc(&trailer);
            let location = match start {
                Some(start) => Location::new(start.line, start.col, trailer_loc.end_line, trailer_loc.end_col),
                None => trailer_loc,
            };
            expr = match trailer.as_rule() {
                Rule::call => {
                    let mut args = Vec::new();
                    let mut keywords = Vec::new();
                    for arg in trailer.into_inner() {
                        let arg_loc = Some(loc(&arg));
                        match arg.as_rule() {
                            Rule::kwarg => {
                                let mut parts = arg.into_inner();
                                let name = self.next(&mut parts, "keyword name")?.as_str().to_string();
                                let value = self.build_expr(self.next(&mut parts, "keyword value")?)?;
                                keywords.push(Keyword {
                                    arg: Some(name),
                                    value,
                                    loc: arg_loc,
                                });
                            }
                            Rule::double_star_arg => {
                                let value = self.next(&mut arg.into_inner(), "mapping")?;
                                keywords.push(Keyword {
                                    arg: None,
                                    value: self.build_expr(value)?,
                                    loc: arg_loc,
                                });
                            }
                            _ => args.push(self.build_expr(arg)?),
                        }
                    }
                    Expr::at(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        location,
                    )
                }
                Rule::subscription => {
                    let index = self.build_expr(self.next(&mut trailer.into_inner(), "subscript")?)?;
                    Expr::at(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        location,
                    )
                }
                Rule::attribute => {
                    let attr = self.next(&mut trailer.into_inner(), "attribute name")?;
                    Expr::at(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr: attr.as_str().to_string(),
                        },
                        location,
                    )
                }
                _ => return Err(self.error(&trailer, "invalid syntax")),
            };
        }
        Ok(expr)
    }

    fn build_number(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        let location = loc(&pair);
        let text = pair.as_str().replace('_', "");
        let lower = text.to_ascii_lowercase();
        let constant = if let Some(hex) = lower.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
                .map(Constant::Int)
                .map_err(|_| self.error(&pair, "integer literal too large"))?
        } else if lower.contains(['.', 'e']) {
            lower
                .parse::<f64>()
                .map(Constant::Float)
                .map_err(|_| self.error(&pair, "invalid float literal"))?
        } else {
            lower
                .parse::<i64>()
                .map(Constant::Int)
                .map_err(|_| self.error(&pair, "integer literal too large"))?
        };
        Ok(Expr::at(ExprKind::Constant(constant), location))
    }

    fn build_strings(&self, pair: Pair<'_, Rule>) -> BuildResult<Expr> {
        let location = loc(&pair);
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        for piece in pair.into_inner() {
            let literal = StringLiteral::split(piece.as_str());
            if literal.formatted {
                formatted = true;
                for part in self.build_fstring_parts(&literal, location)? {
                    push_part(&mut parts, part);
                }
            } else {
                let text = literal.decode(literal.body).map_err(|m| self.error(&piece, m))?;
                push_part(&mut parts, FStringPart::Literal(text));
            }
        }
        if formatted {
            return Ok(Expr::at(ExprKind::FormattedString(parts), location));
        }
        let text = match parts.pop() {
            Some(FStringPart::Literal(text)) => text,
            _ => String::new(),
        };
        Ok(Expr::at(ExprKind::Constant(Constant::Str(text)), location))
    }

    fn build_fstring_parts(&self, literal: &StringLiteral<'_>, location: Location) -> BuildResult<Vec<FStringPart>> {
        let fail = |message: &str| {
            ParseError::syntax(format!("f-string: {message}"), self.filename, location.line, location.col)
        };
        let body: Vec<char> = literal.body.chars().collect();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;
        while i < body.len() {
            match body[i] {
                '{' if body.get(i + 1) == Some(&'{') => {
                    text.push('{');
                    i += 2;
                }
                '}' if body.get(i + 1) == Some(&'}') => {
                    text.push('}');
                    i += 2;
                }
                '}' => return Err(fail("single '}' is not allowed")),
                '{' => {
                    if !text.is_empty() {
                        let decoded = literal.decode(&text).map_err(|m| fail(&m))?;
                        parts.push(FStringPart::Literal(decoded));
                        text.clear();
                    }
                    let (field, next) = scan_field(&body, i + 1).ok_or_else(|| fail("expecting '}'"))?;
                    let mut value = parse_expression(field.expr.trim(), self.filename)
                        .map_err(|_| fail("invalid expression"))?;
                    Relocate(location).visit_expr_mut(&mut value);
                    parts.push(FStringPart::Value {
                        value: Box::new(value),
                        conversion: field.conversion,
                        format_spec: field.format_spec,
                    });
                    i = next;
                }
                c => {
                    text.push(c);
                    i += 1;
                }
            }
        }
        if !text.is_empty() {
            let decoded = literal.decode(&text).map_err(|m| fail(&m))?;
            parts.push(FStringPart::Literal(decoded));
        }
        Ok(parts)
    }
}

fn push_part(parts: &mut Vec<FStringPart>, part: FStringPart) {
    if let (Some(FStringPart::Literal(prev)), FStringPart::Literal(next)) = (parts.last_mut(), &part) {
        prev.push_str(next);
        return;
    }
    parts.push(part);
}

fn span_between(left: &Expr, right: &Expr, fallback: Location) -> Location {
    match (left.loc, right.loc) {
        (Some(l), Some(r)) => Location::new(l.line, l.col, r.end_line, r.end_col),
        _ => fallback,
    }
}

/// Gives every node of an embedded expression the location of its literal
struct Relocate(Location);

impl VisitorMut for Relocate {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        expr.loc = Some(self.0);
        walk_expr_mut(self, expr);
    }

    fn visit_keyword_mut(&mut self, keyword: &mut Keyword) {
        keyword.loc = Some(self.0);
        self.visit_expr_mut(&mut keyword.value);
    }

    fn visit_param_mut(&mut self, param: &mut Param) {
        param.loc = Some(self.0);
        if let Some(default) = &mut param.default {
            self.visit_expr_mut(default);
        }
    }
}

struct FormatField {
    expr: String,
    conversion: Option<char>,
    format_spec: Option<String>,
}

/// Scan a replacement field starting after its `{`; returns the index past `}`
fn scan_field(body: &[char], start: usize) -> Option<(FormatField, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    let mut expr = String::new();
    while i < body.len() {
        let c = body[i];
        if let Some(q) = quote {
            expr.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                expr.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                expr.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                expr.push(c);
            }
            '}' if depth > 0 => {
                depth -= 1;
                expr.push(c);
            }
            '}' => {
                return Some((
                    FormatField {
                        expr,
                        conversion: None,
                        format_spec: None,
                    },
                    i + 1,
                ))
            }
            '!' if depth == 0 && body.get(i + 1) != Some(&'=') => {
                let conversion = *body.get(i + 1)?;
                let mut j = i + 2;
                let mut format_spec = None;
                if body.get(j) == Some(&':') {
                    let (spec, end) = scan_spec(body, j + 1)?;
                    format_spec = Some(spec);
                    j = end;
                } else if body.get(j) != Some(&'}') {
                    return None;
                }
                return Some((
                    FormatField {
                        expr,
                        conversion: Some(conversion),
                        format_spec,
                    },
                    j + 1,
                ));
            }
            ':' if depth == 0 => {
                let (spec, end) = scan_spec(body, i + 1)?;
                return Some((
                    FormatField {
                        expr,
                        conversion: None,
                        format_spec: Some(spec),
                    },
                    end + 1,
                ));
            }
            _ => expr.push(c),
        }
        i += 1;
    }
    None
}

/// Format spec up to the closing `}`; returns the spec and the index of `}`
fn scan_spec(body: &[char], start: usize) -> Option<(String, usize)> {
    let mut spec = String::new();
    for (offset, c) in body[start..].iter().enumerate() {
        if *c == '}' {
            return Some((spec, start + offset));
        }
        spec.push(*c);
    }
    None
}

/// Raw string literal split into prefix flags and body
struct StringLiteral<'s> {
    raw: bool,
    formatted: bool,
    body: &'s str,
}

impl<'s> StringLiteral<'s> {
    fn split(text: &'s str) -> Self {
        let prefix_len = text.find(['\'', '"']).unwrap_or(0);
        let prefix = text[..prefix_len].to_ascii_lowercase();
        let rest = &text[prefix_len..];
        let quote_len = if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
            3
        } else {
            1
        };
        let body = if rest.len() >= quote_len * 2 {
            &rest[quote_len..rest.len() - quote_len]
        } else {
            ""
        };
        Self {
            raw: prefix.contains('r'),
            formatted: prefix.contains('f'),
            body,
        }
    }

    fn decode(&self, text: &str) -> Result<String, String> {
        if self.raw {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some('a') => out.push('\x07'),
                Some('b') => out.push('\x08'),
                Some('f') => out.push('\x0C'),
                Some('v') => out.push('\x0B'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some('\n') => {}
                Some('x') => out.push(take_hex(&mut chars, 2)?),
                Some('u') => out.push(take_hex(&mut chars, 4)?),
                Some('U') => out.push(take_hex(&mut chars, 8)?),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        }
        Ok(out)
    }
}

fn take_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, len: usize) -> Result<char, String> {
    let digits: String = (0..len).filter_map(|_| chars.next()).collect();
    u32::from_str_radix(&digits, 16)
        .ok()
        .filter(|_| digits.len() == len)
        .and_then(char::from_u32)
        .ok_or_else(|| format!("truncated \\x{digits} escape"))
}
