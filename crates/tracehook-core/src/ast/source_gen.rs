// Source code generation from AST
// Reconstructs surface syntax from a tree. Used for debug dumps of transformed
// modules and for parser round-trip tests, so the output re-parses to the
// same tree (locations aside).

use super::*;

/// Trait for types that can generate their source code representation
pub trait ToSource {
    fn to_source(&self) -> String;
}

const INDENT: &str = "    ";

impl ToSource for Module {
    fn to_source(&self) -> String {
        let mut out = String::new();
        write_body(&mut out, &self.body, 0);
        out
    }
}

impl ToSource for SourceUnit {
    fn to_source(&self) -> String {
        match self {
            SourceUnit::Module(module) => module.to_source(),
            SourceUnit::Expression(expr) => expr.to_source(),
        }
    }
}

impl ToSource for Stmt {
    fn to_source(&self) -> String {
        let mut out = String::new();
        write_stmt(&mut out, self, 0);
        out
    }
}

impl ToSource for Expr {
    fn to_source(&self) -> String {
        expr_source(self, Prec::Lowest)
    }
}

impl ToSource for Parameters {
    fn to_source(&self) -> String {
        let mut parts = Vec::new();
        for param in &self.args {
            parts.push(param_source(param));
        }
        if let Some(vararg) = &self.vararg {
            parts.push(format!("*{}", vararg.name));
        } else if !self.kwonly.is_empty() {
            parts.push("*".to_string());
        }
        for param in &self.kwonly {
            parts.push(param_source(param));
        }
        if let Some(kwarg) = &self.kwarg {
            parts.push(format!("**{}", kwarg.name));
        }
        parts.join(", ")
    }
}

fn param_source(param: &Param) -> String {
    match &param.default {
        Some(default) => format!("{}={}", param.name, expr_source(default, Prec::Test)),
        None => param.name.clone(),
    }
}

fn write_body(out: &mut String, body: &[Stmt], depth: usize) {
    if body.is_empty() {
        push_line(out, depth, "pass");
        return;
    }
    for stmt in body {
        write_stmt(out, stmt, depth);
    }
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(line);
    out.push('\n');
}

fn write_block(out: &mut String, depth: usize, header: String, body: &[Stmt]) {
    push_line(out, depth, &format!("{header}:"));
    write_body(out, body, depth + 1);
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            for decorator in &def.decorators {
                push_line(out, depth, &format!("@{}", decorator.to_source()));
            }
            write_block(
                out,
                depth,
                format!("def {}({})", def.name, def.params.to_source()),
                &def.body,
            );
        }
        StmtKind::ClassDef(def) => {
            for decorator in &def.decorators {
                push_line(out, depth, &format!("@{}", decorator.to_source()));
            }
            let header = if def.bases.is_empty() {
                format!("class {}", def.name)
            } else {
                format!("class {}({})", def.name, join_exprs(&def.bases))
            };
            write_block(out, depth, header, &def.body);
        }
        StmtKind::If { test, body, orelse } => {
            write_block(out, depth, format!("if {}", test.to_source()), body);
            let mut orelse = orelse;
            loop {
                match orelse.as_slice() {
                    [] => break,
                    [Stmt {
                        kind:
                            StmtKind::If {
                                test,
                                body,
                                orelse: next,
                            },
                        ..
                    }] => {
                        write_block(out, depth, format!("elif {}", test.to_source()), body);
                        orelse = next;
                    }
                    _ => {
                        write_block(out, depth, "else".to_string(), orelse);
                        break;
                    }
                }
            }
        }
        StmtKind::While { test, body, orelse } => {
            write_block(out, depth, format!("while {}", test.to_source()), body);
            if !orelse.is_empty() {
                write_block(out, depth, "else".to_string(), orelse);
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            write_block(
                out,
                depth,
                format!("for {} in {}", target_source(target), iter.to_source()),
                body,
            );
            if !orelse.is_empty() {
                write_block(out, depth, "else".to_string(), orelse);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            write_block(out, depth, "try".to_string(), body);
            for handler in handlers {
                let header = match (&handler.class, &handler.name) {
                    (Some(class), Some(name)) => format!("except {} as {}", class.to_source(), name),
                    (Some(class), None) => format!("except {}", class.to_source()),
                    _ => "except".to_string(),
                };
                write_block(out, depth, header, &handler.body);
            }
            if !orelse.is_empty() {
                write_block(out, depth, "else".to_string(), orelse);
            }
            if !finalbody.is_empty() {
                write_block(out, depth, "finally".to_string(), finalbody);
            }
        }
        _ => push_line(out, depth, &simple_stmt_source(stmt)),
    }
}

fn simple_stmt_source(stmt: &Stmt) -> String {
    match &stmt.kind {
        StmtKind::Return(None) => "return".to_string(),
        StmtKind::Return(Some(value)) => format!("return {}", value.to_source()),
        StmtKind::Delete(targets) => format!("del {}", join_exprs(targets)),
        StmtKind::Assign { targets, value } => {
            let mut line = String::new();
            for target in targets {
                line.push_str(&target_source(target));
                line.push_str(" = ");
            }
            line.push_str(&value.to_source());
            line
        }
        StmtKind::AugAssign { target, op, value } => format!(
            "{} {}= {}",
            target_source(target),
            op.symbol(),
            value.to_source()
        ),
        StmtKind::Raise { exc: None, .. } => "raise".to_string(),
        StmtKind::Raise {
            exc: Some(exc),
            cause: None,
        } => format!("raise {}", exc.to_source()),
        StmtKind::Raise {
            exc: Some(exc),
            cause: Some(cause),
        } => format!("raise {} from {}", exc.to_source(), cause.to_source()),
        StmtKind::Assert { test, msg: None } => format!("assert {}", test.to_source()),
        StmtKind::Assert {
            test,
            msg: Some(msg),
        } => format!("assert {}, {}", test.to_source(), msg.to_source()),
        StmtKind::Import(names) => format!("import {}", aliases_source(names)),
        StmtKind::ImportFrom { module, names } => {
            format!("from {} import {}", module, aliases_source(names))
        }
        StmtKind::Global(names) => format!("global {}", names.join(", ")),
        StmtKind::Nonlocal(names) => format!("nonlocal {}", names.join(", ")),
        StmtKind::Expr(value) => value.to_source(),
        StmtKind::Pass => "pass".to_string(),
        StmtKind::Break => "break".to_string(),
        StmtKind::Continue => "continue".to_string(),
        // compound statements are written by write_stmt
        _ => {
            let mut out = String::new();
            write_stmt(&mut out, stmt, 0);
            out.trim_end().to_string()
        }
    }
}

fn aliases_source(names: &[Alias]) -> String {
    names
        .iter()
        .map(|alias| match &alias.asname {
            Some(asname) => format!("{} as {}", alias.name, asname),
            None => alias.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| expr_source(e, Prec::Test))
        .collect::<Vec<_>>()
        .join(", ")
}

fn target_source(target: &Expr) -> String {
    match &target.kind {
        ExprKind::Tuple(elts) if !elts.is_empty() => {
            let mut items = join_exprs(elts);
            if elts.len() == 1 {
                items.push(',');
            }
            items
        }
        _ => expr_source(target, Prec::Test),
    }
}

/// Binding strength, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Test,
    Or,
    And,
    Not,
    Compare,
    Arith,
    Term,
    Unary,
    Power,
    Primary,
}

fn binop_prec(op: BinOp) -> Prec {
    match op {
        BinOp::Add | BinOp::Sub => Prec::Arith,
        BinOp::Mult | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => Prec::Term,
        BinOp::Pow => Prec::Power,
    }
}

fn expr_prec(expr: &Expr) -> Prec {
    match &expr.kind {
        ExprKind::Lambda { .. } => Prec::Lowest,
        ExprKind::IfExp { .. } => Prec::Test,
        ExprKind::BoolOp { op: BoolOp::Or, .. } => Prec::Or,
        ExprKind::BoolOp { op: BoolOp::And, .. } => Prec::And,
        ExprKind::UnaryOp {
            op: UnaryOp::Not, ..
        } => Prec::Not,
        ExprKind::Compare { .. } => Prec::Compare,
        ExprKind::BinOp { op, .. } => binop_prec(*op),
        ExprKind::UnaryOp { .. } => Prec::Unary,
        ExprKind::Slice { .. } => Prec::Lowest,
        // negative literals print with a sign
        ExprKind::Constant(Constant::Int(n)) if *n < 0 => Prec::Unary,
        ExprKind::Constant(Constant::Float(f)) if f.is_sign_negative() => Prec::Unary,
        _ => Prec::Primary,
    }
}

fn expr_source(expr: &Expr, min: Prec) -> String {
    let text = expr_text(expr);
    if expr_prec(expr) < min {
        format!("({text})")
    } else {
        text
    }
}

fn expr_text(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::BoolOp { op, values } => {
            let (word, prec) = match op {
                BoolOp::And => (" and ", Prec::And),
                BoolOp::Or => (" or ", Prec::Or),
            };
            // operands bind one level tighter so nested chains keep their shape
            let operand = if prec == Prec::Or { Prec::And } else { Prec::Not };
            values
                .iter()
                .map(|v| expr_source(v, operand))
                .collect::<Vec<_>>()
                .join(word)
        }
        ExprKind::BinOp { left, op, right } => {
            let prec = binop_prec(*op);
            if *op == BinOp::Pow {
                // right associative, and the base binds tighter than unary minus
                format!(
                    "{} ** {}",
                    expr_source(left, Prec::Primary),
                    expr_source(right, Prec::Unary)
                )
            } else {
                format!(
                    "{} {} {}",
                    expr_source(left, prec),
                    op.symbol(),
                    expr_source(right, next_prec(prec))
                )
            }
        }
        ExprKind::UnaryOp { op, operand } => match op {
            UnaryOp::Not => format!("not {}", expr_source(operand, Prec::Not)),
            UnaryOp::Neg => format!("-{}", expr_source(operand, Prec::Unary)),
            UnaryOp::Pos => format!("+{}", expr_source(operand, Prec::Unary)),
        },
        ExprKind::Lambda { params, body } => {
            if params.is_empty() {
                format!("lambda: {}", expr_source(body, Prec::Test))
            } else {
                format!("lambda {}: {}", params.to_source(), expr_source(body, Prec::Test))
            }
        }
        ExprKind::IfExp { test, body, orelse } => format!(
            "{} if {} else {}",
            expr_source(body, Prec::Or),
            expr_source(test, Prec::Or),
            expr_source(orelse, Prec::Test)
        ),
        ExprKind::Dict { keys, values } => {
            let items = keys
                .iter()
                .zip(values)
                .map(|(k, v)| format!("{}: {}", expr_source(k, Prec::Test), expr_source(v, Prec::Test)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{items}}}")
        }
        ExprKind::ListComp { elt, generators } => {
            let mut text = format!("[{}", expr_source(elt, Prec::Test));
            for generator in generators {
                text.push_str(&format!(
                    " for {} in {}",
                    target_source(&generator.target),
                    expr_source(&generator.iter, Prec::Or)
                ));
                for cond in &generator.ifs {
                    text.push_str(&format!(" if {}", expr_source(cond, Prec::Or)));
                }
            }
            text.push(']');
            text
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut text = expr_source(left, Prec::Arith);
            for (op, comparator) in ops.iter().zip(comparators) {
                text.push_str(&format!(" {} {}", op.symbol(), expr_source(comparator, Prec::Arith)));
            }
            text
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            let mut parts: Vec<String> = args.iter().map(|a| expr_source(a, Prec::Test)).collect();
            for keyword in keywords {
                match &keyword.arg {
                    Some(arg) => parts.push(format!("{}={}", arg, expr_source(&keyword.value, Prec::Test))),
                    None => parts.push(format!("**{}", expr_source(&keyword.value, Prec::Primary))),
                }
            }
            format!("{}({})", expr_source(func, Prec::Primary), parts.join(", "))
        }
        ExprKind::FormattedString(parts) => {
            let mut text = String::from("f\"");
            for part in parts {
                match part {
                    FStringPart::Literal(literal) => {
                        let escaped = escape_str(literal, '"');
                        text.push_str(&escaped.replace('{', "{{").replace('}', "}}"));
                    }
                    FStringPart::Value {
                        value,
                        conversion,
                        format_spec,
                    } => {
                        text.push('{');
                        text.push_str(&value.to_source());
                        if let Some(conversion) = conversion {
                            text.push('!');
                            text.push(*conversion);
                        }
                        if let Some(spec) = format_spec {
                            text.push(':');
                            text.push_str(spec);
                        }
                        text.push('}');
                    }
                }
            }
            text.push('"');
            text
        }
        ExprKind::Constant(constant) => constant_source(constant),
        ExprKind::Attribute { value, attr } => {
            format!("{}.{}", expr_source(value, Prec::Primary), attr)
        }
        ExprKind::Subscript { value, index } => {
            format!("{}[{}]", expr_source(value, Prec::Primary), index.to_source())
        }
        ExprKind::Slice { lower, upper, step } => {
            let part = |e: &Option<Box<Expr>>| {
                e.as_ref()
                    .map(|e| expr_source(e, Prec::Test))
                    .unwrap_or_default()
            };
            match step {
                Some(_) => format!("{}:{}:{}", part(lower), part(upper), part(step)),
                None => format!("{}:{}", part(lower), part(upper)),
            }
        }
        ExprKind::Starred(value) => format!("*{}", expr_source(value, Prec::Primary)),
        ExprKind::Name(id) => id.clone(),
        ExprKind::List(elts) => format!("[{}]", join_exprs(elts)),
        ExprKind::Tuple(elts) => match elts.len() {
            1 => format!("({},)", expr_source(&elts[0], Prec::Test)),
            _ => format!("({})", join_exprs(elts)),
        },
    }
}

fn next_prec(prec: Prec) -> Prec {
    match prec {
        Prec::Arith => Prec::Term,
        Prec::Term => Prec::Unary,
        other => other,
    }
}

pub fn constant_source(constant: &Constant) -> String {
    match constant {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(n) => n.to_string(),
        Constant::Float(f) => format_float(*f),
        Constant::Str(s) => quote_str(s),
    }
}

/// Float text the way the runtime prints it: always with a fractional part.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Quote a string the way `repr` does: single quotes unless the text holds
/// a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    format!("{quote}{}{quote}", escape_str(s, quote))
}

fn escape_str(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Box<Expr> {
        Box::new(Expr::name(id))
    }

    #[test]
    fn test_binop_parenthesization() {
        // (a + b) * c
        let expr = Expr::new(ExprKind::BinOp {
            left: Box::new(Expr::new(ExprKind::BinOp {
                left: name("a"),
                op: BinOp::Add,
                right: name("b"),
            })),
            op: BinOp::Mult,
            right: name("c"),
        });
        assert_eq!(expr.to_source(), "(a + b) * c");
    }

    #[test]
    fn test_left_assoc_subtraction() {
        // a - (b - c) keeps its parentheses
        let expr = Expr::new(ExprKind::BinOp {
            left: name("a"),
            op: BinOp::Sub,
            right: Box::new(Expr::new(ExprKind::BinOp {
                left: name("b"),
                op: BinOp::Sub,
                right: name("c"),
            })),
        });
        assert_eq!(expr.to_source(), "a - (b - c)");
    }

    #[test]
    fn test_strings_and_floats() {
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(0.5), "0.5");
    }

    #[test]
    fn test_function_def_with_decorator() {
        let def = Stmt::new(StmtKind::FunctionDef(FunctionDef {
            name: "f".to_string(),
            params: Parameters {
                args: vec![Param {
                    name: "x".to_string(),
                    default: None,
                    loc: None,
                }],
                ..Default::default()
            },
            body: vec![Stmt::new(StmtKind::Return(Some(Expr::name("x"))))],
            decorators: vec![Expr::name("deco")],
        }));
        assert_eq!(def.to_source(), "@deco\ndef f(x):\n    return x\n");
    }

    #[test]
    fn test_elif_chain() {
        let stmt = Stmt::new(StmtKind::If {
            test: Expr::name("a"),
            body: vec![Stmt::new(StmtKind::Pass)],
            orelse: vec![Stmt::new(StmtKind::If {
                test: Expr::name("b"),
                body: vec![Stmt::new(StmtKind::Pass)],
                orelse: vec![Stmt::new(StmtKind::Break)],
            })],
        });
        assert_eq!(
            stmt.to_source(),
            "if a:\n    pass\nelif b:\n    pass\nelse:\n    break\n"
        );
    }
}
