// Wrapping a statement block into a zero-argument callable

use std::collections::BTreeSet;

use super::locations::{copy_location, propagate_missing_locations, CopyMode};
use super::names::collect_referenced_names;
use crate::ast::*;

/// A block rewritten as a function definition plus the call that runs it
#[derive(Debug, Clone, PartialEq)]
pub struct TracedUnit {
    /// Module holding just the synthesized definition
    pub def_unit: Module,
    pub call: Expr,
    /// Every identifier referenced by the original block
    pub names: BTreeSet<String>,
}

/// Copy `body` into a fresh `def name(): ...` and build the expression that
/// calls it.
///
/// The definition starts with one `global`/`nonlocal` statement naming
/// `names` in sorted order (by default every name the block references),
/// so assignments inside the callable still land where they would have
/// without the wrapper. A trailing expression statement becomes a `return`.
/// `body` itself is never modified.
pub fn wrap_as_callable(
    name: &str,
    body: &[Stmt],
    kind: DeclarationKind,
    names: Option<&BTreeSet<String>>,
) -> (Stmt, Expr) {
    let names = match names {
        Some(names) => names.clone(),
        None => collect_referenced_names(body),
    };

    let start = body
        .first()
        .and_then(|stmt| stmt.loc)
        .map(|loc| (loc.line, loc.col))
        .unwrap_or((1, 0));
    let last_expr = match body.last() {
        Some(stmt @ Stmt {
            kind: StmtKind::Expr(_),
            ..
        }) => Some(stmt),
        _ => None,
    };
    let end = last_expr
        .and_then(|stmt| stmt.loc)
        .map(|loc| (loc.end_line, loc.end_col))
        .unwrap_or(start);

    let mut new_body = Vec::with_capacity(body.len() + 1);
    if !names.is_empty() {
        new_body.push(Stmt::declaration(kind, names.into_iter().collect()));
    }
    new_body.extend_from_slice(body);

    if let Some(last) = new_body.last_mut() {
        if let StmtKind::Expr(value) = &last.kind {
            let mut ret = Stmt::new(StmtKind::Return(Some(value.clone())));
            copy_location(&mut ret, &*last, CopyMode::Span);
            *last = ret;
        }
    }

    let mut def = Stmt::at(
        StmtKind::FunctionDef(FunctionDef {
            name: name.to_string(),
            params: Parameters::default(),
            body: new_body,
            decorators: Vec::new(),
        }),
        Location::new(start.0, start.1, end.0, end.1),
    );
    propagate_missing_locations(&mut def, start.0, start.1, Some(end.0), Some(end.1));

    let mut call = Expr::call(Expr::name(name), Vec::new(), Vec::new());
    if let Some(last) = last_expr {
        if let Some(loc) = last.loc {
            call.loc = Some(loc);
        }
    }
    propagate_missing_locations(&mut call, start.0, start.1, Some(end.0), Some(end.1));

    (def, call)
}
