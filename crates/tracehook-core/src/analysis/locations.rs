// Source location backfilling for synthesized nodes

use crate::ast::visit::{walk_expr_mut, walk_handler_mut, walk_stmt_mut, VisitorMut};
use crate::ast::*;

/// Which part of a span [`copy_location`] copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    Span,
    Start,
    End,
}

/// Nodes carrying an optional location
pub trait Located {
    fn location(&self) -> Option<Location>;
    fn location_mut(&mut self) -> &mut Option<Location>;
}

macro_rules! impl_located {
    ($($ty:ty),*) => {
        $(impl Located for $ty {
            fn location(&self) -> Option<Location> {
                self.loc
            }

            fn location_mut(&mut self) -> &mut Option<Location> {
                &mut self.loc
            }
        })*
    };
}

impl_located!(Stmt, Expr, ExceptHandler, Alias, Param, Keyword);

/// Copy `src`'s location (or part of it) onto `dst`. A missing source
/// location leaves `dst` untouched.
pub fn copy_location<D: Located + ?Sized, S: Located + ?Sized>(dst: &mut D, src: &S, mode: CopyMode) {
    let Some(src) = src.location() else {
        return;
    };
    let current = dst.location();
    let target = dst.location_mut();
    *target = Some(match mode {
        CopyMode::Span => src,
        CopyMode::Start => {
            let base = current.unwrap_or(src);
            Location::new(src.line, src.col, base.end_line.max(src.line), base.end_col)
        }
        CopyMode::End => {
            let base = current.unwrap_or(src);
            Location::new(base.line, base.col, src.end_line, src.end_col)
        }
    });
}

struct Backfill {
    loc: Location,
}

impl Backfill {
    fn fill(&self, slot: &mut Option<Location>) {
        if slot.is_none() {
            *slot = Some(self.loc);
        }
    }
}

impl VisitorMut for Backfill {
    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        self.fill(&mut stmt.loc);
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        self.fill(&mut expr.loc);
        walk_expr_mut(self, expr);
    }

    fn visit_handler_mut(&mut self, handler: &mut ExceptHandler) {
        self.fill(&mut handler.loc);
        walk_handler_mut(self, handler);
    }

    fn visit_alias_mut(&mut self, alias: &mut Alias) {
        self.fill(&mut alias.loc);
    }

    fn visit_param_mut(&mut self, param: &mut Param) {
        self.fill(&mut param.loc);
        if let Some(default) = &mut param.default {
            self.visit_expr_mut(default);
        }
    }

    fn visit_keyword_mut(&mut self, keyword: &mut Keyword) {
        self.fill(&mut keyword.loc);
        self.visit_expr_mut(&mut keyword.value);
    }
}

/// Nodes [`propagate_missing_locations`] can run over
pub trait Backfillable {
    fn backfill(&mut self, visitor: &mut impl VisitorMut);
}

impl Backfillable for Module {
    fn backfill(&mut self, visitor: &mut impl VisitorMut) {
        self.body.backfill(visitor);
    }
}

impl Backfillable for Vec<Stmt> {
    fn backfill(&mut self, visitor: &mut impl VisitorMut) {
        for stmt in self {
            visitor.visit_stmt_mut(stmt);
        }
    }
}

impl Backfillable for Stmt {
    fn backfill(&mut self, visitor: &mut impl VisitorMut) {
        visitor.visit_stmt_mut(self);
    }
}

impl Backfillable for Expr {
    fn backfill(&mut self, visitor: &mut impl VisitorMut) {
        visitor.visit_expr_mut(self);
    }
}

/// Give every node lacking a location the supplied one. The end defaults to
/// the start when omitted.
pub fn propagate_missing_locations<N: Backfillable + ?Sized>(
    node: &mut N,
    line: u32,
    col: u32,
    end_line: Option<u32>,
    end_col: Option<u32>,
) {
    let loc = Location::new(line, col, end_line.unwrap_or(line), end_col.unwrap_or(col));
    node.backfill(&mut Backfill { loc });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_only_missing_locations() {
        let kept = Location::new(3, 4, 3, 9);
        let mut stmt = Stmt::new(StmtKind::Expr(Expr::call(
            Expr::at(ExprKind::Name("f".into()), kept),
            vec![Expr::name("x")],
            vec![Keyword::new("k", Expr::name("y"))],
        )));
        propagate_missing_locations(&mut stmt, 7, 2, None, None);

        assert_eq!(stmt.loc, Some(Location::new(7, 2, 7, 2)));
        match &stmt.kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Call {
                    func, args, keywords,
                },
                loc,
            }) => {
                assert_eq!(*loc, Some(Location::point(7, 2)));
                assert_eq!(func.loc, Some(kept));
                assert_eq!(args[0].loc, Some(Location::point(7, 2)));
                assert_eq!(keywords[0].loc, Some(Location::point(7, 2)));
                assert_eq!(keywords[0].value.loc, Some(Location::point(7, 2)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_explicit_end() {
        let mut expr = Expr::name("a");
        propagate_missing_locations(&mut expr, 1, 0, Some(4), Some(10));
        assert_eq!(expr.loc, Some(Location::new(1, 0, 4, 10)));
    }

    #[test]
    fn test_copy_location_modes() {
        let src = Expr::at(ExprKind::Name("s".into()), Location::new(2, 1, 5, 6));
        let mut dst = Expr::at(ExprKind::Name("d".into()), Location::new(1, 0, 1, 3));

        copy_location(&mut dst, &src, CopyMode::End);
        assert_eq!(dst.loc, Some(Location::new(1, 0, 5, 6)));

        copy_location(&mut dst, &src, CopyMode::Start);
        assert_eq!(dst.loc, Some(Location::new(2, 1, 5, 6)));

        let mut fresh = Stmt::new(StmtKind::Pass);
        copy_location(&mut fresh, &src, CopyMode::Span);
        assert_eq!(fresh.loc, Some(Location::new(2, 1, 5, 6)));
    }
}
