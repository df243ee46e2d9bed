// AST utilities used by the instrumentation passes: scope analysis, name
// collection, location backfilling and block wrapping.

pub mod locations;
pub mod names;
pub mod symtable;
pub mod wrap;

pub use locations::{copy_location, propagate_missing_locations, CopyMode, Located};
pub use names::{collect_referenced_names, Node};
pub use symtable::{build_scope_tree, walk_scopes, Binding, LocalScope, ScopeKind, SymbolScope};
pub use wrap::{wrap_as_callable, TracedUnit};

use std::collections::BTreeSet;

use crate::error::ParseError;
use crate::parser::parse_module;

/// Every identifier bound at module (global) scope anywhere in `source`,
/// including names nested functions declare `global`.
pub fn scope_global_names(source: &str, filename: &str) -> Result<BTreeSet<String>, ParseError> {
    let module = parse_module(source, filename)?;
    let root = build_scope_tree(&module, filename)?;
    let names = walk_scopes(&root)
        .flat_map(|scope| scope.symbols.values())
        .filter(|symbol| symbol.is_global())
        .map(|symbol| symbol.name.clone())
        .collect();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_global_names() {
        let source = "import os\nx = 1\ndef f(a):\n    global y\n    y = a\n    z = 2\n    return len(z)\n";
        let names = scope_global_names(source, "<test>").unwrap();
        for expected in ["os", "x", "f", "y", "len"] {
            assert!(names.contains(expected), "missing {expected}");
        }
        assert!(!names.contains("a"));
        assert!(!names.contains("z"));
    }

    #[test]
    fn test_scope_global_names_rejects_bad_source() {
        let err = scope_global_names("def f(:\n", "bad.py").unwrap_err();
        assert_eq!(err.filename, "bad.py");
    }
}
