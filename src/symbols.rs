//! Symbol outline interface supplied by an external provider.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::buffer::TextBuffer;
use crate::error::Error;

/// Outline of named symbols in a buffer, roots first.
pub type SymbolTree = Vec<DocumentSymbol>;

/// One named symbol and its nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSymbol {
    /// Symbols declared inside this one.
    pub children: Vec<DocumentSymbol>,
    /// What sort of declaration this is.
    pub kind: SymbolKind,
    /// Declared name.
    pub name: String,
    /// Lines the declaration spans.
    pub range: LineRange,
}

/// Inclusive, 1-based line span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    /// Last line, inclusive.
    pub end: u32,
    /// First line.
    pub start: u32,
}

impl LineRange {
    /// Whether `line` falls inside the span.
    pub const fn contains(self, line: u32) -> bool {
        return self.start <= line && line <= self.end;
    }
}

/// Declaration category recorded in AST anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    /// `class` declarations.
    Class,
    /// `const` items.
    Constant,
    /// Enumerations.
    Enum,
    /// Free functions.
    Function,
    /// Rust `impl` blocks.
    Impl,
    /// Interfaces.
    Interface,
    /// Functions declared on a type.
    Method,
    /// Modules and namespaces.
    Module,
    /// Markdown headings.
    Section,
    /// Structs.
    Struct,
    /// Traits.
    Trait,
    /// Type aliases.
    TypeAlias,
    /// Variable bindings.
    Variable,
}

/// Source of symbol outlines.
///
/// The core never parses code itself; anything that can list declarations
/// with line spans (a language server, tree-sitter, a heuristic) can back it.
pub trait SymbolProvider {
    /// Outline of `buffer`. An empty tree is a valid answer.
    ///
    /// # Errors
    ///
    /// Returns `Error::SymbolQuery` if the outline cannot be produced yet.
    fn document_symbols(&self, buffer: &dyn TextBuffer) -> Result<SymbolTree, Error>;
}

/// Render a tree as indented `kind name start-end` lines.
pub fn render_tree(tree: &[DocumentSymbol]) -> String {
    let mut out = String::new();
    render_level(tree, 0, &mut out);
    return out;
}

/// Append one nesting level to `out`.
fn render_level(symbols: &[DocumentSymbol], depth: usize, out: &mut String) {
    for symbol in symbols {
        out.push_str(&"  ".repeat(depth));
        let _ = writeln!(
            out,
            "{:?} {} {}-{}",
            symbol.kind, symbol.name, symbol.range.start, symbol.range.end
        );
        render_level(&symbol.children, depth.saturating_add(1), out);
    }
}

#[cfg(test)]
mod tests {
    use super::{DocumentSymbol, LineRange, SymbolKind, render_tree};

    #[test]
    fn range_is_inclusive() {
        let range = LineRange { end: 5, start: 2 };
        assert!(range.contains(2));
        assert!(range.contains(5));
        assert!(!range.contains(1));
        assert!(!range.contains(6));
    }

    #[test]
    fn render_indents_children() {
        let tree = vec![DocumentSymbol {
            children: vec![DocumentSymbol {
                children: Vec::new(),
                kind: SymbolKind::Method,
                name: "foo".to_string(),
                range: LineRange { end: 3, start: 2 },
            }],
            kind: SymbolKind::Class,
            name: "C".to_string(),
            range: LineRange { end: 4, start: 1 },
        }];
        assert_eq!(render_tree(&tree), "Class C 1-4\n  Method foo 2-3\n");
    }
}
