//! Tree-sitter backed symbol outlines for the languages ghostmark ships grammars for.

use std::path::Path;

use tree_sitter::{Language, Node, Parser, Tree};

use crate::buffer::TextBuffer;
use crate::error::Error;
use crate::grammar;
use crate::symbols::{DocumentSymbol, LineRange, SymbolKind, SymbolProvider, SymbolTree};

/// Maximum source size outlined (16 MiB). Larger buffers get an empty outline.
const MAX_FILE_SIZE: usize = 16 * 1024 * 1024;

/// Grammar family, selecting which node kinds count as declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    /// Shell scripts.
    Bash,
    /// Go.
    Go,
    /// Markdown headings.
    Markdown,
    /// Python.
    Python,
    /// Rust.
    Rust,
    /// JavaScript and TypeScript, with or without JSX.
    Script,
}

impl Family {
    /// Family for a buffer path, `None` when no grammar is bundled.
    fn for_path(path: &Path) -> Option<Self> {
        return match grammar::language_id_for_path(path) {
            "go" => Some(Self::Go),
            "javascript" | "javascriptreact" | "typescript" | "typescriptreact" => Some(Self::Script),
            "markdown" => Some(Self::Markdown),
            "python" => Some(Self::Python),
            "rust" => Some(Self::Rust),
            "shellscript" => Some(Self::Bash),
            _ => None,
        };
    }
}

/// [`SymbolProvider`] that parses buffers with tree-sitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterOutline;

impl SymbolProvider for TreeSitterOutline {
    /// Parse the buffer and collect nested declarations.
    fn document_symbols(&self, buffer: &dyn TextBuffer) -> Result<SymbolTree, Error> {
        let path = buffer.path();
        let Some(family) = Family::for_path(path) else {
            let ext = path.extension().and_then(|e| return e.to_str()).unwrap_or("");
            return Err(Error::UnsupportedLanguage { ext: ext.to_string() });
        };
        let language = grammar::language_for_path(path)?;

        let source = buffer.contents();
        if source.len() > MAX_FILE_SIZE {
            log::warn!("{} exceeds {MAX_FILE_SIZE} bytes, skipping outline", path.display());
            return Ok(Vec::new());
        }

        let tree = parse_source(path, &source, &language)?;
        let mut symbols = Vec::new();
        collect_declarations(tree.root_node(), &source, family, false, &mut symbols);
        return Ok(symbols);
    }
}

/// Walk named children, turning declarations into symbols and looking
/// through everything else (export wrappers, bodies, decorators).
fn collect_declarations(
    node: Node<'_>,
    source: &str,
    family: Family,
    in_type: bool,
    out: &mut Vec<DocumentSymbol>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match (family, child.kind()) {
            (Family::Script, "lexical_declaration" | "variable_declaration") => {
                collect_script_bindings(child, source, out);
                continue;
            },
            (Family::Go, "type_declaration") => {
                collect_go_type_specs(child, source, out);
                continue;
            },
            _ => {},
        }

        let Some((kind, name)) = declaration_kind_and_name(child, source, family, in_type) else {
            collect_declarations(child, source, family, in_type, out);
            continue;
        };
        let opens_type = matches!(
            kind,
            SymbolKind::Class | SymbolKind::Impl | SymbolKind::Interface | SymbolKind::Trait
        );
        let mut children = Vec::new();
        collect_declarations(child, source, family, opens_type, &mut children);
        out.push(DocumentSymbol {
            children,
            kind,
            name,
            range: line_range(child),
        });
    }
}

/// Classify a node as a declaration and read its name.
fn declaration_kind_and_name(
    node: Node<'_>,
    source: &str,
    family: Family,
    in_type: bool,
) -> Option<(SymbolKind, String)> {
    let function_or_method = if in_type { SymbolKind::Method } else { SymbolKind::Function };
    let kind = match (family, node.kind()) {
        (Family::Markdown, "section") => {
            return section_slug(node, source).map(|slug| return (SymbolKind::Section, slug));
        },
        // Impl blocks are named after the implementing type.
        (Family::Rust, "impl_item") => {
            let type_node = node.child_by_field_name("type")?;
            return Some((SymbolKind::Impl, node_text(type_node, source)?));
        },
        (Family::Bash, "function_definition")
        | (Family::Go, "function_declaration")
        | (Family::Script, "function_declaration" | "generator_function_declaration") => {
            SymbolKind::Function
        },
        (Family::Go, "method_declaration")
        | (Family::Script, "method_definition" | "method_signature" | "abstract_method_signature") => {
            SymbolKind::Method
        },
        (Family::Python, "function_definition")
        | (Family::Rust, "function_item" | "function_signature_item") => function_or_method,
        (Family::Python, "class_definition")
        | (Family::Script, "class_declaration" | "abstract_class_declaration" | "class") => {
            SymbolKind::Class
        },
        (Family::Rust, "const_item" | "static_item") => SymbolKind::Constant,
        (Family::Rust, "enum_item") | (Family::Script, "enum_declaration") => SymbolKind::Enum,
        (Family::Rust, "mod_item") | (Family::Script, "internal_module" | "module") => {
            SymbolKind::Module
        },
        (Family::Rust, "struct_item") => SymbolKind::Struct,
        (Family::Rust, "trait_item") => SymbolKind::Trait,
        (Family::Rust, "type_item") | (Family::Script, "type_alias_declaration") => {
            SymbolKind::TypeAlias
        },
        (Family::Script, "interface_declaration") => SymbolKind::Interface,
        _ => return None,
    };

    let name = node_text(node.child_by_field_name("name")?, source)?;
    return Some((kind, name));
}

/// Go `type X struct {...}` and friends: one symbol per `type_spec`.
fn collect_go_type_specs(node: Node<'_>, source: &str, out: &mut Vec<DocumentSymbol>) {
    let mut cursor = node.walk();
    for spec in node.named_children(&mut cursor) {
        if !matches!(spec.kind(), "type_spec" | "type_alias") {
            continue;
        }
        let Some(name) = spec.child_by_field_name("name").and_then(|n| return node_text(n, source)) else {
            continue;
        };
        let kind = match spec.child_by_field_name("type").map(|t| return t.kind()) {
            Some("struct_type") => SymbolKind::Struct,
            Some("interface_type") => SymbolKind::Interface,
            _ => SymbolKind::TypeAlias,
        };
        out.push(DocumentSymbol {
            children: Vec::new(),
            kind,
            name,
            range: line_range(spec),
        });
    }
}

/// `const`/`let`/`var` bindings. Each declarator becomes a symbol spanning the
/// whole statement; function and class values keep their nested declarations.
fn collect_script_bindings(declaration: Node<'_>, source: &str, out: &mut Vec<DocumentSymbol>) {
    let mut cursor = declaration.walk();
    for declarator in declaration.named_children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        // Destructuring patterns have no single name.
        if name_node.kind() != "identifier" {
            continue;
        }
        let Some(name) = node_text(name_node, source) else {
            continue;
        };

        let value = declarator.child_by_field_name("value");
        let kind = match value.map(|v| return v.kind()) {
            Some("arrow_function" | "function_expression" | "function" | "generator_function") => {
                SymbolKind::Function
            },
            Some("class") => SymbolKind::Class,
            _ => SymbolKind::Variable,
        };
        let mut children = Vec::new();
        if let Some(value) = value {
            collect_declarations(value, source, Family::Script, kind == SymbolKind::Class, &mut children);
        }
        out.push(DocumentSymbol {
            children,
            kind,
            name,
            range: line_range(declaration),
        });
    }
}

/// Raw heading text: the inline content after the `#` marker.
fn heading_text(heading: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = heading.walk();
    for child in heading.children(&mut cursor) {
        if child.kind() == "heading_content" || child.kind() == "inline" {
            return node_text(child, source);
        }
    }
    let text = heading.utf8_text(source.as_bytes()).ok()?;
    return Some(text.trim_start_matches('#').trim().to_string());
}

/// Inclusive 1-based span of a node. A node that ends at column 0 (a trailing
/// newline) does not claim the following line.
fn line_range(node: Node<'_>) -> LineRange {
    let start_row = node.start_position().row;
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start_row {
        end.row.saturating_sub(1)
    } else {
        end.row
    };
    return LineRange {
        end: row_to_line(end_row),
        start: row_to_line(start_row),
    };
}

/// UTF-8 text of a node.
fn node_text(node: Node<'_>, source: &str) -> Option<String> {
    return node.utf8_text(source.as_bytes()).ok().map(String::from);
}

/// Parse source into a tree-sitter tree.
///
/// # Errors
///
/// Returns `Error::SymbolQuery` if the language cannot be set or parsing fails.
fn parse_source(path: &Path, source: &str, language: &Language) -> Result<Tree, Error> {
    let mut parser = Parser::new();
    parser.set_language(language).map_err(|e| return Error::SymbolQuery {
        file: path.to_path_buf(),
        reason: e.to_string(),
        symbol_path: None,
    })?;

    return parser.parse(source, None).ok_or_else(|| return Error::SymbolQuery {
        file: path.to_path_buf(),
        reason: "tree-sitter returned no tree".to_string(),
        symbol_path: None,
    });
}

/// 0-based tree-sitter row to 1-based line.
fn row_to_line(row: usize) -> u32 {
    return u32::try_from(row).unwrap_or(u32::MAX).saturating_add(1);
}

/// Slug of a markdown section's heading, `None` for headingless sections.
fn section_slug(section: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = section.walk();
    let heading = section
        .children(&mut cursor)
        .find(|c| return c.kind() == "atx_heading")?;
    let slug = slugify(&heading_text(heading, source)?);
    if slug.is_empty() {
        return None;
    }
    return Some(slug);
}

/// Convert heading text to a URL-compatible slug.
/// Lowercase, spaces/non-alphanumeric to hyphens, collapse runs, trim edges.
fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut result = String::with_capacity(lowered.len());
    let mut prev_hyphen = true; // Start true to trim leading hyphens.

    for c in lowered.chars() {
        if c.is_alphanumeric() {
            result.push(c);
            prev_hyphen = false;
            continue;
        }
        if prev_hyphen {
            continue;
        }
        result.push('-');
        prev_hyphen = true;
    }

    if result.ends_with('-') {
        result.pop();
    }
    return result;
}
