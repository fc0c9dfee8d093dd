/// Tree-sitter grammar and language id resolution by file extension.
use std::path::Path;

use tree_sitter::Language;

use crate::error::Error;

/// Language ids the tree-sitter outline can produce symbols for.
pub const OUTLINE_LANGUAGES: &[&str] = &[
    "go",
    "javascript",
    "javascriptreact",
    "markdown",
    "python",
    "rust",
    "shellscript",
    "typescript",
    "typescriptreact",
];

/// Lowercase extension of `path`, or the empty string.
fn extension_of(path: &Path) -> &str {
    return path.extension().and_then(|e| return e.to_str()).unwrap_or("");
}

/// Map a file extension to an editor-style language id.
/// Unknown extensions map to `plaintext`.
pub fn language_id_for_path(path: &Path) -> &'static str {
    return match extension_of(path) {
        "go" => "go",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "md" | "markdown" => "markdown",
        "py" => "python",
        "rs" => "rust",
        "sh" | "bash" => "shellscript",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        _ => "plaintext",
    };
}

/// Map a file extension to its tree-sitter language.
///
/// # Errors
///
/// Returns `Error::UnsupportedLanguage` for unknown extensions.
pub fn language_for_path(path: &Path) -> Result<Language, Error> {
    let ext = extension_of(path);

    return match ext {
        "go" => Ok(tree_sitter_go::LANGUAGE.into()),
        "js" | "mjs" | "cjs" | "ts" | "mts" | "cts" => {
            Ok(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
        },
        "jsx" | "tsx" => Ok(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "md" | "markdown" => Ok(tree_sitter_md::LANGUAGE.into()),
        "py" => Ok(tree_sitter_python::LANGUAGE.into()),
        "rs" => Ok(tree_sitter_rust::LANGUAGE.into()),
        "sh" | "bash" => Ok(tree_sitter_bash::LANGUAGE.into()),
        _ => Err(Error::UnsupportedLanguage {
            ext: ext.to_string(),
        }),
    };
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{OUTLINE_LANGUAGES, language_for_path, language_id_for_path};

    #[test]
    fn every_outline_language_has_a_grammar() {
        for (file, id) in [
            ("a.go", "go"),
            ("a.js", "javascript"),
            ("a.jsx", "javascriptreact"),
            ("a.md", "markdown"),
            ("a.py", "python"),
            ("a.rs", "rust"),
            ("a.sh", "shellscript"),
            ("a.ts", "typescript"),
            ("a.tsx", "typescriptreact"),
        ] {
            let path = Path::new(file);
            assert_eq!(language_id_for_path(path), id, "language id for {file}");
            assert!(OUTLINE_LANGUAGES.contains(&id), "{id} missing from outline languages");
            assert!(language_for_path(path).is_ok(), "no grammar for {file}");
        }
    }

    #[test]
    fn unknown_extension_is_plaintext() {
        let path = Path::new("notes.txt");
        assert_eq!(language_id_for_path(path), "plaintext");
        assert!(language_for_path(path).is_err());
    }
}
