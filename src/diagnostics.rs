use std::fmt::Write as _;

use crate::error::{Error, ValidationKind};

/// ANSI bold, for headings on a terminal.
const BOLD: &str = "\x1b[1m";
/// ANSI reset.
const RESET: &str = "\x1b[0m";

/// Extensions with symbol outlines, appended to unsupported-language errors.
const SUPPORTED_EXTENSIONS: &str = "
## Supported extensions

- `.rs` (Rust)
- `.ts`, `.tsx`, `.mts`, `.cts` (TypeScript)
- `.js`, `.jsx`, `.mjs`, `.cjs` (JavaScript)
- `.py` (Python)
- `.go` (Go)
- `.sh`, `.bash` (shell)
- `.md` (Markdown sections)
";

/// Render an error as valid markdown with bold headings and print to stderr.
pub fn print_error(e: &Error) {
    let md = render_error(e);
    for line in md.lines() {
        if line.starts_with('#') {
            eprintln!("{BOLD}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
}

/// Render an error as a structured markdown diagnostic: what happened for
/// the user, the technical detail, and the recovery steps in order.
pub fn render_error(e: &Error) -> String {
    let mut out = format!("# Error: {}\n\n{}\n", title(e), e.user_message());

    let detail = e.to_string();
    if detail != e.user_message() {
        let _ = write!(out, "\n## Details\n\n    {detail}\n");
    }

    if let Error::UnsupportedLanguage { .. } = e {
        out.push_str(SUPPORTED_EXTENSIONS);
    }

    let steps = e.recovery_steps();
    if !steps.is_empty() {
        out.push_str("\n## Fix\n\n");
        for (n, step) in steps.iter().enumerate() {
            let _ = writeln!(out, "{}. {step}", n.saturating_add(1));
        }
    }
    if e.is_retryable() {
        out.push_str("\nThis failure may be transient.\n");
    }
    return out;
}

/// Heading for an error variant.
fn title(e: &Error) -> &'static str {
    return match e {
        Error::CommentNotFound { .. } => "Comment Not Found",
        Error::FileIo { .. } | Error::Io(_) => "File I/O",
        Error::GhostMarker { .. } => "Ghost Marker",
        Error::Migration { .. } => "Migration Failed",
        Error::SymbolQuery { .. } => "Symbol Query Failed",
        Error::TomlDe(_) => "Invalid Configuration",
        Error::UnsupportedLanguage { .. } => "Unsupported Language",
        Error::Validation { kind: ValidationKind::Integrity, .. } => "Corrupt Comment File",
        Error::Validation { .. } => "Invalid Comment File",
        Error::Watch { .. } => "Watch Failed",
    };
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::render_error;
    use crate::error::{Error, ValidationKind};

    #[test]
    fn validation_error_lists_numbered_recovery_steps() {
        let md = render_error(&Error::Validation {
            kind: ValidationKind::Json,
            path: PathBuf::from("src/a.js.comments"),
            reason: "expected value at line 1 column 1".to_string(),
        });
        assert!(md.starts_with("# Error: Invalid Comment File\n\nThe .comments file contains invalid data\n"));
        assert!(md.contains("## Details"));
        assert!(md.contains("expected value at line 1 column 1"));
        assert!(md.contains("2. Restore from backup with `ghostmark restore <file>`"));
        assert!(!md.contains("transient"));
    }

    #[test]
    fn unsupported_language_lists_extensions() {
        let md = render_error(&Error::UnsupportedLanguage { ext: "rb".to_string() });
        assert!(md.contains("## Supported extensions"));
        assert!(md.contains("`.py` (Python)"));
    }

    #[test]
    fn retryable_errors_say_so() {
        let md = render_error(&Error::SymbolQuery {
            file: PathBuf::from("a.ts"),
            reason: "parser timed out".to_string(),
            symbol_path: Some("Cart.add".to_string()),
        });
        assert!(md.contains("(Cart.add)"));
        assert!(md.contains("This failure may be transient."));
    }
}
