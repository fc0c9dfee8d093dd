/// Crate-level error taxonomy for ghostmark.
use std::fmt;
use std::path::PathBuf;

/// Filesystem operation that failed on a comment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    /// Copying the previous file aside before a write.
    Backup,
    /// Removing a comment file or backup.
    Delete,
    /// Decoding file content after it was read.
    Parse,
    /// Reading file content.
    Read,
    /// Writing file content.
    Write,
}

impl IoOperation {
    /// Lowercase verb used in messages.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::Backup => "backup",
            Self::Delete => "delete",
            Self::Parse => "parse",
            Self::Read => "read",
            Self::Write => "write",
        };
    }
}

impl fmt::Display for IoOperation {
    /// Write the lowercase verb.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

/// What went wrong with a ghost marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerErrorKind {
    /// Two markers claim the same id or the same comment.
    Duplicate,
    /// No marker with the requested id.
    NotFound,
    /// The marker could not be re-anchored by any strategy.
    Orphaned,
    /// The marker could not be saved.
    Persistence,
    /// The marker's position bookkeeping is inconsistent.
    Tracking,
}

impl MarkerErrorKind {
    /// Snake-case tag used in messages.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::Duplicate => "duplicate",
            Self::NotFound => "not_found",
            Self::Orphaned => "orphaned",
            Self::Persistence => "persistence",
            Self::Tracking => "tracking",
        };
    }
}

impl fmt::Display for MarkerErrorKind {
    /// Write the snake-case tag.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

/// Which layer of validation rejected a comment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Comment/marker cross references are broken.
    Integrity,
    /// Not syntactically valid JSON.
    Json,
    /// Valid JSON with missing or mistyped fields.
    Schema,
}

impl ValidationKind {
    /// Lowercase tag used in messages.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::Integrity => "integrity",
            Self::Json => "json",
            Self::Schema => "schema",
        };
    }
}

impl fmt::Display for ValidationKind {
    /// Write the lowercase tag.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

/// All errors in ghostmark carry the file, marker, or symbol they concern,
/// plus a user-facing message and recovery steps separate from `Display`.
#[allow(clippy::error_impl_error, reason = "crate-wide error type")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No comment with this id in the comment file.
    #[error("comment not found: `{id}` in {}", file.display())]
    CommentNotFound {
        /// Source file whose comments were searched.
        file: PathBuf,
        /// Comment id that was requested.
        id: String,
    },

    /// A filesystem operation on a comment file failed.
    #[error("failed to {operation} {}: {source}", path.display())]
    FileIo {
        /// Which operation failed.
        operation: IoOperation,
        /// File the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A ghost marker is missing, duplicated, or cannot be tracked.
    #[error("ghost marker {kind}: {reason}")]
    GhostMarker {
        /// Failure category.
        kind: MarkerErrorKind,
        /// Line the marker was last seen on, when known.
        line: Option<u32>,
        /// Marker id, when known.
        marker_id: Option<String>,
        /// Technical description.
        reason: String,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// A comment file uses a schema version this build cannot upgrade.
    #[error("cannot migrate comment file {} from {from} to {to}: {reason}", path.display())]
    Migration {
        /// Version found in the file.
        from: String,
        /// Comment file being migrated.
        path: PathBuf,
        /// Why the upgrade is impossible.
        reason: String,
        /// Version this build writes.
        to: String,
    },

    /// The symbol provider failed to produce an outline.
    #[error("symbol query failed for {}{}: {reason}", file.display(), symbol_path.as_deref().map(|p| return format!(" ({p})")).unwrap_or_default())]
    SymbolQuery {
        /// Buffer that was queried.
        file: PathBuf,
        /// Description of the failure.
        reason: String,
        /// Dotted symbol path being resolved, if any.
        symbol_path: Option<String>,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// No tree-sitter grammar registered for this file extension.
    #[error("no grammar for extension: .{ext}")]
    UnsupportedLanguage {
        /// File extension without the leading dot.
        ext: String,
    },

    /// A comment file failed validation.
    #[error("invalid comment file {} ({kind}): {reason}", path.display())]
    Validation {
        /// Which validation layer rejected the file.
        kind: ValidationKind,
        /// Comment file that was rejected.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The filesystem watcher could not be set up.
    #[error("watch: {reason}")]
    Watch {
        /// Description of the failure.
        reason: String,
    },
}

impl Error {
    /// Whether retrying the failed operation could succeed.
    ///
    /// Structural failures (validation, migration) never heal on their own.
    /// Missing files and permission problems are not transient either.
    pub fn is_retryable(&self) -> bool {
        return match self {
            Self::FileIo { source, .. } | Self::Io(source) => !matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            Self::SymbolQuery { .. } | Self::Watch { .. } => true,
            Self::CommentNotFound { .. }
            | Self::GhostMarker { .. }
            | Self::Migration { .. }
            | Self::TomlDe(_)
            | Self::UnsupportedLanguage { .. }
            | Self::Validation { .. } => false,
        };
    }

    /// Steps a user can take to recover, in the order they should try them.
    pub fn recovery_steps(&self) -> Vec<String> {
        let steps: &[&str] = match self {
            Self::CommentNotFound { .. } => &[
                "List the file's comments with `ghostmark status <file>`",
                "Check that the comment was not already deleted or moved",
            ],
            Self::FileIo { .. } | Self::Io(_) => &[
                "Check that the file exists and is accessible",
                "Verify file permissions",
                "Retry the command",
            ],
            Self::GhostMarker { .. } => &[
                "Reload the .comments file",
                "Run `ghostmark reconcile` to re-anchor markers",
                "If the issue persists, report it with the error details",
            ],
            Self::Migration { .. } => &[
                "Create a backup of the .comments file",
                "Fix the file structure by hand",
                "Report the issue with the file contents",
            ],
            Self::SymbolQuery { .. } => &[
                "Ensure the file is saved",
                "Check the code for syntax errors",
                "Retry once the file parses cleanly",
            ],
            Self::TomlDe(_) => &["Fix the syntax error in .ghostmark.toml"],
            Self::UnsupportedLanguage { .. } => &[
                "Comments still anchor by content hash in this file",
                "Symbol anchors need one of: .rs .ts .tsx .js .jsx .py .go .sh .md",
            ],
            Self::Validation { .. } => &[
                "Check the .comments file for syntax errors",
                "Restore from backup with `ghostmark restore <file>`",
                "Delete the .comments file to start fresh (existing comments are lost)",
            ],
            Self::Watch { .. } => &[
                "Check the system's file watch limits",
                "Run `ghostmark reconcile` manually instead",
            ],
        };
        return steps.iter().map(|s| return (*s).to_string()).collect();
    }

    /// Short explanation suitable for showing to a user.
    pub fn user_message(&self) -> String {
        return match self {
            Self::CommentNotFound { file, id } => {
                format!("Comment `{id}` does not exist in {}", file.display())
            },
            Self::FileIo { operation, path, .. } => {
                format!("Failed to {operation} file: {}", path.display())
            },
            Self::GhostMarker { kind, line, .. } => match (kind, line) {
                (MarkerErrorKind::NotFound, _) => "Comment position marker not found".to_string(),
                (MarkerErrorKind::Orphaned, Some(line)) => {
                    format!("Comment near line {line} lost its code location")
                },
                _ => "Comment position tracking error".to_string(),
            },
            Self::Io(e) => format!("File system error: {e}"),
            Self::Migration { from, to, .. } => {
                format!("Failed to upgrade comment file from version {from} to {to}")
            },
            Self::SymbolQuery { .. } => "Failed to analyze code structure".to_string(),
            Self::TomlDe(_) => "The .ghostmark.toml configuration is invalid".to_string(),
            Self::UnsupportedLanguage { ext } => {
                format!("Symbol anchoring is not available for .{ext} files")
            },
            Self::Validation { .. } => "The .comments file contains invalid data".to_string(),
            Self::Watch { .. } => "Could not watch the workspace for changes".to_string(),
        };
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Error, IoOperation, ValidationKind};

    #[test]
    fn validation_is_not_retryable() {
        let err = Error::Validation {
            kind: ValidationKind::Json,
            path: PathBuf::from("a.js.comments"),
            reason: "eof".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_found_io_is_not_retryable() {
        let err = Error::FileIo {
            operation: IoOperation::Read,
            path: PathBuf::from("gone"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn interrupted_io_is_retryable() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::Interrupted));
        assert!(err.is_retryable());
    }

    #[test]
    fn user_message_differs_from_technical() {
        let err = Error::FileIo {
            operation: IoOperation::Write,
            path: PathBuf::from("a.js.comments"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.user_message(), "Failed to write file: a.js.comments");
        assert!(err.to_string().contains("disk full"));
        assert_eq!(err.recovery_steps().len(), 3);
    }
}
