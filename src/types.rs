//! Core domain types: comments, ghost markers, anchors, and comment files.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::symbols::SymbolKind;

/// Provenance of an AI-authored or AI-enriched comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiMetadata {
    /// Model confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// When the metadata was attached.
    pub enriched_at: DateTime<Utc>,
    /// Model identifier.
    pub model: String,
    /// Free-form explanation from the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Semantic anchor: where a line sits inside the symbol tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AstAnchor {
    /// Name of the directly enclosing symbol of the target, if any.
    pub container_name: Option<String>,
    /// Lines between the symbol's first line and the anchored line.
    pub offset: u32,
    /// Kind of the innermost symbol.
    pub symbol_kind: SymbolKind,
    /// Names from the outermost symbol down to the innermost one.
    pub symbol_path: Vec<String>,
}

impl AstAnchor {
    /// Dotted form of the path, e.g. `ShoppingCart.addItem`.
    pub fn dotted_path(&self) -> String {
        return self.symbol_path.join(".");
    }
}

/// One annotation. Identity is `id`, stable for the comment's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// AI provenance, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_meta: Option<AiMetadata>,
    /// Who wrote it.
    pub author: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Opaque unique id.
    pub id: String,
    /// Threaded replies, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<CommentReply>,
    /// When the comment was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved the comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// Workflow state; absent means open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CommentStatus>,
    /// Category tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<CommentTag>,
    /// Body.
    pub text: String,
    /// Last edit time.
    pub updated: DateTime<Utc>,
}

/// Per-source-file container of comments and the markers that place them.
///
/// Every comment belongs to exactly one marker and every marker references
/// at least one live comment; see [`CommentFile::check_integrity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentFile {
    /// Annotations, in creation order.
    pub comments: Vec<Comment>,
    /// Source path the comments belong to, relative to the workspace.
    #[serde(alias = "file")]
    pub file_path: String,
    /// Position records.
    #[serde(default)]
    pub ghost_markers: Vec<GhostMarker>,
    /// Sync bookkeeping.
    #[serde(default)]
    pub metadata: FileMetadata,
    /// Schema version.
    pub version: String,
}

impl CommentFile {
    /// Verify the comment/marker cross references.
    ///
    /// # Errors
    ///
    /// Returns a description of the first broken invariant.
    pub fn check_integrity(&self) -> Result<(), String> {
        let mut comment_ids = HashSet::new();
        for comment in &self.comments {
            if !comment_ids.insert(comment.id.as_str()) {
                return Err(format!("duplicate comment id `{}`", comment.id));
            }
        }

        let mut marker_ids = HashSet::new();
        let mut placed = HashSet::new();
        for marker in &self.ghost_markers {
            if !marker_ids.insert(marker.id.as_str()) {
                return Err(format!("duplicate ghost marker id `{}`", marker.id));
            }
            if marker.comment_ids.is_empty() {
                return Err(format!("ghost marker `{}` has no comments", marker.id));
            }
            if marker.line == 0 {
                return Err(format!("ghost marker `{}` has line 0", marker.id));
            }
            for id in &marker.comment_ids {
                if !comment_ids.contains(id.as_str()) {
                    return Err(format!("ghost marker `{}` references missing comment `{id}`", marker.id));
                }
                if !placed.insert(id.as_str()) {
                    return Err(format!("comment `{id}` is placed by more than one ghost marker"));
                }
            }
        }

        if let Some(unplaced) = self.comments.iter().find(|c| return !placed.contains(c.id.as_str())) {
            return Err(format!("comment `{}` has no ghost marker", unplaced.id));
        }
        return Ok(());
    }

    /// Comment by id.
    pub fn comment(&self, id: &str) -> Option<&Comment> {
        return self.comments.iter().find(|c| return c.id == id);
    }

    /// Mutable comment by id.
    pub fn comment_mut(&mut self, id: &str) -> Option<&mut Comment> {
        return self.comments.iter_mut().find(|c| return c.id == id);
    }

    /// A file with no comments yet.
    pub fn empty(file_path: &str, version: &str, now: DateTime<Utc>) -> Self {
        return Self {
            comments: Vec::new(),
            file_path: file_path.to_string(),
            ghost_markers: Vec::new(),
            metadata: FileMetadata {
                last_sync: now,
                total_comments: 0,
            },
            version: version.to_string(),
        };
    }

    /// Marker by id.
    pub fn marker(&self, id: &str) -> Option<&GhostMarker> {
        return self.ghost_markers.iter().find(|m| return m.id == id);
    }

    /// Marker that places the given comment.
    pub fn marker_for_comment(&self, comment_id: &str) -> Option<&GhostMarker> {
        return self
            .ghost_markers
            .iter()
            .find(|m| return m.comment_ids.iter().any(|id| return id == comment_id));
    }

    /// Mutable marker that places the given comment.
    pub fn marker_for_comment_mut(&mut self, comment_id: &str) -> Option<&mut GhostMarker> {
        return self
            .ghost_markers
            .iter_mut()
            .find(|m| return m.comment_ids.iter().any(|id| return id == comment_id));
    }

    /// Refresh the metadata after a mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.last_sync = now;
        self.metadata.total_comments = self.comments.len();
    }
}

/// A reply in a comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentReply {
    /// Who wrote it.
    pub author: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Opaque unique id.
    pub id: String,
    /// Body.
    pub text: String,
}

/// Workflow state of a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    /// Still relevant.
    Open,
    /// Addressed.
    Resolved,
    /// Deliberately left as-is.
    Wontfix,
}

/// Category tag shown next to a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommentTag {
    /// Known defect.
    Fixme,
    /// Deliberate shortcut.
    Hack,
    /// Informational.
    Note,
    /// Open question.
    Question,
    /// Bookmarked or significant.
    Star,
    /// Pending work.
    Todo,
    /// Caution.
    Warning,
}

impl CommentTag {
    /// Infer a tag from the leading word of a comment body
    /// (`TODO:`, `fixme `, `?`, `WARN:`, `⭐`, ...).
    pub fn detect(text: &str) -> Option<Self> {
        let upper = text.trim().to_uppercase();
        let leads = |word: &str| -> bool {
            return upper
                .strip_prefix(word)
                .is_some_and(|rest| return rest.starts_with(':') || rest.starts_with(' '));
        };

        if leads("TODO") {
            return Some(Self::Todo);
        }
        if leads("FIXME") {
            return Some(Self::Fixme);
        }
        if leads("NOTE") {
            return Some(Self::Note);
        }
        if leads("QUESTION") || upper.starts_with('?') {
            return Some(Self::Question);
        }
        if leads("HACK") {
            return Some(Self::Hack);
        }
        if leads("WARNING") || upper.starts_with("WARN:") {
            return Some(Self::Warning);
        }
        if leads("STAR") || upper.starts_with('⭐') {
            return Some(Self::Star);
        }
        return None;
    }

    /// Parse a tag name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        return match name.to_uppercase().as_str() {
            "FIXME" => Some(Self::Fixme),
            "HACK" => Some(Self::Hack),
            "NOTE" => Some(Self::Note),
            "QUESTION" => Some(Self::Question),
            "STAR" => Some(Self::Star),
            "TODO" => Some(Self::Todo),
            "WARNING" => Some(Self::Warning),
            _ => None,
        };
    }
}

/// Sync bookkeeping for a comment file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Last time the file was mutated or reconciled.
    pub last_sync: DateTime<Utc>,
    /// Number of comments at `last_sync`.
    pub total_comments: usize,
}

/// The tracked position of one or more comments.
///
/// `line` is a cache of the last successful resolution; the anchors
/// (`ast_anchor`, `line_hash`, the three-line fingerprint) are authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostMarker {
    /// Semantic anchor, `None` when unsupported or outside any symbol.
    #[serde(default)]
    pub ast_anchor: Option<AstAnchor>,
    /// Comments placed by this marker.
    pub comment_ids: Vec<String>,
    /// Last line of a range comment, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    /// Opaque unique id.
    pub id: String,
    /// Set when no anchoring strategy could re-find the code.
    #[serde(default)]
    pub is_orphaned: bool,
    /// Last reconciliation time.
    pub last_verified: DateTime<Utc>,
    /// First anchored line, 1-based.
    pub line: u32,
    /// Hash of the anchored line or range.
    pub line_hash: LineHash,
    /// Trimmed text of the first anchored line.
    pub line_text: String,
    /// Trimmed text of the line after, empty at end of file.
    #[serde(default)]
    pub next_line_text: String,
    /// Trimmed text of the line before, empty at start of file.
    #[serde(default)]
    pub prev_line_text: String,
}

impl GhostMarker {
    /// Number of extra lines a range covers below `line`.
    pub fn span(&self) -> u32 {
        return self.end_line.map_or(0, |end| return end.saturating_sub(self.line));
    }
}

/// A 16-hex-char truncated SHA-256 of normalized line content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineHash(
    /// Lowercase hex digest prefix.
    pub String,
);

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{CommentFile, CommentTag};

    #[test]
    fn detects_tags_from_prefix() {
        assert_eq!(CommentTag::detect("TODO: wire this up"), Some(CommentTag::Todo));
        assert_eq!(CommentTag::detect("  fixme later"), Some(CommentTag::Fixme));
        assert_eq!(CommentTag::detect("? why is this here"), Some(CommentTag::Question));
        assert_eq!(CommentTag::detect("warn: slow path"), Some(CommentTag::Warning));
        assert_eq!(CommentTag::detect("⭐ key invariant"), Some(CommentTag::Star));
        assert_eq!(CommentTag::detect("TODOLIST is not a tag"), None);
        assert_eq!(CommentTag::detect("plain note"), None);
    }

    #[test]
    fn legacy_file_key_is_accepted() {
        let json = r#"{"version":"2.1.0","file":"src/a.js","comments":[]}"#;
        let parsed: CommentFile = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.file_path, "src/a.js");
        assert!(parsed.ghost_markers.is_empty());
    }

    #[test]
    fn empty_file_passes_integrity() {
        let file = CommentFile::empty("a.js", "2.1.0", Utc::now());
        assert!(file.check_integrity().is_ok());
    }
}
