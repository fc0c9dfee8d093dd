//! Line-indexed text access consumed by the anchoring core.

use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};

use crate::error::{Error, IoOperation};
use crate::grammar;

/// A source buffer the core can read line by line.
///
/// Lines are 1-based. `version` must change whenever the content changes so
/// cached symbol outlines keyed on it are invalidated.
pub trait TextBuffer {
    /// Full text, lines joined with `\n`.
    fn contents(&self) -> String {
        let count = self.line_count();
        let mut out = String::new();
        for line in 1..=count {
            if line > 1 {
                out.push('\n');
            }
            out.push_str(self.line_at(line).unwrap_or_default());
        }
        return out;
    }
    /// Editor-style language id such as `typescript` or `rust`.
    fn language_id(&self) -> &str;
    /// Text of a 1-based line, `None` when out of bounds.
    fn line_at(&self, line: u32) -> Option<&str>;
    /// Number of lines in the buffer.
    fn line_count(&self) -> u32;
    /// Identity of the buffer (source file path).
    fn path(&self) -> &Path;
    /// Content version; differs whenever the text differs.
    fn version(&self) -> u64;
}

/// An in-memory snapshot of a source file.
#[derive(Debug, Clone)]
pub struct SourceText {
    /// Language id derived from the path.
    language_id: String,
    /// Lines without terminators.
    lines: Vec<String>,
    /// Source file path.
    path: PathBuf,
    /// Digest-derived content version.
    version: u64,
}

impl SourceText {
    /// Wrap text already in memory. The language id comes from the extension.
    pub fn new(path: impl Into<PathBuf>, text: &str) -> Self {
        let path = path.into();
        return Self {
            language_id: grammar::language_id_for_path(&path).to_string(),
            lines: split_lines(text),
            path,
            version: content_version(text),
        };
    }

    /// Load a source file from disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileIo` with `IoOperation::Read` if the file cannot be read.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| return Error::FileIo {
            operation: IoOperation::Read,
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(Self::new(path, &text));
    }

    /// Swap in new content.
    pub fn replace_text(&mut self, text: &str) {
        self.lines = split_lines(text);
        self.version = content_version(text);
    }
}

impl TextBuffer for SourceText {
    /// Language id derived from the path.
    fn language_id(&self) -> &str {
        return &self.language_id;
    }

    /// Line text or `None` outside `1..=line_count`.
    fn line_at(&self, line: u32) -> Option<&str> {
        let index = usize::try_from(line.checked_sub(1)?).ok()?;
        return self.lines.get(index).map(String::as_str);
    }

    /// Number of lines.
    fn line_count(&self) -> u32 {
        return u32::try_from(self.lines.len()).unwrap_or(u32::MAX);
    }

    /// Source file path.
    fn path(&self) -> &Path {
        return &self.path;
    }

    /// Content version.
    fn version(&self) -> u64 {
        return self.version;
    }
}

/// First eight bytes of the SHA-256 of `text`. Two buffers loaded from the
/// same path with different content never share a version.
fn content_version(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let prefix: Option<[u8; 8]> = digest.get(..8).and_then(|b| return b.try_into().ok());
    return prefix.map_or(0, u64::from_be_bytes);
}

/// Split into lines without terminators. A trailing newline does not add a line.
fn split_lines(text: &str) -> Vec<String> {
    return text.lines().map(String::from).collect();
}
