//! Orphaned comments: markers reconciliation could not place, gathered per
//! file and across a workspace.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::buffer::SourceText;
use crate::comments::CommentService;
use crate::error::Error;
use crate::store::{is_comment_file, source_for_comment_path};
use crate::types::CommentFile;

/// Directories never searched for comment files.
pub(crate) const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Orphans of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOrphans {
    /// Lost markers.
    pub orphans: Vec<Orphan>,
    /// Source file, relative to the scanned root when scanned.
    pub source: PathBuf,
    /// Markers in the file, lost or not.
    pub total_markers: usize,
}

/// One marker that lost its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Orphan {
    /// Comments riding on the marker.
    pub comment_ids: Vec<String>,
    /// Line the marker was last placed on.
    pub last_known_line: u32,
    /// Text that line had.
    pub line_text: String,
    /// Marker id.
    pub marker_id: String,
    /// Why it is lost.
    pub reason: OrphanReason,
    /// What the user can do about it.
    pub recovery_steps: Vec<String>,
}

/// Why a marker is orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanReason {
    /// Reconciliation found no match for the anchored code.
    NoMatchFound,
    /// The source file no longer exists.
    SourceDeleted,
}

/// Orphans across a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    /// Files with at least one orphan, in path order.
    pub files: Vec<FileOrphans>,
    /// Comment files that could not be read, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl OrphanReason {
    /// Kebab-case tag, as serialized.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::NoMatchFound => "no-match-found",
            Self::SourceDeleted => "source-deleted",
        };
    }

    /// Suggested recovery for orphans with this reason.
    fn recovery_steps(self) -> Vec<String> {
        let steps: &[&str] = match self {
            Self::NoMatchFound => &[
                "Check whether the code moved to another file",
                "Re-attach the comment with `ghostmark move <file> <comment-id> --line <N>`",
                "Delete the comment if the code is gone for good",
            ],
            Self::SourceDeleted => &[
                "Restore the source file if it was deleted by mistake",
                "Move the comment to another file with `ghostmark move --to`",
                "Delete the comment with `ghostmark delete`",
            ],
        };
        return steps.iter().map(|s| return (*s).to_string()).collect();
    }
}

impl OrphanReport {
    /// Whether no orphans were found and every file was readable.
    pub fn is_clean(&self) -> bool {
        return self.files.is_empty() && self.skipped.is_empty();
    }

    /// Human-readable summary, one block per file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let _ = writeln!(out, "{} ({}/{} markers orphaned)", file.source.display(), file.orphans.len(), file.total_markers);
            for orphan in &file.orphans {
                let _ = writeln!(
                    out,
                    "  ORPHAN  line {:<5} {}  [{}] {}",
                    orphan.last_known_line,
                    orphan.marker_id,
                    orphan.reason.as_str(),
                    orphan.line_text
                );
            }
        }
        for (path, reason) in &self.skipped {
            let _ = writeln!(out, "SKIPPED {}: {reason}", path.display());
        }
        let _ = write!(out, "{} orphaned markers in {} files", self.total_orphans(), self.files.len());
        return out;
    }

    /// Orphans across all files.
    pub fn total_orphans(&self) -> usize {
        return self.files.iter().map(|f| return f.orphans.len()).sum();
    }
}

/// Orphans recorded in one comment file. When the source is gone every
/// marker counts, whatever its flag says.
pub fn file_orphans(source: &Path, file: &CommentFile, source_exists: bool) -> FileOrphans {
    let orphans = file
        .ghost_markers
        .iter()
        .filter(|m| return !source_exists || m.is_orphaned)
        .map(|m| {
            let reason = if source_exists {
                OrphanReason::NoMatchFound
            } else {
                OrphanReason::SourceDeleted
            };
            return Orphan {
                comment_ids: m.comment_ids.clone(),
                last_known_line: m.line,
                line_text: m.line_text.clone(),
                marker_id: m.id.clone(),
                reason,
                recovery_steps: reason.recovery_steps(),
            };
        })
        .collect();
    return FileOrphans {
        orphans,
        source: source.to_path_buf(),
        total_markers: file.ghost_markers.len(),
    };
}

/// Source files under `root` that have a comment file, in path order.
/// The sources themselves may no longer exist.
///
/// # Errors
///
/// Returns `Error::Io` if the root cannot be walked.
pub fn comment_sources(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| {
        return e.depth() == 0 || !SKIPPED_DIRS.iter().any(|d| return e.file_name() == *d);
    });

    let mut sources = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| return Error::Io(std::io::Error::other(e)))?;
        if entry.file_type().is_file()
            && is_comment_file(entry.path())
            && let Some(source) = source_for_comment_path(entry.path())
        {
            sources.push(source);
        }
    }
    return Ok(sources);
}

/// Reconcile every comment file under `root` and report lost markers.
/// Unreadable files are listed in `skipped` rather than aborting the scan.
///
/// # Errors
///
/// Returns `Error::Io` if the root itself cannot be walked.
pub fn scan_workspace(root: &Path, service: &mut CommentService) -> Result<OrphanReport, Error> {
    let mut report = OrphanReport::default();
    for source in comment_sources(root)? {
        let display = source.strip_prefix(root).unwrap_or(&source).to_path_buf();
        match scan_one(&source, &display, service) {
            Ok(Some(found)) if !found.orphans.is_empty() => report.files.push(found),
            Ok(_) => {},
            Err(e) => {
                log::warn!("skipping {}: {e}", source.display());
                report.skipped.push((display, e.user_message()));
            },
        }
    }
    log::debug!("orphan scan of {} found {} orphans", root.display(), report.total_orphans());
    return Ok(report);
}

/// Reconcile one source (if it still exists) and collect its orphans.
fn scan_one(source: &Path, display: &Path, service: &mut CommentService) -> Result<Option<FileOrphans>, Error> {
    let source_exists = source.is_file();
    if source_exists {
        let buffer = SourceText::read(source)?;
        let _ = service.reconcile(&buffer)?;
    }
    return Ok(service
        .file(source)?
        .map(|file| return file_orphans(display, &file, source_exists)));
}
