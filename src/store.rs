//! On-disk comment files: `<source>.comments` JSON next to each source file,
//! with schema migration, integrity checks, atomic writes, and rolling backups.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::cache::Persistence;
use crate::clock::Clock;
use crate::error::{Error, IoOperation, ValidationKind};
use crate::retry::RetryPolicy;
use crate::types::CommentFile;

/// Backups that may share one millisecond stamp.
const BACKUPS_PER_STAMP: u32 = 1000;

/// Infix between the source file name and the timestamp of a backup.
pub(crate) const BACKUP_INFIX: &str = ".backup-";

/// Extension appended to a source path to name its comment file.
pub const COMMENTS_EXTENSION: &str = "comments";

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = "2.1.0";

/// Comment files stored as pretty JSON beside their sources.
pub struct CommentFileStore {
    /// Backups retained per source file.
    backups_to_keep: usize,
    /// Timestamps for backup names.
    clock: Rc<dyn Clock>,
    /// Backoff for transient I/O failures.
    retry: RetryPolicy,
}

/// A parsed `major.minor.patch` schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SchemaVersion {
    /// Incompatible layout changes.
    major: u32,
    /// Compatible additions.
    minor: u32,
}

impl CommentFileStore {
    /// Backup files for `source`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileIo` with `IoOperation::Backup` if the directory
    /// cannot be listed.
    pub fn list_backups(&self, source: &Path) -> Result<Vec<PathBuf>, Error> {
        let dir = parent_dir(source);
        let prefix = backup_prefix(source);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::FileIo {
                    operation: IoOperation::Backup,
                    path: dir,
                    source: e,
                });
            },
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                return name.starts_with(&prefix) && name.ends_with(&format!(".{COMMENTS_EXTENSION}"));
            })
            .map(|entry| return entry.path())
            .collect();
        // Timestamps are fixed-width, so name order is age order.
        backups.sort();
        return Ok(backups);
    }

    /// Store with the given retention and retry policy.
    pub fn new(backups_to_keep: usize, retry: RetryPolicy, clock: Rc<dyn Clock>) -> Self {
        return Self {
            backups_to_keep,
            clock,
            retry,
        };
    }

    /// Copy the current comment file aside before it is overwritten, then
    /// prune old backups. Failures are logged and never block the write.
    fn backup_existing(&self, source: &Path, target: &Path) {
        if !target.exists() {
            return;
        }
        let stamp = self.clock.now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let free = (0..BACKUPS_PER_STAMP).map(|seq| return backup_path(source, &stamp, seq)).find(|p| return !p.exists());
        let Some(backup) = free else {
            log::warn!("backup of {} skipped: {BACKUPS_PER_STAMP} backups already share stamp {stamp}", target.display());
            return;
        };
        if let Err(e) = std::fs::copy(target, &backup) {
            log::warn!("backup of {} failed: {e}", target.display());
            return;
        }
        log::debug!("backed up {} to {}", target.display(), backup.display());

        let backups = match self.list_backups(source) {
            Ok(backups) => backups,
            Err(e) => {
                log::warn!("{e}");
                return;
            },
        };
        let excess = backups.len().saturating_sub(self.backups_to_keep);
        for old in backups.iter().take(excess) {
            if let Err(e) = std::fs::remove_file(old) {
                log::warn!("could not prune backup {}: {e}", old.display());
            }
        }
    }

    /// Replace the comment file for `source` with its newest backup.
    /// Returns the backup that was restored.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileIo` with `IoOperation::Backup` if there is no
    /// backup or it cannot be copied, or a validation error if the newest
    /// backup is itself unreadable.
    pub fn restore_from_backup(&self, source: &Path) -> Result<PathBuf, Error> {
        let backups = self.list_backups(source)?;
        let Some(newest) = backups.last() else {
            return Err(Error::FileIo {
                operation: IoOperation::Backup,
                path: comment_path(source),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no backups found"),
            });
        };

        let text = std::fs::read_to_string(newest).map_err(|e| return Error::FileIo {
            operation: IoOperation::Read,
            path: newest.clone(),
            source: e,
        })?;
        let _ = parse_comment_file(newest, &text)?;

        let target = comment_path(source);
        std::fs::copy(newest, &target).map_err(|e| return Error::FileIo {
            operation: IoOperation::Backup,
            path: target.clone(),
            source: e,
        })?;
        log::info!("restored {} from {}", target.display(), newest.display());
        return Ok(newest.clone());
    }
}

impl Persistence for CommentFileStore {
    /// Remove `<source>.comments`.
    fn delete(&self, source: &Path) -> Result<(), Error> {
        let path = comment_path(source);
        return match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("deleted {}", path.display());
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::FileIo {
                operation: IoOperation::Delete,
                path,
                source: e,
            }),
        };
    }

    /// Read, migrate, and validate `<source>.comments`.
    fn read(&self, source: &Path) -> Result<Option<CommentFile>, Error> {
        let path = comment_path(source);
        let label = format!("read {}", path.display());
        let text = self.retry.run(&label, || {
            return match std::fs::read_to_string(&path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::FileIo {
                    operation: IoOperation::Read,
                    path: path.clone(),
                    source: e,
                }),
            };
        })?;
        let Some(text) = text else {
            return Ok(None);
        };
        return parse_comment_file(&path, &text).map(Some);
    }

    /// Validate, back up the previous version, and write atomically.
    fn write(&self, source: &Path, file: &CommentFile) -> Result<(), Error> {
        let path = comment_path(source);
        file.check_integrity().map_err(|reason| return Error::Validation {
            kind: ValidationKind::Integrity,
            path: path.clone(),
            reason,
        })?;
        let json = serde_json::to_string_pretty(file).map_err(|e| return Error::Validation {
            kind: ValidationKind::Json,
            path: path.clone(),
            reason: e.to_string(),
        })?;

        self.backup_existing(source, &path);

        let mut tmp_name = file_name(&path);
        tmp_name.push(".tmp");
        let tmp = parent_dir(&path).join(tmp_name);
        let label = format!("write {}", path.display());
        self.retry.run(&label, || {
            let io_error = |e: std::io::Error| {
                return Error::FileIo {
                    operation: IoOperation::Write,
                    path: path.clone(),
                    source: e,
                };
            };
            std::fs::write(&tmp, format!("{json}\n")).map_err(io_error)?;
            std::fs::rename(&tmp, &path).map_err(io_error)?;
            return Ok(());
        })?;
        log::debug!("wrote {} ({} comments)", path.display(), file.comments.len());
        return Ok(());
    }
}

impl SchemaVersion {
    /// Parse `major.minor[.patch]`.
    fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |m| return m.parse().ok())?;
        return Some(Self { major, minor });
    }
}

/// Backup file for `source` with a timestamp and a sequence number that
/// keeps same-millisecond backups apart. Both parts are fixed-width.
fn backup_path(source: &Path, stamp: &str, seq: u32) -> PathBuf {
    let mut name = file_name(source);
    name.push(format!("{BACKUP_INFIX}{stamp}-{seq:03}.{COMMENTS_EXTENSION}"));
    return parent_dir(source).join(name);
}

/// Beginning of every backup file name for `source`.
fn backup_prefix(source: &Path) -> String {
    return format!("{}{BACKUP_INFIX}", file_name(source).to_string_lossy());
}

/// Path of the comment file that belongs to `source`.
pub fn comment_path(source: &Path) -> PathBuf {
    let mut name = file_name(source);
    name.push(format!(".{COMMENTS_EXTENSION}"));
    return parent_dir(source).join(name);
}

/// File name component, empty for paths without one.
fn file_name(path: &Path) -> OsString {
    return path.file_name().map(OsString::from).unwrap_or_default();
}

/// Whether `path` names a live comment file (not a backup or temp file).
pub fn is_comment_file(path: &Path) -> bool {
    let name = file_name(path);
    let name = name.to_string_lossy();
    return name.ends_with(&format!(".{COMMENTS_EXTENSION}"))
        && !name.contains(BACKUP_INFIX)
        && name.len() > COMMENTS_EXTENSION.len().saturating_add(1);
}

/// Upgrade a raw document to the current schema in place, or explain why not.
///
/// # Errors
///
/// Returns `Error::Validation` for a missing or unparseable version and
/// `Error::Migration` for versions this build cannot read.
fn migrate(path: &Path, document: &mut serde_json::Value) -> Result<(), Error> {
    let schema_error = |reason: String| {
        return Error::Validation {
            kind: ValidationKind::Schema,
            path: path.to_path_buf(),
            reason,
        };
    };
    let Some(object) = document.as_object_mut() else {
        return Err(schema_error("top level is not an object".to_string()));
    };
    let Some(found) = object.get("version").and_then(serde_json::Value::as_str).map(String::from) else {
        return Err(schema_error("missing `version`".to_string()));
    };
    let Some(version) = SchemaVersion::parse(&found) else {
        return Err(schema_error(format!("unparseable version `{found}`")));
    };

    let migration_error = |reason: &str| {
        return Error::Migration {
            from: found.clone(),
            path: path.to_path_buf(),
            reason: reason.to_string(),
            to: SCHEMA_VERSION.to_string(),
        };
    };
    match (version.major, version.minor) {
        (2, 1) => return Ok(()),
        (2, 0) => {
            log::info!("upgrading {} from {found} to {SCHEMA_VERSION}", path.display());
            let _ = object.insert("version".to_string(), serde_json::Value::from(SCHEMA_VERSION));
            return Ok(());
        },
        (2, _) => {
            log::warn!("{} was written with newer schema {found}; unknown fields are dropped", path.display());
            return Ok(());
        },
        (0 | 1, _) => return Err(migration_error("files before 2.0 carry no ghost markers")),
        _ => return Err(migration_error("written by a newer ghostmark")),
    }
}

/// Directory holding `path`, `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    return match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
}

/// Decode, migrate, and validate comment file text.
///
/// # Errors
///
/// Returns `Error::Validation` (json, schema, or integrity) or `Error::Migration`.
fn parse_comment_file(path: &Path, text: &str) -> Result<CommentFile, Error> {
    let mut document: serde_json::Value = serde_json::from_str(text).map_err(|e| return Error::Validation {
        kind: ValidationKind::Json,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    migrate(path, &mut document)?;

    let file: CommentFile = serde_json::from_value(document).map_err(|e| return Error::Validation {
        kind: ValidationKind::Schema,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    file.check_integrity().map_err(|reason| return Error::Validation {
        kind: ValidationKind::Integrity,
        path: path.to_path_buf(),
        reason,
    })?;
    return Ok(file);
}

/// Source file a comment file belongs to.
pub fn source_for_comment_path(path: &Path) -> Option<PathBuf> {
    let name = file_name(path);
    let stem = name.to_str()?.strip_suffix(&format!(".{COMMENTS_EXTENSION}"))?;
    if stem.is_empty() {
        return None;
    }
    return Some(parent_dir(path).join(stem));
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::Duration;

    use chrono::Utc;

    use super::{CommentFileStore, SCHEMA_VERSION, comment_path, is_comment_file, source_for_comment_path};
    use crate::cache::Persistence as _;
    use crate::clock::ManualClock;
    use crate::error::{Error, ValidationKind};
    use crate::hasher::hash_line;
    use crate::retry::RetryPolicy;
    use crate::types::{Comment, CommentFile, GhostMarker};

    fn store(clock: &Rc<ManualClock>) -> CommentFileStore {
        return CommentFileStore::new(2, RetryPolicy::immediate(1), clock.clone());
    }

    fn sample(text: &str) -> CommentFile {
        let now = Utc::now();
        let mut file = CommentFile::empty("a.js", SCHEMA_VERSION, now);
        file.comments.push(Comment {
            ai_meta: None,
            author: "ana".to_string(),
            created: now,
            id: "c1".to_string(),
            replies: Vec::new(),
            resolved_at: None,
            resolved_by: None,
            status: None,
            tag: None,
            text: text.to_string(),
            updated: now,
        });
        file.ghost_markers.push(GhostMarker {
            ast_anchor: None,
            comment_ids: vec!["c1".to_string()],
            end_line: None,
            id: "gm-1".to_string(),
            is_orphaned: false,
            last_verified: now,
            line: 1,
            line_hash: hash_line("let x = 1;"),
            line_text: "let x = 1;".to_string(),
            next_line_text: String::new(),
            prev_line_text: String::new(),
        });
        file.touch(now);
        return file;
    }

    #[test]
    fn comment_paths_sit_beside_sources() {
        assert_eq!(comment_path(Path::new("src/a.js")), PathBuf::from("src/a.js.comments"));
        assert_eq!(comment_path(Path::new("a.js")), PathBuf::from("./a.js.comments"));
        assert_eq!(source_for_comment_path(Path::new("src/a.js.comments")), Some(PathBuf::from("src/a.js")));
        assert!(is_comment_file(Path::new("src/a.js.comments")));
        assert!(!is_comment_file(Path::new("src/a.js.backup-20260101T000000000Z.comments")));
        assert!(!is_comment_file(Path::new("src/a.js")));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Rc::new(ManualClock::new());
        assert!(store(&clock).read(&dir.path().join("a.js")).unwrap().is_none());
    }

    #[test]
    fn write_then_read_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        let clock = Rc::new(ManualClock::new());
        let store = store(&clock);
        let file = sample("check bounds");
        store.write(&source, &file).unwrap();
        assert_eq!(store.read(&source).unwrap(), Some(file));
        assert!(!dir.path().join("a.js.comments.tmp").exists());
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        std::fs::write(comment_path(&source), "{ not json").unwrap();
        let clock = Rc::new(ManualClock::new());
        let err = store(&clock).read(&source).unwrap_err();
        assert!(matches!(err, Error::Validation { kind: ValidationKind::Json, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_required_field_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        std::fs::write(comment_path(&source), r#"{"version":"2.1.0","comments":[]}"#).unwrap();
        let clock = Rc::new(ManualClock::new());
        let err = store(&clock).read(&source).unwrap_err();
        assert!(matches!(err, Error::Validation { kind: ValidationKind::Schema, .. }));
    }

    #[test]
    fn version_two_zero_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        std::fs::write(comment_path(&source), r#"{"version":"2.0.3","file":"a.js","comments":[]}"#).unwrap();
        let clock = Rc::new(ManualClock::new());
        let file = store(&clock).read(&source).unwrap().unwrap();
        assert_eq!(file.version, SCHEMA_VERSION);
        assert_eq!(file.file_path, "a.js");
    }

    #[test]
    fn old_and_future_majors_fail_migration() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        let clock = Rc::new(ManualClock::new());
        for version in ["1.0.0", "3.0.0"] {
            let json = format!(r#"{{"version":"{version}","filePath":"a.js","comments":[]}}"#);
            std::fs::write(comment_path(&source), json).unwrap();
            let err = store(&clock).read(&source).unwrap_err();
            assert!(matches!(err, Error::Migration { .. }), "{version}: {err}");
        }
    }

    #[test]
    fn integrity_violations_are_refused_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        let mut file = sample("x");
        file.ghost_markers.clear();
        let clock = Rc::new(ManualClock::new());
        let err = store(&clock).write(&source, &file).unwrap_err();
        assert!(matches!(err, Error::Validation { kind: ValidationKind::Integrity, .. }));
        assert!(!comment_path(&source).exists());
    }

    #[test]
    fn overwrites_keep_a_bounded_set_of_backups() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        let clock = Rc::new(ManualClock::new());
        let store = store(&clock);
        for n in 0..5 {
            store.write(&source, &sample(&format!("v{n}"))).unwrap();
            clock.advance(Duration::from_secs(1));
        }
        let backups = store.list_backups(&source).unwrap();
        assert_eq!(backups.len(), 2);

        let restored = store.restore_from_backup(&source).unwrap();
        assert_eq!(Some(&restored), backups.last());
        let file = store.read(&source).unwrap().unwrap();
        assert_eq!(file.comments.first().map(|c| c.text.as_str()), Some("v3"));
    }

    #[test]
    fn backups_in_the_same_millisecond_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        let clock = Rc::new(ManualClock::new());
        let store = store(&clock);
        for n in 0..3 {
            store.write(&source, &sample(&format!("v{n}"))).unwrap();
        }
        let backups = store.list_backups(&source).unwrap();
        assert_eq!(backups.len(), 2);
        assert_ne!(backups.first(), backups.last());

        let _ = store.restore_from_backup(&source).unwrap();
        let file = store.read(&source).unwrap().unwrap();
        assert_eq!(file.comments.first().map(|c| c.text.as_str()), Some("v1"));
    }

    #[test]
    fn restore_without_backups_fails() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Rc::new(ManualClock::new());
        let err = store(&clock).restore_from_backup(&dir.path().join("a.js")).unwrap_err();
        assert!(matches!(err, Error::FileIo { .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        let clock = Rc::new(ManualClock::new());
        let store = store(&clock);
        store.write(&source, &sample("x")).unwrap();
        store.delete(&source).unwrap();
        store.delete(&source).unwrap();
        assert!(store.read(&source).unwrap().is_none());
    }
}
