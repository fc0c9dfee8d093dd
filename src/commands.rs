//! CLI commands for ghostmark: add, delete, move, status, reconcile, orphans,
//! symbols, restore.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use crate::buffer::SourceText;
use crate::clock::{Clock, SystemClock};
use crate::comments::{CommentService, NewComment};
use crate::config::Config;
use crate::error::Error;
use crate::grammar;
use crate::orphans;
use crate::reconcile::{ReconcileStatus, ReconciliationResult};
use crate::store::CommentFileStore;
use crate::types::{CommentFile, CommentStatus, CommentTag};

/// Characters of a comment id shown in listings.
const SHORT_ID_LEN: usize = 8;

/// Add a comment to `file` at `line`.
///
/// # Errors
///
/// Returns errors from reading the source, loading comments, or writing them.
pub fn add(
    file: &Path,
    line: u32,
    text: &str,
    end_line: Option<u32>,
    author: Option<String>,
    tag: Option<CommentTag>,
) -> Result<(), Error> {
    let mut service = service_for(Path::new("."))?;
    let buffer = SourceText::read(file)?;
    let _ = service.open(&buffer)?;
    let comment = service.add_comment(&buffer, NewComment {
        author,
        end_line,
        line,
        tag,
        text: text.to_string(),
    })?;
    service.shutdown()?;
    println!("Added {} at {}:{line}", short_id(&comment.id), file.display());
    return Ok(());
}

/// Delete one comment.
///
/// # Errors
///
/// Returns `Error::CommentNotFound` if the id (or id prefix) matches nothing.
pub fn delete(file: &Path, id: &str) -> Result<(), Error> {
    let mut service = service_for(Path::new("."))?;
    let id = resolve_comment_id(&mut service, file, id)?;
    let removed = service.delete_comment(file, &id)?;
    service.shutdown()?;
    println!("Deleted {} from {}: {}", short_id(&removed.id), file.display(), removed.text);
    return Ok(());
}

/// Render each marker of a comment file with the comments it places.
fn describe_file(source: &Path, file: &CommentFile) -> String {
    let mut lines = Vec::new();
    let mut markers: Vec<_> = file.ghost_markers.iter().collect();
    markers.sort_by_key(|m| return m.line);
    for marker in markers {
        let span = marker
            .end_line
            .map_or_else(|| return marker.line.to_string(), |end| return format!("{}-{end}", marker.line));
        let state = if marker.is_orphaned { "  (orphaned)" } else { "" };
        lines.push(format!("{}:{span}{state}", source.display()));
        for id in &marker.comment_ids {
            let Some(comment) = file.comment(id) else {
                continue;
            };
            let tag = comment.tag.map(|t| return format!("[{t:?}] ").to_uppercase()).unwrap_or_default();
            let status = match comment.status {
                Some(CommentStatus::Resolved) => " (resolved)",
                Some(CommentStatus::Wontfix) => " (wontfix)",
                Some(CommentStatus::Open) | None => "",
            };
            lines.push(format!("  {}  {tag}{}: {}{status}", short_id(&comment.id), comment.author, comment.text));
            for reply in &comment.replies {
                lines.push(format!("      > {}: {}", reply.author, reply.text));
            }
        }
    }
    return lines.join("\n");
}

/// Move a comment to other lines, optionally in another file.
///
/// # Errors
///
/// Returns errors from resolving the id, reading sources, or writing comment files.
pub fn move_comment(file: &Path, id: &str, line: u32, end_line: Option<u32>, to: Option<&Path>) -> Result<(), Error> {
    let mut service = service_for(Path::new("."))?;
    let id = resolve_comment_id(&mut service, file, id)?;
    match to.filter(|target| return !same_file(file, target)) {
        Some(target) => {
            let target_buffer = SourceText::read(target)?;
            let _ = service.open(&target_buffer)?;
            service.move_comment_to_file(file, &id, &target_buffer, line, end_line)?;
            println!("Moved {} to {}:{line}", short_id(&id), target.display());
        },
        None => {
            let buffer = SourceText::read(file)?;
            let _ = service.open(&buffer)?;
            service.move_comment_to_line(&buffer, &id, line, end_line)?;
            println!("Moved {} to {}:{line}", short_id(&id), file.display());
        },
    }
    service.shutdown()?;
    return Ok(());
}

/// Reconcile every comment file in the workspace and list lost markers.
/// Exits 1 when anything is orphaned or unreadable.
///
/// # Errors
///
/// Returns errors from config loading, walking the workspace, or saving.
pub fn orphans(json: bool) -> Result<ExitCode, Error> {
    let root = PathBuf::from(".");
    let mut service = service_for(&root)?;
    let report = orphans::scan_workspace(&root, &mut service)?;
    service.shutdown()?;

    if json {
        println!("{}", to_json(&report)?);
    } else if report.is_clean() {
        println!("No orphaned comments");
    } else {
        println!("{}", report.render());
    }
    if report.is_clean() {
        return Ok(ExitCode::SUCCESS);
    }
    return Ok(ExitCode::from(1));
}

/// Print the results worth a human's attention. Valid markers stay quiet.
pub(crate) fn print_results(source: &Path, results: &[ReconciliationResult]) {
    for result in results {
        let location = format!("{}:{}", source.display(), result.old_line);
        match result.status {
            ReconcileStatus::AutoFixed => match result.new_line {
                Some(new_line) => println!("MOVED   {location} -> {new_line} ({})", result.reason),
                None => println!("FIXED   {location} ({})", result.reason),
            },
            ReconcileStatus::NeedsManualFix => println!("ORPHAN  {location} ({})", result.reason),
            ReconcileStatus::NeedsReview => println!(
                "REVIEW  {location} ({} candidates, suggested line {})",
                result.candidates,
                result.suggested_line.unwrap_or(result.old_line)
            ),
            ReconcileStatus::Valid => {},
        }
    }
}

/// Re-anchor comments in the given files, or in every commented file.
///
/// Exit code priority: needs manual fix (2) > needs review (1) > clean (0).
///
/// # Errors
///
/// Returns errors from config loading, reading comment files, or saving.
pub fn reconcile(files: &[PathBuf], json: bool) -> Result<ExitCode, Error> {
    let root = PathBuf::from(".");
    let mut service = service_for(&root)?;
    let sources = if files.is_empty() {
        orphans::comment_sources(&root)?
    } else {
        files.to_vec()
    };

    let mut all: Vec<(PathBuf, ReconciliationResult)> = Vec::new();
    let mut missing = 0_usize;
    for source in &sources {
        if !source.is_file() {
            if !json {
                println!("ORPHAN  {} (source-deleted)", source.display());
            }
            missing = missing.saturating_add(1);
            continue;
        }
        let buffer = SourceText::read(source)?;
        let results = service.reconcile(&buffer)?;
        if !json {
            print_results(source, &results);
        }
        all.extend(results.into_iter().map(|r| return (source.clone(), r)));
    }
    service.shutdown()?;

    if json {
        let rows: Vec<serde_json::Value> = all
            .iter()
            .map(|(source, result)| return serde_json::json!({ "file": source, "result": result }))
            .collect();
        println!("{}", to_json(&rows)?);
    }

    let count = |status: ReconcileStatus| -> usize {
        return all.iter().filter(|(_, r)| return r.status == status).count();
    };
    let manual = count(ReconcileStatus::NeedsManualFix).saturating_add(missing);
    let review = count(ReconcileStatus::NeedsReview);
    let fixed = count(ReconcileStatus::AutoFixed);

    if !json {
        println!();
    }
    if manual > 0 {
        eprintln!("{manual} need manual fix, {review} need review, {fixed} auto-fixed");
        return Ok(ExitCode::from(2));
    } else if review > 0 {
        eprintln!("{review} need review, {fixed} auto-fixed");
        return Ok(ExitCode::from(1));
    } else {
        eprintln!("All {} markers anchored ({fixed} auto-fixed)", all.len());
        return Ok(ExitCode::SUCCESS);
    }
}

/// Expand a (possibly shortened) comment id to the full id.
///
/// # Errors
///
/// Returns `Error::CommentNotFound` when no comment or more than one matches.
fn resolve_comment_id(service: &mut CommentService, file: &Path, prefix: &str) -> Result<String, Error> {
    let not_found = || {
        return Error::CommentNotFound {
            file: file.to_path_buf(),
            id: prefix.to_string(),
        };
    };
    let Some(comments) = service.file(file)? else {
        return Err(not_found());
    };
    let matches: Vec<&str> = comments
        .comments
        .iter()
        .filter(|c| return c.id.starts_with(prefix))
        .map(|c| return c.id.as_str())
        .collect();
    return match matches.as_slice() {
        [only] => Ok((*only).to_string()),
        [] => Err(not_found()),
        several => {
            eprintln!("`{prefix}` matches {} comments; use more characters", several.len());
            Err(not_found())
        },
    };
}

/// Restore a comment file from its newest backup.
///
/// # Errors
///
/// Returns `Error::FileIo` if there is no backup, or a validation error if
/// the backup is unreadable.
pub fn restore(file: &Path) -> Result<(), Error> {
    let config = Config::load(Path::new("."))?;
    let store = CommentFileStore::new(config.backups_to_keep, config.retry, Rc::new(SystemClock));
    let backup = store.restore_from_backup(file)?;
    println!("Restored comments for {} from {}", file.display(), backup.display());
    return Ok(());
}

/// Whether two paths name the same file, however they are spelled.
fn same_file(a: &Path, b: &Path) -> bool {
    return match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    };
}

/// Comment service for the workspace at `root`, configured from its
/// `.ghostmark.toml` and persisting next to the sources.
///
/// # Errors
///
/// Returns errors from config loading.
pub(crate) fn service_for(root: &Path) -> Result<CommentService, Error> {
    let config = Config::load(root)?;
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let store = CommentFileStore::new(config.backups_to_keep, config.retry, Rc::clone(&clock));
    return Ok(CommentService::from_config(&config, Box::new(store), clock));
}

/// Leading characters of an id.
fn short_id(id: &str) -> &str {
    return id.get(..SHORT_ID_LEN).unwrap_or(id);
}

/// Show a file's comments at their current lines.
///
/// # Errors
///
/// Returns errors from reading the source or its comment file.
pub fn status(file: &Path, json: bool) -> Result<(), Error> {
    let mut service = service_for(Path::new("."))?;
    if file.is_file() {
        let buffer = SourceText::read(file)?;
        let _ = service.open(&buffer)?;
    }
    let current = service.file(file)?;
    service.shutdown()?;

    match (current, json) {
        (None, _) => println!("No comments for {}", file.display()),
        (Some(comments), true) => println!("{}", to_json(&comments)?),
        (Some(comments), false) => println!("{}", describe_file(file, &comments)),
    }
    return Ok(());
}

/// Print the symbol outline of a source file.
///
/// # Errors
///
/// Returns `Error::UnsupportedLanguage` for files without a grammar, or a
/// read or parse error.
pub fn symbols(file: &Path) -> Result<(), Error> {
    let _ = grammar::language_for_path(file)?;
    let mut service = service_for(Path::new("."))?;
    let buffer = SourceText::read(file)?;
    let outline = service.resolver_mut().symbol_tree(&buffer)?;
    print!("{outline}");
    return Ok(());
}

/// Pretty JSON for command output.
///
/// # Errors
///
/// Returns `Error::Io` if serialization fails.
fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    return serde_json::to_string_pretty(value).map_err(|e| return Error::Io(std::io::Error::other(e)));
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::Utc;

    use super::{describe_file, same_file, short_id};
    use crate::hasher::hash_line;
    use crate::types::{Comment, CommentFile, CommentStatus, CommentTag, GhostMarker};

    #[test]
    fn differently_spelled_paths_are_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "x\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(same_file(&file, &dir.path().join(".").join("a.js")));
        assert!(same_file(&file, &dir.path().join("sub").join("..").join("a.js")));
        assert!(!same_file(&file, &dir.path().join("b.js")));
    }

    #[test]
    fn short_ids_truncate() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn listing_shows_markers_in_line_order() {
        let now = Utc::now();
        let mut file = CommentFile::empty("a.js", "2.1.0", now);
        for (n, line) in [(1_u32, 9_u32), (2, 3)] {
            file.comments.push(Comment {
                ai_meta: None,
                author: "ana".to_string(),
                created: now,
                id: format!("c{n}-long-identifier"),
                replies: Vec::new(),
                resolved_at: None,
                resolved_by: None,
                status: (n == 1).then_some(CommentStatus::Resolved),
                tag: (n == 2).then_some(CommentTag::Todo),
                text: format!("comment {n}"),
                updated: now,
            });
            file.ghost_markers.push(GhostMarker {
                ast_anchor: None,
                comment_ids: vec![format!("c{n}-long-identifier")],
                end_line: None,
                id: format!("gm-{n}"),
                is_orphaned: n == 1,
                last_verified: now,
                line,
                line_hash: hash_line("x"),
                line_text: "x".to_string(),
                next_line_text: String::new(),
                prev_line_text: String::new(),
            });
        }

        let text = describe_file(Path::new("a.js"), &file);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "a.js:3",
            "  c2-long-  [TODO] ana: comment 2",
            "a.js:9  (orphaned)",
            "  c1-long-  ana: comment 1 (resolved)",
        ]);
    }
}
