//! File watcher: reconciles every commented file on startup, then re-anchors
//! a file's comments whenever the file changes. Comment files are saved on
//! the debounce and flushed on Ctrl+C.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use notify::{RecursiveMode, Watcher as _};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::buffer::SourceText;
use crate::commands;
use crate::comments::CommentService;
use crate::error::Error;
use crate::orphans::{SKIPPED_DIRS, comment_sources};
use crate::store::{COMMENTS_EXTENSION, comment_path, is_comment_file, source_for_comment_path};

/// Debounce delay between filesystem events and re-anchoring.
const DEBOUNCE_MS: u64 = 100;

/// Longest wait between checks of the stop flag.
const IDLE_TICK_MS: u64 = 500;

/// What a filesystem event means for the watcher.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Change {
    /// A comment file was rewritten, possibly by another ghostmark command.
    /// Holds the source it belongs to.
    Comments(PathBuf),
    /// A source file changed.
    Source(PathBuf),
}

/// Classify a changed path. Backups, temp files, and skipped directories
/// are ignored.
fn classify(path: &Path) -> Option<Change> {
    let skipped = path.components().any(|c| {
        return matches!(c, Component::Normal(name) if SKIPPED_DIRS.iter().any(|d| return name == *d));
    });
    let name = path.file_name().map(|n| return n.to_string_lossy().into_owned()).unwrap_or_default();
    if skipped || name.is_empty() || name.ends_with(".tmp") {
        return None;
    }
    if is_comment_file(path) {
        return source_for_comment_path(path).map(Change::Comments);
    }
    if name.ends_with(&format!(".{COMMENTS_EXTENSION}")) {
        return None;
    }
    return Some(Change::Source(path.to_path_buf()));
}

/// Create a filesystem watcher that sends changed paths on the given channel.
///
/// # Errors
///
/// Returns `Error::Watch` if the watcher cannot be created.
fn create_watcher(tx: crossbeam_channel::Sender<PathBuf>) -> Result<notify::RecommendedWatcher, Error> {
    return notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        if let Ok(event) = res
            && matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
            )
        {
            for path in event.paths {
                let _ = tx.send(path);
            }
        }
    })
    .map_err(|e| {
        return Error::Watch {
            reason: format!("watcher setup failed: {e}"),
        };
    });
}

/// Re-anchor one changed source if it has comments.
fn reconcile_changed(service: &mut CommentService, root: &Path, source: &Path) {
    if !source.is_file() || !comment_path(source).is_file() {
        return;
    }
    let shown = source.strip_prefix(root).unwrap_or(source);
    let result = SourceText::read(source).and_then(|buffer| return service.reconcile(&buffer));
    match result {
        Ok(results) => commands::print_results(shown, &results),
        Err(e) => log::warn!("watch: cannot reconcile {}: {e}", shown.display()),
    }
}

/// Set a flag on SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns `Error::Watch` if a handler cannot be registered.
fn register_stop_flag() -> Result<Arc<AtomicBool>, Error> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        let _ = signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(|e| {
            return Error::Watch {
                reason: format!("cannot handle signal {signal}: {e}"),
            };
        })?;
    }
    return Ok(stop);
}

/// Entry point for the watch command.
///
/// Reconciles every commented file, then watches the workspace and
/// re-anchors files as they change until interrupted. Unsaved comment files
/// are flushed before returning.
///
/// # Errors
///
/// Returns errors from config loading, watcher setup, or the final flush.
pub fn run() -> Result<(), Error> {
    let root = std::fs::canonicalize(".")?;
    let mut service = commands::service_for(&root)?;
    let stop = register_stop_flag()?;

    let sources = comment_sources(&root)?;
    eprintln!("watch: reconciling {} commented files", sources.len());
    for source in &sources {
        reconcile_changed(&mut service, &root, source);
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = create_watcher(tx)?;
    watcher.watch(&root, RecursiveMode::Recursive).map_err(|e| {
        return Error::Watch {
            reason: format!("cannot watch {}: {e}", root.display()),
        };
    })?;
    eprintln!("watch: monitoring {}, press Ctrl+C to stop", root.display());

    let idle = Duration::from_millis(IDLE_TICK_MS);
    let debounce = Duration::from_millis(DEBOUNCE_MS);
    while !stop.load(Ordering::Relaxed) {
        let timeout = service
            .next_save_due()
            .map_or(idle, |due| return due.saturating_duration_since(Instant::now()).min(idle));
        match rx.recv_timeout(timeout) {
            Ok(first) => {
                let mut changed = BTreeSet::from([first]);
                while let Ok(path) = rx.recv_timeout(debounce) {
                    let _ = changed.insert(path);
                }
                for change in changed.iter().filter_map(|p| return classify(p)).collect::<BTreeSet<_>>() {
                    match change {
                        Change::Comments(source) => {
                            log::debug!("watch: {} comments changed on disk, reloading", source.display());
                            service.invalidate(&source);
                            reconcile_changed(&mut service, &root, &source);
                        },
                        Change::Source(source) => reconcile_changed(&mut service, &root, &source),
                    }
                }
            },
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let saved = service.run_due_saves();
        if saved > 0 {
            log::debug!("watch: saved {saved} comment files");
        }
    }

    eprintln!("watch: stopping, saving comments");
    drop(watcher);
    return service.shutdown();
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{Change, classify};

    #[test]
    fn sources_and_comment_files_are_told_apart() {
        assert_eq!(classify(Path::new("/w/src/cart.js")), Some(Change::Source(PathBuf::from("/w/src/cart.js"))));
        assert_eq!(
            classify(Path::new("/w/src/cart.js.comments")),
            Some(Change::Comments(PathBuf::from("/w/src/cart.js")))
        );
    }

    #[test]
    fn backups_and_temp_files_are_ignored() {
        assert_eq!(classify(Path::new("/w/src/cart.js.backup-20260101T000000000Z-000.comments")), None);
        assert_eq!(classify(Path::new("/w/src/cart.js.comments.tmp")), None);
    }

    #[test]
    fn skipped_directories_are_ignored() {
        assert_eq!(classify(Path::new("/w/node_modules/pkg/index.js")), None);
        assert_eq!(classify(Path::new("/w/target/debug/build.rs")), None);
        assert_eq!(classify(Path::new("/w/.git/HEAD")), None);
    }
}
