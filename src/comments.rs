//! Comment lifecycle: add, edit, resolve, reply, delete, and move comments,
//! keeping every comment attached to exactly one ghost marker.

use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use uuid::Uuid;

use crate::buffer::TextBuffer;
use crate::cache::{CacheStats, CommentFileCache, Persistence};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, MarkerErrorKind};
use crate::hasher;
use crate::outline::TreeSitterOutline;
use crate::reconcile::{ReconcileStatus, ReconciliationEngine, ReconciliationResult};
use crate::resolver::SymbolAnchorResolver;
use crate::store::SCHEMA_VERSION;
use crate::types::{Comment, CommentFile, CommentReply, CommentStatus, CommentTag, GhostMarker};

/// Where and what to add.
#[derive(Debug, Clone, Default)]
pub struct NewComment {
    /// Author; the configured default when `None`.
    pub author: Option<String>,
    /// Last line of a range comment, inclusive.
    pub end_line: Option<u32>,
    /// First line, 1-based.
    pub line: u32,
    /// Explicit tag; detected from the text when `None`.
    pub tag: Option<CommentTag>,
    /// Body.
    pub text: String,
}

/// Owns the cache and reconciliation engine and applies comment operations
/// to them. Mutations land in the cache and are written on its debounce;
/// cross-file moves are written immediately.
pub struct CommentService {
    /// Comment files in memory.
    cache: CommentFileCache,
    /// Timestamps.
    clock: Rc<dyn Clock>,
    /// Author used when a request names none.
    default_author: String,
    /// Marker re-anchoring.
    engine: ReconciliationEngine,
}

impl CommentService {
    /// Add a comment at `request.line`, sharing an existing live marker with
    /// the same span or creating a new one in the same step.
    ///
    /// # Errors
    ///
    /// Returns `Error::GhostMarker` if the lines are outside the buffer, or
    /// the persistence layer's read error.
    pub fn add_comment(&mut self, buffer: &dyn TextBuffer, request: NewComment) -> Result<Comment, Error> {
        let now = self.clock.now();
        let mut file = self.load_or_empty(buffer.path())?;
        let comment = Comment {
            ai_meta: None,
            author: request.author.unwrap_or_else(|| return self.default_author.clone()),
            created: now,
            id: Uuid::new_v4().to_string(),
            replies: Vec::new(),
            resolved_at: None,
            resolved_by: None,
            status: None,
            tag: request.tag.or_else(|| return CommentTag::detect(&request.text)),
            text: request.text,
            updated: now,
        };

        let marker_id = self.place(&mut file, buffer, &comment.id, request.line, request.end_line)?;
        log::info!("added comment {} at {}:{} ({marker_id})", comment.id, buffer.path().display(), request.line);
        file.comments.push(comment.clone());
        file.touch(now);
        self.cache.set(buffer.path(), file);
        return Ok(comment);
    }

    /// Append a reply to a comment's thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound` if there is no such comment.
    pub fn add_reply(&mut self, source: &Path, id: &str, author: Option<&str>, text: &str) -> Result<CommentReply, Error> {
        let now = self.clock.now();
        let author = author.map_or_else(|| return self.default_author.clone(), String::from);
        let reply = CommentReply {
            author,
            created: now,
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
        };
        let added = reply.clone();
        self.update_comment(source, id, |comment| {
            comment.replies.push(added);
            comment.updated = now;
        })?;
        return Ok(reply);
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        return self.cache.stats();
    }

    /// Copy a comment to `line` of another file under a new id. The source
    /// file is not changed; the author records where the copy came from.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound`, `Error::GhostMarker` for lines
    /// outside the target buffer, or a persistence read error.
    pub fn copy_comment_to_file(
        &mut self,
        source: &Path,
        id: &str,
        target: &dyn TextBuffer,
        line: u32,
        end_line: Option<u32>,
    ) -> Result<Comment, Error> {
        let original = self.find_comment(source, id)?;
        let now = self.clock.now();
        let origin = source.file_name().map_or_else(|| return source.display().to_string(), |n| {
            return n.to_string_lossy().into_owned();
        });
        let copy = Comment {
            author: format!("{} (from {origin})", original.author),
            created: now,
            id: Uuid::new_v4().to_string(),
            replies: Vec::new(),
            resolved_at: None,
            resolved_by: None,
            status: None,
            updated: now,
            ..original
        };

        let mut file = self.load_or_empty(target.path())?;
        let _ = self.place(&mut file, target, &copy.id, line, end_line)?;
        file.comments.push(copy.clone());
        file.touch(now);
        self.cache.set(target.path(), file);
        log::info!("copied comment {id} to {} as {}", target.path().display(), copy.id);
        return Ok(copy);
    }

    /// Remove a comment; a marker left with no comments is removed too.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound` if there is no such comment.
    pub fn delete_comment(&mut self, source: &Path, id: &str) -> Result<Comment, Error> {
        let mut file = self.load_required(source, id)?;
        let comment = take_comment(&mut file, source, id)?;
        file.touch(self.clock.now());
        self.cache.set(source, file);
        log::info!("deleted comment {id} from {}", source.display());
        return Ok(comment);
    }

    /// Replace a comment's text.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound` if there is no such comment.
    pub fn edit_comment(&mut self, source: &Path, id: &str, text: &str) -> Result<Comment, Error> {
        let now = self.clock.now();
        return self.update_comment(source, id, |comment| {
            text.clone_into(&mut comment.text);
            comment.updated = now;
        });
    }

    /// Current comment file for `source`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns the persistence layer's read error.
    pub fn file(&mut self, source: &Path) -> Result<Option<CommentFile>, Error> {
        return Ok(self.cache.get_or_load(source)?.cloned());
    }

    /// A comment by id.
    fn find_comment(&mut self, source: &Path, id: &str) -> Result<Comment, Error> {
        let file = self.load_required(source, id)?;
        return file.comment(id).cloned().ok_or_else(|| return not_found(source, id));
    }

    /// Write every unsaved comment file now.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub fn flush(&mut self) -> Result<usize, Error> {
        return self.cache.flush(None);
    }

    /// Service over `persistence` wired the way `config` describes, with
    /// tree-sitter outlines as the symbol source.
    pub fn from_config(config: &Config, persistence: Box<dyn Persistence>, clock: Rc<dyn Clock>) -> Self {
        let resolver = SymbolAnchorResolver::new(
            Box::new(TreeSitterOutline),
            config.ast_languages.iter().cloned(),
            config.symbol_cache_ttl,
            config.retry,
            Rc::clone(&clock),
        );
        let engine = ReconciliationEngine::new(resolver, config.drift_radius, config.drift_tie_break, Rc::clone(&clock));
        let cache = CommentFileCache::new(persistence, config.max_cached_files, config.auto_save_delay, Rc::clone(&clock));
        return Self::new(cache, engine, clock, &config.default_author);
    }

    /// Forget the cached comment file for `source` so the next access reads
    /// the file on disk, such as after another process rewrote it.
    /// Unsaved changes are dropped; reconcile again to recompute them.
    pub fn invalidate(&mut self, source: &Path) {
        self.cache.invalidate(source);
    }

    /// Load the comment file for `source` or start an empty one.
    fn load_or_empty(&mut self, source: &Path) -> Result<CommentFile, Error> {
        if let Some(file) = self.cache.get_or_load(source)? {
            return Ok(file.clone());
        }
        return Ok(CommentFile::empty(&source.display().to_string(), SCHEMA_VERSION, self.clock.now()));
    }

    /// Load the comment file that must hold comment `id`.
    fn load_required(&mut self, source: &Path, id: &str) -> Result<CommentFile, Error> {
        return self.cache.get_or_load(source)?.cloned().ok_or_else(|| return not_found(source, id));
    }

    /// Move a comment to other lines of the same file.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound` or `Error::GhostMarker` for lines
    /// outside the buffer.
    pub fn move_comment_to_line(
        &mut self,
        buffer: &dyn TextBuffer,
        id: &str,
        line: u32,
        end_line: Option<u32>,
    ) -> Result<(), Error> {
        let source = buffer.path();
        let mut file = self.load_required(source, id)?;
        let comment = take_comment(&mut file, source, id)?;
        let _ = self.place(&mut file, buffer, id, line, end_line)?;
        file.comments.push(comment);
        file.touch(self.clock.now());
        self.cache.set(source, file);
        log::info!("moved comment {id} to {}:{line}", source.display());
        return Ok(());
    }

    /// Move a comment to `line` of another file.
    ///
    /// The target is written first and the source only after the target
    /// write succeeded, so a failure in between leaves the comment in both
    /// files rather than in neither. A target that is the source file itself
    /// is a move within the file.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound`, `Error::GhostMarker` for lines
    /// outside the target buffer, or a write error. If the source write
    /// fails the returned error says the comment is duplicated.
    pub fn move_comment_to_file(
        &mut self,
        source: &Path,
        id: &str,
        target: &dyn TextBuffer,
        line: u32,
        end_line: Option<u32>,
    ) -> Result<(), Error> {
        if target.path() == source {
            return self.move_comment_to_line(target, id, line, end_line);
        }
        let now = self.clock.now();
        let mut source_file = self.load_required(source, id)?;
        let comment = take_comment(&mut source_file, source, id)?;
        source_file.touch(now);

        let mut target_file = self.load_or_empty(target.path())?;
        let _ = self.place(&mut target_file, target, id, line, end_line)?;
        target_file.comments.push(comment);
        target_file.touch(now);

        self.cache.persistence().write(target.path(), &target_file)?;
        self.cache.put_saved(target.path(), target_file);
        if let Err(e) = self.cache.persistence().write(source, &source_file) {
            log::error!("comment {id} now exists in both {} and {}", source.display(), target.path().display());
            return Err(Error::GhostMarker {
                kind: MarkerErrorKind::Persistence,
                line: Some(line),
                marker_id: None,
                reason: format!("moved to {} but removing it from {} failed: {e}", target.path().display(), source.display()),
            });
        }
        self.cache.put_saved(source, source_file);
        log::info!("moved comment {id} from {} to {}:{line}", source.display(), target.path().display());
        return Ok(());
    }

    /// Service from parts.
    pub fn new(cache: CommentFileCache, engine: ReconciliationEngine, clock: Rc<dyn Clock>, default_author: &str) -> Self {
        return Self {
            cache,
            clock,
            default_author: default_author.to_string(),
            engine,
        };
    }

    /// Earliest pending debounced write, for event loops.
    pub fn next_save_due(&self) -> Option<Instant> {
        return self.cache.next_save_due();
    }

    /// Load the buffer's comments and re-anchor them to its current content.
    ///
    /// # Errors
    ///
    /// Returns the persistence layer's read error.
    pub fn open(&mut self, buffer: &dyn TextBuffer) -> Result<Vec<ReconciliationResult>, Error> {
        let results = self.reconcile(buffer)?;
        log::debug!("opened {} with {} markers", buffer.path().display(), results.len());
        return Ok(results);
    }

    /// Attach `comment_id` to a live marker covering exactly `line..=end_line`,
    /// creating and anchoring one if none exists. Returns the marker id.
    fn place(
        &mut self,
        file: &mut CommentFile,
        buffer: &dyn TextBuffer,
        comment_id: &str,
        line: u32,
        end_line: Option<u32>,
    ) -> Result<String, Error> {
        let end_line = end_line.filter(|&end| return end != line);
        let Some(print) = hasher::fingerprint(buffer, line, end_line).filter(|_| {
            return end_line.is_none_or(|end| return end > line);
        }) else {
            return Err(Error::GhostMarker {
                kind: MarkerErrorKind::Tracking,
                line: Some(line),
                marker_id: None,
                reason: format!(
                    "lines {line}..={} are outside {} (1..={})",
                    end_line.unwrap_or(line),
                    buffer.path().display(),
                    buffer.line_count()
                ),
            });
        };

        if let Some(existing) = file
            .ghost_markers
            .iter_mut()
            .find(|m| return m.line == line && m.end_line == end_line && !m.is_orphaned)
        {
            existing.comment_ids.push(comment_id.to_string());
            return Ok(existing.id.clone());
        }

        let marker = GhostMarker {
            ast_anchor: self.engine.resolver_mut().create_anchor(buffer, line),
            comment_ids: vec![comment_id.to_string()],
            end_line,
            id: format!("gm-{}", Uuid::new_v4()),
            is_orphaned: false,
            last_verified: self.clock.now(),
            line,
            line_hash: print.line_hash,
            line_text: print.line_text,
            next_line_text: print.next_line_text,
            prev_line_text: print.prev_line_text,
        };
        let id = marker.id.clone();
        file.ghost_markers.push(marker);
        return Ok(id);
    }

    /// Re-anchor every marker of the buffer's comment file. The file is
    /// only marked for saving when reconciliation changed something.
    ///
    /// # Errors
    ///
    /// Returns the persistence layer's read error.
    pub fn reconcile(&mut self, buffer: &dyn TextBuffer) -> Result<Vec<ReconciliationResult>, Error> {
        let Some(mut file) = self.cache.get_or_load(buffer.path())?.cloned() else {
            return Ok(Vec::new());
        };
        let before = file.clone();
        let results = self.engine.reconcile_file(buffer, &mut file);

        let moved = results.iter().filter(|r| return r.status == ReconcileStatus::AutoFixed).count();
        let lost = results.iter().filter(|r| return r.status == ReconcileStatus::NeedsManualFix).count();
        if moved > 0 || lost > 0 {
            log::info!("{}: {moved} markers re-anchored, {lost} orphaned", buffer.path().display());
        }
        if changed_beyond_verification(&before, &file) {
            file.touch(self.clock.now());
            self.cache.set(buffer.path(), file);
        }
        return Ok(results);
    }

    /// Symbol resolver, for outline inspection.
    pub fn resolver_mut(&mut self) -> &mut SymbolAnchorResolver {
        return self.engine.resolver_mut();
    }

    /// Write comment files whose debounce deadline has passed.
    pub fn run_due_saves(&mut self) -> usize {
        return self.cache.run_due_saves();
    }

    /// Change a comment's workflow status. Resolving records who and when;
    /// any other status clears that record.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommentNotFound` if there is no such comment.
    pub fn set_status(
        &mut self,
        source: &Path,
        id: &str,
        status: CommentStatus,
        by: Option<&str>,
    ) -> Result<Comment, Error> {
        let now = self.clock.now();
        let resolver = by.map_or_else(|| return self.default_author.clone(), String::from);
        return self.update_comment(source, id, |comment| {
            comment.status = Some(status);
            if status == CommentStatus::Resolved {
                comment.resolved_at = Some(now);
                comment.resolved_by = Some(resolver);
            } else {
                comment.resolved_at = None;
                comment.resolved_by = None;
            }
            comment.updated = now;
        });
    }

    /// Write everything and drop the cache.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub fn shutdown(mut self) -> Result<(), Error> {
        let stats = self.cache.stats();
        log::debug!(
            "shutting down: {} writes, {} auto-saves, {}% cache hits",
            stats.writes,
            stats.auto_saves,
            stats.hit_rate_percent()
        );
        return self.cache.clear();
    }

    /// Apply `change` to one comment and store the result.
    fn update_comment(&mut self, source: &Path, id: &str, change: impl FnOnce(&mut Comment)) -> Result<Comment, Error> {
        let mut file = self.load_required(source, id)?;
        let comment = file.comment_mut(id).ok_or_else(|| return not_found(source, id))?;
        change(comment);
        let updated = comment.clone();
        file.touch(self.clock.now());
        self.cache.set(source, file);
        return Ok(updated);
    }
}

/// Whether reconciliation changed anything other than `last_verified` stamps.
fn changed_beyond_verification(before: &CommentFile, after: &CommentFile) -> bool {
    let mut restamped = before.clone();
    for (old, new) in restamped.ghost_markers.iter_mut().zip(&after.ghost_markers) {
        old.last_verified = new.last_verified;
    }
    return restamped != *after;
}

/// `CommentNotFound` for `id` in `source`.
fn not_found(source: &Path, id: &str) -> Error {
    return Error::CommentNotFound {
        file: source.to_path_buf(),
        id: id.to_string(),
    };
}

/// Remove a comment and detach it from its marker, dropping markers left empty.
fn take_comment(file: &mut CommentFile, source: &Path, id: &str) -> Result<Comment, Error> {
    let index = file
        .comments
        .iter()
        .position(|c| return c.id == id)
        .ok_or_else(|| return not_found(source, id))?;
    let comment = file.comments.remove(index);
    for marker in &mut file.ghost_markers {
        marker.comment_ids.retain(|c| return c != id);
    }
    file.ghost_markers.retain(|m| return !m.comment_ids.is_empty());
    return Ok(comment);
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;

    use super::{CommentService, NewComment};
    use crate::buffer::SourceText;
    use crate::cache::tests::MemoryPersistence;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::error::Error;
    use crate::reconcile::ReconcileStatus;
    use crate::types::{CommentStatus, CommentTag};

    const CART: &str = "class Cart {\n  addItem(item) {\n    this.items.push(item);\n    return this;\n  }\n}\n";

    fn service() -> (CommentService, MemoryPersistence, Rc<ManualClock>) {
        let store = MemoryPersistence::default();
        let clock = Rc::new(ManualClock::new());
        let service = CommentService::from_config(&Config::default(), Box::new(store.clone()), clock.clone());
        return (service, store, clock);
    }

    fn at(line: u32, text: &str) -> NewComment {
        return NewComment {
            line,
            text: text.to_string(),
            ..NewComment::default()
        };
    }

    #[test]
    fn comments_on_the_same_line_share_a_marker() {
        let (mut service, _, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let first = service.add_comment(&buf, at(3, "TODO: validate item")).unwrap();
        let second = service.add_comment(&buf, at(3, "why push?")).unwrap();
        assert_eq!(first.tag, Some(CommentTag::Todo));
        assert_eq!(first.author, "anonymous");

        let file = service.file(Path::new("cart.js")).unwrap().unwrap();
        assert_eq!(file.ghost_markers.len(), 1);
        let marker = file.ghost_markers.first().unwrap();
        assert_eq!(marker.comment_ids, vec![first.id, second.id]);
        assert!(marker.id.starts_with("gm-"));
        assert_eq!(marker.ast_anchor.as_ref().map(|a| a.dotted_path()).as_deref(), Some("Cart.addItem"));
        assert!(file.check_integrity().is_ok());
    }

    #[test]
    fn lines_outside_the_buffer_are_rejected() {
        let (mut service, _, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let err = service.add_comment(&buf, at(99, "nowhere")).unwrap_err();
        assert!(matches!(err, Error::GhostMarker { line: Some(99), .. }));
        let range = NewComment { end_line: Some(1), ..at(3, "backwards") };
        assert!(service.add_comment(&buf, range).is_err());
    }

    #[test]
    fn deleting_the_last_comment_prunes_its_marker() {
        let (mut service, _, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let kept = service.add_comment(&buf, at(2, "keep")).unwrap();
        let gone = service.add_comment(&buf, at(4, "drop")).unwrap();

        let _ = service.delete_comment(Path::new("cart.js"), &gone.id).unwrap();
        let file = service.file(Path::new("cart.js")).unwrap().unwrap();
        assert_eq!(file.ghost_markers.len(), 1);
        assert!(file.comment(&kept.id).is_some());
        assert_eq!(file.metadata.total_comments, 1);

        let err = service.delete_comment(Path::new("cart.js"), &gone.id).unwrap_err();
        assert!(matches!(err, Error::CommentNotFound { .. }));
    }

    #[test]
    fn status_reply_and_edit_update_the_comment() {
        let (mut service, _, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let path = Path::new("cart.js");
        let comment = service.add_comment(&buf, at(3, "check")).unwrap();

        let resolved = service.set_status(path, &comment.id, CommentStatus::Resolved, Some("bo")).unwrap();
        assert_eq!(resolved.resolved_by.as_deref(), Some("bo"));
        let reopened = service.set_status(path, &comment.id, CommentStatus::Open, None).unwrap();
        assert!(reopened.resolved_at.is_none());

        let _ = service.add_reply(path, &comment.id, Some("cy"), "done").unwrap();
        let edited = service.edit_comment(path, &comment.id, "check twice").unwrap();
        assert_eq!(edited.text, "check twice");
        assert_eq!(edited.replies.len(), 1);
    }

    #[test]
    fn move_within_a_file_reanchors() {
        let (mut service, _, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let comment = service.add_comment(&buf, at(3, "here")).unwrap();
        service.move_comment_to_line(&buf, &comment.id, 4, None).unwrap();

        let file = service.file(Path::new("cart.js")).unwrap().unwrap();
        let marker = file.marker_for_comment(&comment.id).unwrap();
        assert_eq!(marker.line, 4);
        assert_eq!(marker.line_text, "return this;");
        assert_eq!(file.ghost_markers.len(), 1);
    }

    #[test]
    fn move_to_another_file_writes_both_immediately() {
        let (mut service, store, _) = service();
        let from = SourceText::new("cart.js", CART);
        let to = SourceText::new("notes.txt", "one\ntwo\n");
        let comment = service.add_comment(&from, at(3, "belongs elsewhere")).unwrap();
        service
            .move_comment_to_file(Path::new("cart.js"), &comment.id, &to, 2, None)
            .unwrap();

        assert_eq!(store.writes.get(), 2);
        let files = store.files.borrow();
        let source = files.get(Path::new("cart.js")).unwrap();
        let target = files.get(Path::new("notes.txt")).unwrap();
        assert!(source.comments.is_empty());
        assert!(source.ghost_markers.is_empty());
        assert_eq!(target.marker_for_comment(&comment.id).map(|m| m.line), Some(2));
    }

    #[test]
    fn move_to_the_same_file_keeps_the_comment() {
        let (mut service, store, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let comment = service.add_comment(&buf, at(3, "stay in cart")).unwrap();
        service
            .move_comment_to_file(Path::new("cart.js"), &comment.id, &buf, 4, None)
            .unwrap();

        let file = service.file(Path::new("cart.js")).unwrap().unwrap();
        assert_eq!(file.marker_for_comment(&comment.id).map(|m| m.line), Some(4));
        assert_eq!(file.comments.len(), 1);
        assert!(file.check_integrity().is_ok());

        assert_eq!(service.flush().unwrap(), 1);
        let files = store.files.borrow();
        let saved = files.get(Path::new("cart.js")).unwrap();
        assert_eq!(saved.marker_for_comment(&comment.id).map(|m| m.line), Some(4));
    }

    #[test]
    fn failed_target_write_leaves_the_source_untouched() {
        let (mut service, store, _) = service();
        let from = SourceText::new("cart.js", CART);
        let to = SourceText::new("notes.txt", "one\n");
        let comment = service.add_comment(&from, at(3, "stay")).unwrap();
        store.fail_writes.set(true);
        assert!(service.move_comment_to_file(Path::new("cart.js"), &comment.id, &to, 1, None).is_err());

        let file = service.file(Path::new("cart.js")).unwrap().unwrap();
        assert!(file.comment(&comment.id).is_some());
        assert!(store.files.borrow().get(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn copy_leaves_the_source_alone() {
        let (mut service, _, _) = service();
        let from = SourceText::new("cart.js", CART);
        let to = SourceText::new("notes.txt", "one\n");
        let comment = service.add_comment(&from, NewComment { author: Some("ana".to_string()), ..at(3, "x") }).unwrap();
        let copy = service.copy_comment_to_file(Path::new("cart.js"), &comment.id, &to, 1, None).unwrap();

        assert_ne!(copy.id, comment.id);
        assert_eq!(copy.author, "ana (from cart.js)");
        assert!(service.file(Path::new("cart.js")).unwrap().unwrap().comment(&comment.id).is_some());
        assert!(service.file(Path::new("notes.txt")).unwrap().unwrap().comment(&copy.id).is_some());
    }

    #[test]
    fn open_follows_edits_and_debounces_the_write() {
        let (mut service, store, clock) = service();
        let mut buf = SourceText::new("cart.js", CART);
        let comment = service.add_comment(&buf, at(3, "track me")).unwrap();
        assert_eq!(service.flush().unwrap(), 1);

        buf.replace_text(&format!("// header\n\n{CART}"));
        let results = service.open(&buf).unwrap();
        assert_eq!(results.first().map(|r| r.status), Some(ReconcileStatus::AutoFixed));
        assert_eq!(store.writes.get(), 1);

        clock.advance(Duration::from_secs(3));
        assert_eq!(service.run_due_saves(), 1);
        let files = store.files.borrow();
        let saved = files.get(Path::new("cart.js")).unwrap();
        assert_eq!(saved.marker_for_comment(&comment.id).map(|m| m.line), Some(5));
    }

    #[test]
    fn external_rewrites_survive_the_next_reconcile() {
        let (mut watcher, store, clock) = service();
        let buf = SourceText::new("cart.js", CART);
        let first = watcher.add_comment(&buf, at(3, "first")).unwrap();
        assert_eq!(watcher.flush().unwrap(), 1);

        let mut other = CommentService::from_config(&Config::default(), Box::new(store.clone()), clock.clone());
        let second = other.add_comment(&buf, at(4, "second")).unwrap();
        other.shutdown().unwrap();

        let mut edited = buf.clone();
        edited.replace_text(&format!("// header\n{CART}"));
        watcher.invalidate(Path::new("cart.js"));
        let results = watcher.reconcile(&edited).unwrap();
        assert_eq!(results.len(), 2);
        clock.advance(Duration::from_secs(3));
        assert_eq!(watcher.run_due_saves(), 1);

        let files = store.files.borrow();
        let saved = files.get(Path::new("cart.js")).unwrap();
        assert_eq!(saved.marker_for_comment(&first.id).map(|m| m.line), Some(4));
        assert_eq!(saved.marker_for_comment(&second.id).map(|m| m.line), Some(5));
    }

    #[test]
    fn reconciling_unchanged_code_does_not_dirty_the_file() {
        let (mut service, store, _) = service();
        let buf = SourceText::new("cart.js", CART);
        let _ = service.add_comment(&buf, at(3, "still")).unwrap();
        service.shutdown().unwrap();
        assert_eq!(store.writes.get(), 1);

        let mut reopened = CommentService::from_config(&Config::default(), Box::new(store.clone()), Rc::new(ManualClock::new()));
        let results = reopened.open(&buf).unwrap();
        assert!(results.iter().all(|r| r.status == ReconcileStatus::Valid));
        assert_eq!(reopened.flush().unwrap(), 0);
    }
}
