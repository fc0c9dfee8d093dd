//! In-memory comment file cache with dirty tracking, bounded LRU eviction,
//! and debounced writes.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::clock::Clock;
use crate::error::Error;
use crate::types::CommentFile;

/// Durable storage behind the cache. Keys are source file paths.
pub trait Persistence {
    /// Remove the stored comment file. Absent files are not an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileIo` if the file exists but cannot be removed.
    fn delete(&self, source: &Path) -> Result<(), Error>;

    /// Load the comment file for `source`, `None` if there is none yet.
    ///
    /// # Errors
    ///
    /// Returns an I/O, validation, or migration error when the stored file
    /// cannot be turned into a valid [`CommentFile`].
    fn read(&self, source: &Path) -> Result<Option<CommentFile>, Error>;

    /// Store `file` as the comment file for `source`.
    ///
    /// # Errors
    ///
    /// Returns an I/O or integrity error if the file cannot be stored.
    fn write(&self, source: &Path, file: &CommentFile) -> Result<(), Error>;
}

/// Counters exposed for observability. No behavior depends on them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Writes fired by the debounce timer.
    pub auto_saves: u64,
    /// Entries with unsaved changes.
    pub dirty: usize,
    /// Entries currently cached.
    pub entries: usize,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Lookups served from memory.
    pub hits: u64,
    /// Lookups that missed memory.
    pub misses: u64,
    /// Writes to persistence of any kind.
    pub writes: u64,
}

impl CacheStats {
    /// Hits as a whole percentage of lookups, 0 when there were none.
    pub fn hit_rate_percent(&self) -> u64 {
        let lookups = self.hits.saturating_add(self.misses);
        return self.hits.saturating_mul(100).checked_div(lookups).unwrap_or(0);
    }
}

/// One cached comment file and its bookkeeping.
#[derive(Debug)]
struct CacheEntry {
    /// The comment file.
    data: CommentFile,
    /// Changed since the last write.
    is_dirty: bool,
    /// When the entry was last written.
    last_saved_at: Option<Instant>,
    /// When the entry entered the cache.
    loaded_at: Instant,
    /// Deadline of the pending debounced write.
    save_due: Option<Instant>,
    /// Bumped on every mutation.
    version: u64,
}

/// Authoritative store of comment files per source path.
///
/// Reads and writes against memory are synchronous. Persistence happens on
/// a per-file debounce: each `set` pushes that file's deadline out by the
/// auto-save delay, and `run_due_saves` writes the files whose deadline has
/// passed. `flush` writes immediately.
pub struct CommentFileCache {
    /// Debounce delay after the last mutation.
    auto_save_delay: Duration,
    /// Time source for deadlines.
    clock: Rc<dyn Clock>,
    /// Entries in recency order.
    entries: LruCache<PathBuf, CacheEntry>,
    /// Soft limit on entries; dirty entries are written before eviction.
    max_entries: usize,
    /// Durable storage.
    persistence: Box<dyn Persistence>,
    /// Counters.
    stats: CacheStats,
}

impl CommentFileCache {
    /// Flush everything dirty, then drop every entry.
    ///
    /// # Errors
    ///
    /// Returns the first write error. Entries are kept when their write failed.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.flush(None)?;
        self.entries.clear();
        return Ok(());
    }

    /// Drop entries past capacity, preferring the least recent clean entry.
    /// A dirty entry is written first; if that fails it stays cached.
    fn evict_overflow(&mut self, keep: &Path) {
        while self.entries.len() > self.max_entries {
            let clean = self
                .entries
                .iter()
                .rev()
                .find(|(path, entry)| return !entry.is_dirty && path.as_path() != keep)
                .map(|(path, _)| return path.clone());
            let victim = match clean {
                Some(path) => path,
                None => {
                    let oldest = self
                        .entries
                        .iter()
                        .rev()
                        .find(|(path, _)| return path.as_path() != keep)
                        .map(|(path, _)| return path.clone());
                    let Some(path) = oldest else {
                        return;
                    };
                    if let Err(e) = self.write_entry(&path) {
                        log::error!("not evicting {}: write failed: {e}", path.display());
                        return;
                    }
                    path
                },
            };
            let _ = self.entries.pop(&victim);
            self.stats.evictions = self.stats.evictions.saturating_add(1);
            log::debug!("evicted {}", victim.display());
        }
    }

    /// Write dirty entries now, bypassing the debounce.
    /// `Some(source)` flushes one file, `None` flushes all.
    ///
    /// # Errors
    ///
    /// Returns the first write error after attempting every file.
    pub fn flush(&mut self, source: Option<&Path>) -> Result<usize, Error> {
        let targets: Vec<PathBuf> = match source {
            Some(path) => vec![path.to_path_buf()],
            None => self.entries.iter().map(|(path, _)| return path.clone()).collect(),
        };

        let mut written = 0_usize;
        let mut first_error = None;
        for path in targets {
            match self.write_entry(&path) {
                Ok(true) => written = written.saturating_add(1),
                Ok(false) => {},
                Err(e) => {
                    log::error!("flush of {} failed: {e}", path.display());
                    first_error.get_or_insert(e);
                },
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if written > 0 {
            log::debug!("flushed {written} comment files");
        }
        return Ok(written);
    }

    /// Cached comment file, if present. Counts a hit or miss.
    pub fn get(&mut self, source: &Path) -> Option<&CommentFile> {
        if self.entries.contains(source) {
            self.stats.hits = self.stats.hits.saturating_add(1);
            return self.entries.get(source).map(|e| return &e.data);
        }
        self.stats.misses = self.stats.misses.saturating_add(1);
        return None;
    }

    /// Cached comment file, loading it from persistence on a miss.
    /// `None` when nothing is stored for `source`.
    ///
    /// # Errors
    ///
    /// Returns the persistence layer's read error.
    pub fn get_or_load(&mut self, source: &Path) -> Result<Option<&CommentFile>, Error> {
        if self.entries.contains(source) {
            return Ok(self.get(source));
        }
        self.stats.misses = self.stats.misses.saturating_add(1);
        let Some(data) = self.persistence.read(source)? else {
            return Ok(None);
        };
        log::debug!("loaded {} ({} comments)", source.display(), data.comments.len());
        let now = self.clock.instant();
        let _ = self.entries.put(source.to_path_buf(), CacheEntry {
            data,
            is_dirty: false,
            last_saved_at: None,
            loaded_at: now,
            save_due: None,
            version: 0,
        });
        self.evict_overflow(source);
        return Ok(self.entries.peek(source).map(|e| return &e.data));
    }

    /// Drop an entry without writing it. Pending debounced writes are cancelled.
    pub fn invalidate(&mut self, source: &Path) {
        if let Some(entry) = self.entries.pop(source)
            && entry.is_dirty
        {
            log::warn!("discarding unsaved changes to {}", source.display());
        }
    }

    /// Whether `source` has unsaved changes.
    pub fn is_dirty(&self, source: &Path) -> bool {
        return self.entries.peek(source).is_some_and(|e| return e.is_dirty);
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    /// Cache over `persistence` holding about `max_entries` files.
    pub fn new(
        persistence: Box<dyn Persistence>,
        max_entries: usize,
        auto_save_delay: Duration,
        clock: Rc<dyn Clock>,
    ) -> Self {
        return Self {
            auto_save_delay,
            clock,
            entries: LruCache::unbounded(),
            max_entries: max_entries.max(1),
            persistence,
            stats: CacheStats::default(),
        };
    }

    /// Earliest pending debounced write.
    pub fn next_save_due(&self) -> Option<Instant> {
        return self.entries.iter().filter_map(|(_, e)| return e.save_due).min();
    }

    /// The persistence layer, for operations that bypass the cache.
    pub fn persistence(&self) -> &dyn Persistence {
        return self.persistence.as_ref();
    }

    /// Install a file that was just written by the caller, as clean.
    /// Any pending debounced write for it is cancelled.
    pub fn put_saved(&mut self, source: &Path, data: CommentFile) {
        let now = self.clock.instant();
        let (version, loaded_at) = self
            .entries
            .peek(source)
            .map_or((1, now), |e| return (e.version.saturating_add(1), e.loaded_at));
        let _ = self.entries.put(source.to_path_buf(), CacheEntry {
            data,
            is_dirty: false,
            last_saved_at: Some(now),
            loaded_at,
            save_due: None,
            version,
        });
        self.evict_overflow(source);
    }

    /// Write every entry whose debounce deadline has passed.
    /// A failed write is logged and rescheduled.
    pub fn run_due_saves(&mut self) -> usize {
        let now = self.clock.instant();
        let due: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, e)| return e.save_due.is_some_and(|at| return at <= now))
            .map(|(path, _)| return path.clone())
            .collect();

        let mut saved = 0_usize;
        for path in due {
            match self.write_entry(&path) {
                Ok(true) => {
                    saved = saved.saturating_add(1);
                    self.stats.auto_saves = self.stats.auto_saves.saturating_add(1);
                    log::debug!("auto-saved {}", path.display());
                },
                Ok(false) => {},
                Err(e) => {
                    log::error!("auto-save of {} failed: {e}", path.display());
                    let retry_at = now.checked_add(self.auto_save_delay);
                    if let Some(entry) = self.entries.peek_mut(&path) {
                        entry.save_due = retry_at;
                    }
                },
            }
        }
        return saved;
    }

    /// Replace the cached file, mark it dirty, and (re)start its save timer.
    pub fn set(&mut self, source: &Path, data: CommentFile) {
        let now = self.clock.instant();
        let (version, loaded_at, last_saved_at) = self.entries.peek(source).map_or((1, now, None), |e| {
            return (e.version.saturating_add(1), e.loaded_at, e.last_saved_at);
        });
        let _ = self.entries.put(source.to_path_buf(), CacheEntry {
            data,
            is_dirty: true,
            last_saved_at,
            loaded_at,
            save_due: now.checked_add(self.auto_save_delay),
            version,
        });
        log::debug!("{} now at version {version}", source.display());
        self.evict_overflow(source);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        return CacheStats {
            dirty: self.entries.iter().filter(|(_, e)| return e.is_dirty).count(),
            entries: self.entries.len(),
            ..self.stats
        };
    }

    /// Mutation count of a cached file.
    pub fn version_of(&self, source: &Path) -> Option<u64> {
        return self.entries.peek(source).map(|e| return e.version);
    }

    /// Write a dirty entry if present and clear its timer.
    /// Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Returns the persistence layer's write error; the entry stays dirty.
    fn write_entry(&mut self, source: &Path) -> Result<bool, Error> {
        let Some(entry) = self.entries.peek_mut(source) else {
            return Ok(false);
        };
        if !entry.is_dirty {
            entry.save_due = None;
            return Ok(false);
        }
        self.persistence.write(source, &entry.data)?;
        entry.is_dirty = false;
        entry.last_saved_at = Some(self.clock.instant());
        entry.save_due = None;
        self.stats.writes = self.stats.writes.saturating_add(1);
        return Ok(true);
    }
}
