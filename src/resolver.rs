//! Symbol-path anchors: capture where a line sits in the outline, and find it again.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::buffer::TextBuffer;
use crate::clock::Clock;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::symbols::{DocumentSymbol, LineRange, SymbolProvider, SymbolTree, render_tree};
use crate::types::AstAnchor;

/// Outlines kept at once, least recently used evicted first.
const OUTLINE_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(50) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Result of resolving an anchor against the current outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorResolution {
    /// How much to trust `line`.
    pub confidence: Confidence,
    /// Resolved 1-based line, `None` when not found.
    pub line: Option<u32>,
    /// Spans of every symbol whose path matched.
    pub matches: Vec<LineRange>,
    /// Human-readable explanation.
    pub message: String,
}

impl AnchorResolution {
    /// A `NotFound` resolution with the given explanation.
    fn not_found(message: String) -> Self {
        return Self {
            confidence: Confidence::NotFound,
            line: None,
            matches: Vec::new(),
            message,
        };
    }
}

/// An outline fetched for one buffer version.
struct CachedOutline {
    /// When the provider returned it.
    fetched_at: Instant,
    /// The outline itself.
    tree: Rc<SymbolTree>,
    /// Buffer version it was computed from.
    version: u64,
}

/// Classification of an anchor resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Several symbols share the path; the first was used.
    Ambiguous,
    /// Exactly one symbol has the path.
    Exact,
    /// No symbol has the path, or no outline was available.
    NotFound,
}

/// Hit and miss counts for the outline cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutlineCacheStats {
    /// Outlines currently cached.
    pub entries: usize,
    /// Lookups served from cache.
    pub hits: u64,
    /// Lookups that queried the provider.
    pub misses: u64,
}

/// Builds and resolves [`AstAnchor`]s using an external [`SymbolProvider`].
///
/// Outlines are cached per buffer path and reused while the buffer version
/// is unchanged and the entry is younger than the TTL.
pub struct SymbolAnchorResolver {
    /// Cached outlines keyed by buffer path.
    cache: LruCache<PathBuf, CachedOutline>,
    /// Time source for TTL checks.
    clock: Rc<dyn Clock>,
    /// Cache lookups served without a provider call.
    hits: u64,
    /// Language ids anchoring is enabled for.
    languages: HashSet<String>,
    /// Cache lookups that needed a provider call.
    misses: u64,
    /// Outline source.
    provider: Box<dyn SymbolProvider>,
    /// Backoff for provider failures.
    retry: RetryPolicy,
    /// Maximum age of a cached outline.
    ttl: Duration,
}

impl SymbolAnchorResolver {
    /// Drop every cached outline.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Anchor `line` to the innermost symbol containing it.
    ///
    /// Returns `None` for unsupported languages, when the provider fails after
    /// retries, or when no symbol contains the line (imports, blank lines
    /// between declarations, top-level statements).
    pub fn create_anchor(&mut self, buffer: &dyn TextBuffer, line: u32) -> Option<AstAnchor> {
        return match self.try_create_anchor(buffer, line) {
            Ok(anchor) => anchor,
            Err(e) => {
                log::warn!("anchor for {}:{line} falls back to content hash: {e}", buffer.path().display());
                None
            },
        };
    }

    /// Forget the cached outline for one buffer.
    pub fn invalidate(&mut self, path: &Path) {
        let _ = self.cache.pop(path);
    }

    /// Whether symbol anchoring is enabled for a language id.
    pub fn is_supported(&self, language_id: &str) -> bool {
        return self.languages.contains(language_id);
    }

    /// Resolver over `provider` for the given language ids.
    pub fn new(
        provider: Box<dyn SymbolProvider>,
        languages: impl IntoIterator<Item = String>,
        ttl: Duration,
        retry: RetryPolicy,
        clock: Rc<dyn Clock>,
    ) -> Self {
        return Self {
            cache: LruCache::new(OUTLINE_CACHE_CAPACITY),
            clock,
            hits: 0,
            languages: languages.into_iter().collect(),
            misses: 0,
            provider,
            retry,
            ttl,
        };
    }

    /// Outline for `buffer`, from cache or the provider.
    ///
    /// # Errors
    ///
    /// Returns the provider's last error once retries are exhausted.
    fn outline(&mut self, buffer: &dyn TextBuffer) -> Result<Rc<SymbolTree>, Error> {
        let now = self.clock.instant();
        if let Some(cached) = self.cache.get(buffer.path())
            && cached.version == buffer.version()
            && now.saturating_duration_since(cached.fetched_at) < self.ttl
        {
            self.hits = self.hits.saturating_add(1);
            return Ok(Rc::clone(&cached.tree));
        }

        self.misses = self.misses.saturating_add(1);
        let label = format!("symbol query {}", buffer.path().display());
        let provider = &self.provider;
        let tree = Rc::new(self.retry.run(&label, || return provider.document_symbols(buffer))?);
        self.cache.put(buffer.path().to_path_buf(), CachedOutline {
            fetched_at: self.clock.instant(),
            tree: Rc::clone(&tree),
            version: buffer.version(),
        });
        return Ok(tree);
    }

    /// Find the anchor's symbol path in the current outline.
    ///
    /// One match is `Exact`; several are `Ambiguous` and resolve through the
    /// first in document order. The resolved line is the symbol's first line
    /// plus the anchor offset.
    pub fn resolve_anchor(&mut self, buffer: &dyn TextBuffer, anchor: &AstAnchor) -> AnchorResolution {
        let dotted = anchor.dotted_path();
        if !self.is_supported(buffer.language_id()) {
            return AnchorResolution::not_found(format!(
                "language {} not supported for symbol anchoring",
                buffer.language_id()
            ));
        }

        let tree = match self.outline(buffer) {
            Ok(tree) => tree,
            Err(e) => {
                log::warn!("resolving {dotted} in {}: {e}", buffer.path().display());
                return AnchorResolution::not_found(format!("symbol outline unavailable: {e}"));
            },
        };

        let mut found = Vec::new();
        symbols_by_path(&tree, &anchor.symbol_path, 0, &mut found);
        let matches: Vec<LineRange> = found.iter().map(|s| return s.range).collect();
        let Some(first) = found.first() else {
            log::debug!("{dotted} not found in {}", buffer.path().display());
            return AnchorResolution::not_found(format!("symbol {dotted} not found"));
        };

        let line = first.range.start.saturating_add(anchor.offset);
        if matches.len() > 1 {
            let message = format!("found {} symbols matching {dotted}, using first match", matches.len());
            log::debug!("{message}, line {line}");
            return AnchorResolution {
                confidence: Confidence::Ambiguous,
                line: Some(line),
                matches,
                message,
            };
        }

        return AnchorResolution {
            confidence: Confidence::Exact,
            line: Some(line),
            matches,
            message: format!("symbol {dotted} found"),
        };
    }

    /// Outline cache counters.
    pub fn stats(&self) -> OutlineCacheStats {
        return OutlineCacheStats {
            entries: self.cache.len(),
            hits: self.hits,
            misses: self.misses,
        };
    }

    /// Indented outline of `buffer`, for debugging anchors.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted.
    pub fn symbol_tree(&mut self, buffer: &dyn TextBuffer) -> Result<String, Error> {
        let tree = self.outline(buffer)?;
        return Ok(render_tree(&tree));
    }

    /// Like [`Self::create_anchor`], but reports provider failure separately
    /// from "no symbol here", so callers can keep an existing anchor.
    ///
    /// # Errors
    ///
    /// Returns the provider's last error once retries are exhausted.
    pub fn try_create_anchor(&mut self, buffer: &dyn TextBuffer, line: u32) -> Result<Option<AstAnchor>, Error> {
        if !self.is_supported(buffer.language_id()) {
            log::debug!("{}: {} has no symbol anchors", buffer.path().display(), buffer.language_id());
            return Ok(None);
        }

        let tree = self.outline(buffer)?;
        let Some(found) = innermost_at(&tree, line, &[], None) else {
            log::debug!("{}:{line} is outside every symbol", buffer.path().display());
            return Ok(None);
        };

        let anchor = AstAnchor {
            container_name: found.container.map(String::from),
            offset: line.saturating_sub(found.symbol.range.start),
            symbol_kind: found.symbol.kind,
            symbol_path: found.path,
        };
        log::debug!(
            "{}:{line} anchored to {} (+{})",
            buffer.path().display(),
            anchor.dotted_path(),
            anchor.offset
        );
        return Ok(Some(anchor));
    }
}

/// The symbol an anchor is built from.
struct SymbolAtLine<'a> {
    /// Name of the symbol directly enclosing `symbol`.
    container: Option<&'a str>,
    /// Names from the root down to `symbol`.
    path: Vec<String>,
    /// Deepest symbol containing the line.
    symbol: &'a DocumentSymbol,
}

/// Depth-first search for the deepest symbol containing `line`.
fn innermost_at<'a>(
    symbols: &'a [DocumentSymbol],
    line: u32,
    parent_path: &[String],
    parent_name: Option<&'a str>,
) -> Option<SymbolAtLine<'a>> {
    let symbol = symbols.iter().find(|s| return s.range.contains(line))?;
    let mut path = parent_path.to_vec();
    path.push(symbol.name.clone());

    if let Some(deeper) = innermost_at(&symbol.children, line, &path, Some(symbol.name.as_str())) {
        return Some(deeper);
    }
    return Some(SymbolAtLine {
        container: parent_name,
        path,
        symbol,
    });
}

/// Collect every symbol whose name sequence matches `path` positionally.
///
/// A symbol named `path[depth]` either completes the match or descends to
/// `depth + 1`; any other symbol is skipped over and its children are searched
/// at the same depth.
fn symbols_by_path<'a>(
    symbols: &'a [DocumentSymbol],
    path: &[String],
    depth: usize,
    found: &mut Vec<&'a DocumentSymbol>,
) {
    let Some(target) = path.get(depth) else {
        return;
    };
    let is_last = depth.saturating_add(1) == path.len();

    for symbol in symbols {
        if symbol.name != *target {
            symbols_by_path(&symbol.children, path, depth, found);
            continue;
        }
        if is_last {
            found.push(symbol);
        } else {
            symbols_by_path(&symbol.children, path, depth.saturating_add(1), found);
        }
    }
}
