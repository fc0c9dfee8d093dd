//! Reconciliation: re-derive each ghost marker's line from its anchors and
//! classify how much the result can be trusted.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::buffer::TextBuffer;
use crate::clock::Clock;
use crate::hasher::{self, DriftTieBreak};
use crate::resolver::{Confidence, SymbolAnchorResolver};
use crate::types::{CommentFile, GhostMarker};

/// Why a marker ended in its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileReason {
    /// Symbol found at the recorded line but the line's content changed.
    AstContentUpdated,
    /// Symbol found at the recorded line with unchanged content.
    AstExactMatch,
    /// Several symbols share the anchor's path.
    AstMultipleMatches,
    /// Symbol found at a different line; the marker followed it.
    AstSymbolMoved,
    /// Content found elsewhere within the drift radius.
    FoundDrift,
    /// Content hash still matches at the recorded line.
    HashMatch,
    /// Content matches at the recorded line but the symbol anchor did not resolve.
    HashMatchSymbolMissing,
    /// Nothing matched anywhere in the drift window.
    NoMatchFound,
    /// Same trimmed text at the recorded line under a different hash.
    WhitespaceChange,
}

impl ReconcileReason {
    /// Kebab-case tag, as serialized.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::AstContentUpdated => "ast-content-updated",
            Self::AstExactMatch => "ast-exact-match",
            Self::AstMultipleMatches => "ast-multiple-matches",
            Self::AstSymbolMoved => "ast-symbol-moved",
            Self::FoundDrift => "found-drift",
            Self::HashMatch => "hash-match",
            Self::HashMatchSymbolMissing => "hash-match-symbol-missing",
            Self::NoMatchFound => "no-match-found",
            Self::WhitespaceChange => "whitespace-change",
        };
    }
}

impl fmt::Display for ReconcileReason {
    /// Write the kebab-case tag.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

/// Trust level of a reconciled marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStatus {
    /// Re-anchored with confidence; `line` may have changed.
    AutoFixed,
    /// Lost: no strategy found the code. The marker is flagged orphaned.
    NeedsManualFix,
    /// Several plausible locations; a person should pick one.
    NeedsReview,
    /// Still where it was.
    Valid,
}

impl ReconcileStatus {
    /// Kebab-case tag, as serialized.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::AutoFixed => "auto-fixed",
            Self::NeedsManualFix => "needs-manual-fix",
            Self::NeedsReview => "needs-review",
            Self::Valid => "valid",
        };
    }
}

impl fmt::Display for ReconcileStatus {
    /// Write the kebab-case tag.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

/// Outcome of reconciling one marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    /// Number of candidate locations when ambiguous, otherwise 0 or 1.
    pub candidates: usize,
    /// Marker this result is about.
    pub marker_id: String,
    /// Line after reconciliation, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u32>,
    /// Line before reconciliation.
    pub old_line: u32,
    /// Why.
    pub reason: ReconcileReason,
    /// Classification.
    pub status: ReconcileStatus,
    /// Best guess when ambiguous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_line: Option<u32>,
}

/// What the symbol anchor said, carried from step 1 into the fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolSignal {
    /// The marker had an anchor for a supported language and it did not resolve.
    Missing,
    /// No anchor, unsupported language, or the resolved line was unusable.
    Silent,
}

/// Combines symbol anchors and content anchors to keep markers on the right line.
///
/// Per marker: resolve the symbol anchor; failing that, check the content
/// hash at the recorded line; failing that, search nearby lines. Only the
/// last step can orphan a marker.
pub struct ReconciliationEngine {
    /// Timestamps for `last_verified`.
    clock: Rc<dyn Clock>,
    /// Lines searched either side of the recorded line.
    drift_radius: u32,
    /// Symbol anchor resolution.
    resolver: SymbolAnchorResolver,
    /// Preference among several drift matches.
    tie_break: DriftTieBreak,
}

impl ReconciliationEngine {
    /// Recompute the content and symbol anchors at the marker's current line.
    /// A provider failure keeps the previous symbol anchor.
    pub fn anchor_marker(&mut self, buffer: &dyn TextBuffer, marker: &mut GhostMarker) {
        if let Some(print) = hasher::fingerprint(buffer, marker.line, marker.end_line) {
            print.apply_to(marker);
        }
        match self.resolver.try_create_anchor(buffer, marker.line) {
            Ok(anchor) => marker.ast_anchor = anchor,
            Err(e) => log::warn!("keeping previous symbol anchor for {}: {e}", marker.id),
        }
    }

    /// Mark a marker as confidently placed at `line`.
    fn confirm(&self, marker: &mut GhostMarker) {
        marker.is_orphaned = false;
        marker.last_verified = self.clock.now();
    }

    /// Step 2 and 3: content hash at the recorded line, then drift search.
    fn content_fallback(
        &mut self,
        buffer: &dyn TextBuffer,
        marker: &mut GhostMarker,
        signal: SymbolSignal,
    ) -> ReconciliationResult {
        let old_line = marker.line;
        let verification = hasher::verify_anchor(buffer, marker);
        if verification.matches {
            let whitespace_only = verification.current_hash.as_ref() != Some(&marker.line_hash);
            if whitespace_only && let Some(print) = hasher::update_anchor(buffer, marker) {
                print.apply_to(marker);
            }
            self.confirm(marker);

            if signal == SymbolSignal::Missing {
                log::warn!(
                    "{}: content still at line {old_line} but symbol anchor did not resolve; re-anchoring",
                    marker.id
                );
                self.anchor_marker(buffer, marker);
                return result(marker, old_line, None, ReconcileStatus::AutoFixed, ReconcileReason::HashMatchSymbolMissing);
            }
            let reason = if whitespace_only { ReconcileReason::WhitespaceChange } else { ReconcileReason::HashMatch };
            return result(marker, old_line, None, ReconcileStatus::Valid, reason);
        }

        if let Some(found) = hasher::find_drifted_line(buffer, marker, self.drift_radius, self.tie_break) {
            log::debug!("{}: drifted {old_line} -> {found}", marker.id);
            move_marker(marker, found);
            self.anchor_marker(buffer, marker);
            self.confirm(marker);
            return result(marker, old_line, Some(found), ReconcileStatus::AutoFixed, ReconcileReason::FoundDrift);
        }

        log::info!("{}: no match within {} lines of {old_line}, orphaned", marker.id, self.drift_radius);
        marker.is_orphaned = true;
        return result(marker, old_line, None, ReconcileStatus::NeedsManualFix, ReconcileReason::NoMatchFound);
    }

    /// Engine over a resolver with the given drift settings.
    pub fn new(
        resolver: SymbolAnchorResolver,
        drift_radius: u32,
        tie_break: DriftTieBreak,
        clock: Rc<dyn Clock>,
    ) -> Self {
        return Self {
            clock,
            drift_radius,
            resolver,
            tie_break,
        };
    }

    /// Reconcile every marker in a file. One marker's outcome never stops the sweep.
    pub fn reconcile_file(&mut self, buffer: &dyn TextBuffer, file: &mut CommentFile) -> Vec<ReconciliationResult> {
        let results: Vec<ReconciliationResult> = file
            .ghost_markers
            .iter_mut()
            .map(|marker| return self.reconcile_marker(buffer, marker))
            .collect();
        log::debug!("reconciled {} markers in {}", results.len(), buffer.path().display());
        return results;
    }

    /// Reconcile one marker, updating its line and anchors in place.
    pub fn reconcile_marker(&mut self, buffer: &dyn TextBuffer, marker: &mut GhostMarker) -> ReconciliationResult {
        let old_line = marker.line;
        let Some(anchor) = marker.ast_anchor.clone() else {
            return self.content_fallback(buffer, marker, SymbolSignal::Silent);
        };
        if !self.resolver.is_supported(buffer.language_id()) {
            return self.content_fallback(buffer, marker, SymbolSignal::Silent);
        }

        let resolution = self.resolver.resolve_anchor(buffer, &anchor);
        match (resolution.confidence, resolution.line) {
            (Confidence::Ambiguous, Some(line)) => {
                log::debug!("{}: {}", marker.id, resolution.message);
                return ReconciliationResult {
                    candidates: resolution.matches.len(),
                    marker_id: marker.id.clone(),
                    new_line: None,
                    old_line,
                    reason: ReconcileReason::AstMultipleMatches,
                    status: ReconcileStatus::NeedsReview,
                    suggested_line: Some(line),
                };
            },
            (Confidence::Exact, Some(line)) => {
                let end_line = marker.end_line.map(|_| return line.saturating_add(marker.span()));
                let Some(print) = hasher::fingerprint(buffer, line, end_line) else {
                    log::debug!("{}: symbol resolved past end of buffer", marker.id);
                    return self.content_fallback(buffer, marker, SymbolSignal::Silent);
                };

                if line == old_line {
                    let unchanged = print.line_hash == marker.line_hash;
                    print.apply_to(marker);
                    self.confirm(marker);
                    if unchanged {
                        return result(marker, old_line, None, ReconcileStatus::Valid, ReconcileReason::AstExactMatch);
                    }
                    return result(marker, old_line, None, ReconcileStatus::AutoFixed, ReconcileReason::AstContentUpdated);
                }

                log::debug!("{}: symbol moved {old_line} -> {line}", marker.id);
                move_marker(marker, line);
                print.apply_to(marker);
                self.confirm(marker);
                return result(marker, old_line, Some(line), ReconcileStatus::AutoFixed, ReconcileReason::AstSymbolMoved);
            },
            _ => {
                log::debug!("{}: {}", marker.id, resolution.message);
                return self.content_fallback(buffer, marker, SymbolSignal::Missing);
            },
        }
    }

    /// Symbol resolver, for anchoring new markers.
    pub fn resolver_mut(&mut self) -> &mut SymbolAnchorResolver {
        return &mut self.resolver;
    }
}

/// Shift a marker (and its range end) to start at `line`.
fn move_marker(marker: &mut GhostMarker, line: u32) {
    let span = marker.span();
    marker.line = line;
    if marker.end_line.is_some() {
        marker.end_line = Some(line.saturating_add(span));
    }
}

/// Build a result for a marker that was not ambiguous.
fn result(
    marker: &GhostMarker,
    old_line: u32,
    new_line: Option<u32>,
    status: ReconcileStatus,
    reason: ReconcileReason,
) -> ReconciliationResult {
    return ReconciliationResult {
        candidates: usize::from(status != ReconcileStatus::NeedsManualFix),
        marker_id: marker.id.clone(),
        new_line,
        old_line,
        reason,
        status,
        suggested_line: None,
    };
}
