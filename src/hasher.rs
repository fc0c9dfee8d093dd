/// Content anchors: normalized line hashes, three-line fingerprints, and
/// bounded drift search.
use std::cmp::Reverse;

use serde::Deserialize;
use sha2::{Digest as _, Sha256};

use crate::buffer::TextBuffer;
use crate::types::{GhostMarker, LineHash};

/// Hex characters kept from the SHA-256 digest.
const HASH_PREFIX_LEN: usize = 16;

/// Default drift search radius, in lines either side of the recorded line.
pub const DEFAULT_DRIFT_RADIUS: u32 = 10;

/// Outcome of re-checking a marker at its recorded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorVerification {
    /// Hash of what is there now, `None` when the line is out of bounds.
    pub current_hash: Option<LineHash>,
    /// Text there now (range lines joined by `\n`), `None` when out of bounds.
    pub current_text: Option<String>,
    /// Whether the recorded content is still at the recorded line.
    pub matches: bool,
}

/// Marker ids partitioned by [`batch_verify`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchVerification {
    /// Line exists but holds different content.
    pub drifted: Vec<String>,
    /// Line is past the end of the buffer.
    pub missing: Vec<String>,
    /// Content still matches.
    pub valid: Vec<String>,
}

/// How [`find_drifted_line`] picks among several matching lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftTieBreak {
    /// First match in scan order, top of the window down.
    FirstMatch,
    /// Most agreeing neighbour lines, then closest to the recorded line.
    #[default]
    Nearest,
}

/// Content anchor fields for a line or range, ready to write into a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hash of the line, or of the whole range.
    pub line_hash: LineHash,
    /// Trimmed first line.
    pub line_text: String,
    /// Trimmed line after the range, empty at end of file.
    pub next_line_text: String,
    /// Trimmed line before the range, empty at start of file.
    pub prev_line_text: String,
}

impl Fingerprint {
    /// Overwrite a marker's content anchor with this fingerprint.
    pub fn apply_to(self, marker: &mut GhostMarker) {
        marker.line_hash = self.line_hash;
        marker.line_text = self.line_text;
        marker.next_line_text = self.next_line_text;
        marker.prev_line_text = self.prev_line_text;
    }
}

/// Partition markers into valid, drifted, and missing.
pub fn batch_verify(buffer: &dyn TextBuffer, markers: &[GhostMarker]) -> BatchVerification {
    let mut result = BatchVerification::default();
    for marker in markers {
        let verification = verify_anchor(buffer, marker);
        let bucket = if verification.current_text.is_none() {
            &mut result.missing
        } else if verification.matches {
            &mut result.valid
        } else {
            &mut result.drifted
        };
        bucket.push(marker.id.clone());
    }
    return result;
}

/// Number of neighbour lines around a candidate that still agree with the marker.
fn context_agreement(buffer: &dyn TextBuffer, marker: &GhostMarker, start: u32) -> u8 {
    let prev = trimmed_or_empty(buffer, start.checked_sub(1));
    let next = trimmed_or_empty(buffer, start.checked_add(marker.span()).and_then(|e| return e.checked_add(1)));
    let mut score = 0_u8;
    if prev == marker.prev_line_text.trim() {
        score = score.saturating_add(1);
    }
    if next == marker.next_line_text.trim() {
        score = score.saturating_add(1);
    }
    return score;
}

/// Search `[line - radius, line + radius]` for the marker's content.
///
/// Two passes: exact hash match across the whole window, then trimmed
/// first-line text equality. Ranges slide as a block of the same height.
/// Returns the new first line, or `None` if neither pass matches.
pub fn find_drifted_line(
    buffer: &dyn TextBuffer,
    marker: &GhostMarker,
    radius: u32,
    tie_break: DriftTieBreak,
) -> Option<u32> {
    let span = marker.span();
    let last_start = buffer.line_count().checked_sub(span)?;
    let window_start = marker.line.saturating_sub(radius).max(1);
    let window_end = marker.line.saturating_add(radius).min(last_start);
    if window_start > window_end {
        return None;
    }

    let by_hash: Vec<u32> = (window_start..=window_end)
        .filter(|&start| {
            return hash_at(buffer, start, span).is_some_and(|h| return h == marker.line_hash);
        })
        .collect();
    if let Some(found) = pick_candidate(buffer, marker, by_hash, tie_break) {
        return Some(found);
    }

    let wanted = marker.line_text.trim();
    let by_text: Vec<u32> = (window_start..=window_end)
        .filter(|&start| return buffer.line_at(start).is_some_and(|t| return t.trim() == wanted))
        .collect();
    return pick_candidate(buffer, marker, by_text, tie_break);
}

/// Fingerprint the line (or `line..=end_line`) as it stands now.
/// Returns `None` if any line of the range is out of bounds.
pub fn fingerprint(buffer: &dyn TextBuffer, line: u32, end_line: Option<u32>) -> Option<Fingerprint> {
    let end = end_line.unwrap_or(line).max(line);
    let lines = range_lines(buffer, line, end)?;
    let first = lines.first()?.trim().to_string();
    let line_hash = if end == line {
        hash_line(&first)
    } else {
        hash_line_range(&lines)
    };
    return Some(Fingerprint {
        line_hash,
        line_text: first,
        next_line_text: trimmed_or_empty(buffer, end.checked_add(1)),
        prev_line_text: trimmed_or_empty(buffer, line.checked_sub(1)),
    });
}

/// Hash one line: trim, SHA-256, keep the first 16 hex characters.
pub fn hash_line(text: &str) -> LineHash {
    return truncated_digest(text.trim());
}

/// Hash a block of lines: each trimmed, joined by `\n`, then hashed like a line.
pub fn hash_line_range<S: AsRef<str>>(lines: &[S]) -> LineHash {
    let joined = lines
        .iter()
        .map(|l| return l.as_ref().trim())
        .collect::<Vec<_>>()
        .join("\n");
    return truncated_digest(&joined);
}

/// Hash of the block starting at `start` with `span` extra lines.
fn hash_at(buffer: &dyn TextBuffer, start: u32, span: u32) -> Option<LineHash> {
    if span == 0 {
        return buffer.line_at(start).map(hash_line);
    }
    let lines = range_lines(buffer, start, start.checked_add(span)?)?;
    return Some(hash_line_range(&lines));
}

/// Order candidates by the tie-break policy and return the winner.
fn pick_candidate(
    buffer: &dyn TextBuffer,
    marker: &GhostMarker,
    mut candidates: Vec<u32>,
    tie_break: DriftTieBreak,
) -> Option<u32> {
    if tie_break == DriftTieBreak::Nearest && candidates.len() > 1 {
        // Stable sort keeps scan order among full ties.
        candidates.sort_by_key(|&start| {
            return (Reverse(context_agreement(buffer, marker, start)), start.abs_diff(marker.line));
        });
    }
    return candidates.first().copied();
}

/// Lines `start..=end`, or `None` if any is out of bounds.
fn range_lines(buffer: &dyn TextBuffer, start: u32, end: u32) -> Option<Vec<&str>> {
    if start == 0 || start > end {
        return None;
    }
    return (start..=end).map(|n| return buffer.line_at(n)).collect();
}

/// Trimmed text of a line, empty when the line does not exist.
fn trimmed_or_empty(buffer: &dyn TextBuffer, line: Option<u32>) -> String {
    return line
        .and_then(|n| return buffer.line_at(n))
        .map(|t| return t.trim().to_string())
        .unwrap_or_default();
}

/// SHA-256 of already-normalized text, truncated.
fn truncated_digest(normalized: &str) -> LineHash {
    let hex = format!("{:x}", Sha256::digest(normalized.as_bytes()));
    return LineHash(hex.chars().take(HASH_PREFIX_LEN).collect());
}

/// Recompute hash and text at the marker's current line(s).
/// Returns `None` when the recorded position is out of bounds.
pub fn update_anchor(buffer: &dyn TextBuffer, marker: &GhostMarker) -> Option<Fingerprint> {
    return fingerprint(buffer, marker.line, marker.end_line);
}

/// Check whether the marker's content is still at its recorded line.
///
/// A single line matches on hash or, failing that, on trimmed text equality.
/// A range matches on its combined hash only.
pub fn verify_anchor(buffer: &dyn TextBuffer, marker: &GhostMarker) -> AnchorVerification {
    let span = marker.span();
    let Some(end) = marker.line.checked_add(span) else {
        return AnchorVerification { current_hash: None, current_text: None, matches: false };
    };
    let Some(lines) = range_lines(buffer, marker.line, end) else {
        return AnchorVerification { current_hash: None, current_text: None, matches: false };
    };

    let current_text = lines.join("\n");
    if span == 0 {
        let current_hash = hash_line(&current_text);
        let matches = current_hash == marker.line_hash || current_text.trim() == marker.line_text.trim();
        return AnchorVerification {
            current_hash: Some(current_hash),
            current_text: Some(current_text),
            matches,
        };
    }

    let current_hash = hash_line_range(&lines);
    let matches = current_hash == marker.line_hash;
    return AnchorVerification {
        current_hash: Some(current_hash),
        current_text: Some(current_text),
        matches,
    };
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        DriftTieBreak, batch_verify, find_drifted_line, fingerprint, hash_line, hash_line_range,
        verify_anchor,
    };
    use crate::buffer::SourceText;
    use crate::types::GhostMarker;

    fn marker(buffer: &SourceText, id: &str, line: u32, end_line: Option<u32>) -> GhostMarker {
        let print = fingerprint(buffer, line, end_line).unwrap();
        return GhostMarker {
            ast_anchor: None,
            comment_ids: vec!["c1".to_string()],
            end_line,
            id: id.to_string(),
            is_orphaned: false,
            last_verified: Utc::now(),
            line,
            line_hash: print.line_hash,
            line_text: print.line_text,
            next_line_text: print.next_line_text,
            prev_line_text: print.prev_line_text,
        };
    }

    #[test]
    fn hash_is_deterministic_and_trim_insensitive() {
        let line = "let total = price * qty;";
        assert_eq!(hash_line(line), hash_line(line));
        assert_eq!(hash_line(line), hash_line(&format!(" {line} ")));
        assert_eq!(hash_line(line).0.len(), 16);
        assert!(hash_line(line).0.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn range_hash_trims_each_line() {
        assert_eq!(hash_line_range(&["  a", "b  "]), hash_line_range(&["a", "b"]));
        assert_ne!(hash_line_range(&["a", "b"]), hash_line_range(&["b", "a"]));
    }

    #[test]
    fn verify_tolerates_indentation_change() {
        let before = SourceText::new("a.js", "function f() {\n  return 1;\n}");
        let m = marker(&before, "m", 2, None);
        let after = SourceText::new("a.js", "function f() {\n        return 1;\n}");
        assert!(verify_anchor(&after, &m).matches);
    }

    #[test]
    fn verify_out_of_bounds_has_no_text() {
        let buf = SourceText::new("a.js", "a\nb\nc");
        let m = marker(&buf, "m", 3, None);
        let shorter = SourceText::new("a.js", "a");
        let result = verify_anchor(&shorter, &m);
        assert!(!result.matches);
        assert_eq!(result.current_text, None);
        assert_eq!(result.current_hash, None);
    }

    #[test]
    fn verify_range_uses_combined_hash() {
        let buf = SourceText::new("a.js", "a\nb\nc\nd");
        let m = marker(&buf, "m", 2, Some(3));
        assert!(verify_anchor(&buf, &m).matches);
        let edited = SourceText::new("a.js", "a\nb\nx\nd");
        assert!(!verify_anchor(&edited, &m).matches);
    }

    #[test]
    fn drift_recovers_inserted_lines() {
        let body = "function total(items) {\n  let sum = 0;\n  return sum;\n}";
        let before = SourceText::new("a.js", body);
        let m = marker(&before, "m", 2, None);

        let after = SourceText::new("a.js", &format!("// a\n// b\n// c\n{body}"));
        let found = find_drifted_line(&after, &m, 10, DriftTieBreak::Nearest);
        assert_eq!(found, Some(5));
    }

    #[test]
    fn drift_outside_radius_is_not_found() {
        let before = SourceText::new("a.js", "unique_line();");
        let m = marker(&before, "m", 1, None);
        let padding = "x();\n".repeat(20);
        let after = SourceText::new("a.js", &format!("{padding}unique_line();"));
        assert_eq!(find_drifted_line(&after, &m, 10, DriftTieBreak::FirstMatch), None);
        assert_eq!(find_drifted_line(&after, &m, 20, DriftTieBreak::FirstMatch), Some(21));
    }

    #[test]
    fn drift_slides_ranges_as_a_block() {
        let before = SourceText::new("a.js", "a\nb\nc\nd");
        let m = marker(&before, "m", 2, Some(3));
        let after = SourceText::new("a.js", "new\nnew\na\nb\nc\nd");
        assert_eq!(find_drifted_line(&after, &m, 10, DriftTieBreak::Nearest), Some(4));
    }

    #[test]
    fn tie_break_prefers_matching_neighbours_then_distance() {
        // `}` appears on lines 3, 6 and 9; the marker sat on line 6 between
        // `return b;` and `function c() {`.
        let text = "function a() {\n  return a;\n}\nfunction b() {\n  return b;\n}\nfunction c() {\n  return c;\n}";
        let before = SourceText::new("a.js", text);
        let m = marker(&before, "m", 6, None);

        let after = SourceText::new("a.js", &format!("// header\n{text}"));
        assert_eq!(find_drifted_line(&after, &m, 10, DriftTieBreak::Nearest), Some(7));
        assert_eq!(find_drifted_line(&after, &m, 10, DriftTieBreak::FirstMatch), Some(4));
    }

    #[test]
    fn batch_partitions_by_outcome() {
        let before = SourceText::new("a.js", "one\ntwo\nthree");
        let ok = marker(&before, "ok", 1, None);
        let moved = marker(&before, "moved", 2, None);
        let gone = marker(&before, "gone", 3, None);

        let after = SourceText::new("a.js", "one\nchanged");
        let result = batch_verify(&after, &[ok, moved, gone]);
        assert_eq!(result.valid, vec!["ok".to_string()]);
        assert_eq!(result.drifted, vec!["moved".to_string()]);
        assert_eq!(result.missing, vec!["gone".to_string()]);
    }
}
