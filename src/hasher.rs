//! Content hashing for change detection.
//!
//! Every document is digested three ways, each answering "did anything
//! change" at a different sensitivity:
//!
//! - **content** — SHA-256 of the trimmed text verbatim. Any byte-level
//!   difference flips it. Kept for completeness and debugging; no pipeline
//!   decision reads it.
//! - **structural** — digest after whitespace and punctuation-spacing
//!   normalization. Ignores cosmetic re-flowing. Gates snapshot creation.
//! - **fingerprint** — digest after additionally stripping dates, version
//!   numbers, and copyright years. A document that is merely re-dated keeps
//!   its fingerprint, so formatting-only rollovers never reach the AI step.
//!   Gates diff generation.
//!
//! Hashing the empty string yields an empty-string sentinel; comparisons
//! against the sentinel always resolve to "changed" so downstream re-processes
//! rather than silently skipping.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The three digests of one document, by sensitivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHashes {
    pub content: String,
    pub structural: String,
    pub fingerprint: String,
}

/// Per-digest comparison outcome. A missing hash on either side counts as
/// changed for that digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashChanges {
    pub content: bool,
    pub structural: bool,
    pub fingerprint: bool,
}

/// Content hasher with the normalization machinery compiled once.
pub struct ContentHasher {
    whitespace_runs: Regex,
    blank_lines: Regex,
    space_before_punct: Regex,
    missing_space_after_punct: Regex,
    date_patterns: Vec<Regex>,
    version_word: Regex,
    version_short: Regex,
    copyright_year: Regex,
}

impl ContentHasher {
    pub fn new() -> Self {
        let date_patterns = [
            // "updated:"/"modified"/"revised" prefixed dates, month names
            r"(?i)\b(?:updated|modified|revised)\s*:?\s*(?:on\s+)?(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4}",
            r"(?i)\b(?:updated|modified|revised)\s*:?\s*(?:on\s+)?(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\.?\s+\d{1,2},?\s+\d{4}",
            // Prefixed numeric dates, both orders
            r"(?i)\b(?:updated|modified|revised)\s*:?\s*(?:on\s+)?\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}",
            r"(?i)\b(?:updated|modified|revised)\s*:?\s*(?:on\s+)?\d{4}[/\-.]\d{1,2}[/\-.]\d{1,2}",
            // Standalone dates
            r"(?i)\b(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4}",
            r"\b\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}\b",
            r"\b\d{4}[/\-.]\d{1,2}[/\-.]\d{1,2}\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static date pattern"))
        .collect();

        Self {
            whitespace_runs: Regex::new(r"\s+").expect("static pattern"),
            blank_lines: Regex::new(r"\n\s*\n+").expect("static pattern"),
            space_before_punct: Regex::new(r" +([,.;:!?])").expect("static pattern"),
            missing_space_after_punct: Regex::new(r"([,.;:!?])([A-Za-z])").expect("static pattern"),
            date_patterns,
            version_word: Regex::new(r"(?i)\bversion\s+\d+(?:\.\d+)*").expect("static pattern"),
            version_short: Regex::new(r"(?i)\bv\d+(?:\.\d+)*").expect("static pattern"),
            copyright_year: Regex::new(r"(?i)copyright\s+©?\s*\d{4}(?:-\d{4})?")
                .expect("static pattern"),
        }
    }

    /// Digest `content` under all three sensitivity levels.
    ///
    /// Pure and deterministic. Empty input maps to the empty-string sentinel
    /// for every digest.
    pub fn generate_all_hashes(&self, content: &str) -> DocumentHashes {
        DocumentHashes {
            content: self.digest(content.trim()),
            structural: self.digest(&self.normalize_structural(content)),
            fingerprint: self.digest(&self.normalize_fingerprint(content)),
        }
    }

    fn digest(&self, processed: &str) -> String {
        if processed.is_empty() {
            return String::new();
        }
        let mut hasher = Sha256::new();
        hasher.update(processed.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Collapse whitespace runs, normalize paragraph breaks and punctuation
    /// spacing, strip trailing spaces.
    fn normalize_structural(&self, content: &str) -> String {
        let content = self.whitespace_runs.replace_all(content, " ");
        let content = self.blank_lines.replace_all(&content, "\n\n");
        let content = content
            .split('\n')
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n");
        let content = self.space_before_punct.replace_all(&content, "$1");
        let content = self
            .missing_space_after_punct
            .replace_all(&content, "$1 $2");
        content.trim().to_string()
    }

    /// Structural normalization plus removal of dynamic content: dates,
    /// version numbers, copyright years.
    fn normalize_fingerprint(&self, content: &str) -> String {
        let mut content = self.normalize_structural(content);

        for pattern in &self.date_patterns {
            content = pattern.replace_all(&content, "").into_owned();
        }

        content = self.version_word.replace_all(&content, "").into_owned();
        content = self.version_short.replace_all(&content, "").into_owned();
        content = self
            .copyright_year
            .replace_all(&content, "copyright")
            .into_owned();

        // Re-collapse whitespace left behind by the removals
        content = self.whitespace_runs.replace_all(&content, " ").into_owned();
        content = self.blank_lines.replace_all(&content, "\n\n").into_owned();
        content.trim().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a single digest changed between two observations.
///
/// An empty hash on either side means "unknown" and always reads as changed.
pub fn has_changed(old_hash: &str, new_hash: &str) -> bool {
    if old_hash.is_empty() || new_hash.is_empty() {
        return true;
    }
    old_hash != new_hash
}

/// Per-digest comparison of two hash sets.
pub fn compare_hashes(old: &DocumentHashes, new: &DocumentHashes) -> HashChanges {
    HashChanges {
        content: has_changed(&old.content, &new.content),
        structural: has_changed(&old.structural, &new.structural),
        fingerprint: has_changed(&old.fingerprint, &new.fingerprint),
    }
}

/// A new dated snapshot is warranted when the structural digest moved.
pub fn should_create_snapshot(old: &DocumentHashes, new: &DocumentHashes) -> bool {
    compare_hashes(old, new).structural
}

/// An AI summary is warranted when the fingerprint digest moved.
pub fn should_generate_diff(old: &DocumentHashes, new: &DocumentHashes) -> bool {
    compare_hashes(old, new).fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_deterministic() {
        let hasher = ContentHasher::new();
        let a = hasher.generate_all_hashes("Terms of Service. Section 1.");
        let b = hasher.generate_all_hashes("Terms of Service. Section 1.");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_yields_sentinel_for_all_types() {
        let hasher = ContentHasher::new();
        let hashes = hasher.generate_all_hashes("");
        assert_eq!(hashes.content, "");
        assert_eq!(hashes.structural, "");
        assert_eq!(hashes.fingerprint, "");

        // Comparisons against the sentinel always resolve to "changed"
        let other = hasher.generate_all_hashes("some text");
        let changes = compare_hashes(&hashes, &other);
        assert!(changes.content && changes.structural && changes.fingerprint);
        let same = compare_hashes(&hashes, &hashes);
        assert!(same.content && same.structural && same.fingerprint);
    }

    #[test]
    fn whitespace_reflow_keeps_structural_hash() {
        let hasher = ContentHasher::new();
        let a = hasher.generate_all_hashes("Terms apply.  You   agree.");
        let b = hasher.generate_all_hashes("Terms apply.\nYou agree.");
        assert_ne!(a.content, b.content);
        assert_eq!(a.structural, b.structural);
    }

    #[test]
    fn punctuation_spacing_is_normalized() {
        let hasher = ContentHasher::new();
        let a = hasher.generate_all_hashes("You agree , fully.Then proceed.");
        let b = hasher.generate_all_hashes("You agree, fully. Then proceed.");
        assert_eq!(a.structural, b.structural);
    }

    #[test]
    fn redating_keeps_fingerprint_but_moves_structural() {
        let hasher = ContentHasher::new();
        let a = hasher.generate_all_hashes("Terms v1.2. Updated: January 1, 2024. You agree.");
        let b = hasher.generate_all_hashes("Terms v1.3. Updated: March 15, 2024. You agree.");
        assert_ne!(a.structural, b.structural);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn numeric_dates_and_copyright_years_are_stripped() {
        let hasher = ContentHasher::new();
        let a = hasher.generate_all_hashes("Copyright © 2023. Revised 01/02/2023. All rights.");
        let b = hasher.generate_all_hashes("Copyright © 2024. Revised 11/12/2024. All rights.");
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn substantive_edits_move_the_fingerprint() {
        let hasher = ContentHasher::new();
        let a = hasher.generate_all_hashes("We may share your data with partners.");
        let b = hasher.generate_all_hashes("We will never share your data.");
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn gating_functions_follow_their_digest() {
        let hasher = ContentHasher::new();
        let old = hasher.generate_all_hashes("Terms v1. Effective January 1, 2024. You agree.");
        let new = hasher.generate_all_hashes("Terms v2. Effective January 1, 2024. You agree.");
        // Version bump only: structurally different, same fingerprint
        assert!(should_create_snapshot(&old, &new));
        assert!(!should_generate_diff(&old, &new));
    }
}
