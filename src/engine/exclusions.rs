//! Exclusion-keyword scanning with negation awareness.
//!
//! A keyword counts as present only when it is not immediately preceded
//! (within a 12-character window) by a negation token, so "no water
//! damage" never triggers the water-damage exclusion.

use regex::Regex;
use std::sync::OnceLock;

/// How far back (in characters) to look for a negation before a keyword.
const NEGATION_WINDOW: usize = 12;

fn negation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(no|not|never)\b").unwrap())
}

/// Normalize text for scanning: lowercase, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Is `keyword` present in (already normalized) `text`, un-negated?
fn keyword_present(text: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    let Some(idx) = text.find(keyword) else {
        return false;
    };
    // The byte offset 12 back can land inside a multibyte char; back up
    // to the nearest boundary before slicing.
    let mut window_start = idx.saturating_sub(NEGATION_WINDOW);
    while !text.is_char_boundary(window_start) {
        window_start -= 1;
    }
    let window = &text[window_start..idx];
    !negation_re().is_match(window)
}

/// Scan normalized text for policy exclusion keywords.
///
/// Returns the matched keywords in their original (policy) spelling.
pub fn find_exclusion_hits(text: &str, keywords: &[String]) -> Vec<String> {
    let mut hits = Vec::new();
    for keyword in keywords {
        let normalized = normalize_text(keyword);
        if !normalized.is_empty() && keyword_present(text, &normalized) {
            hits.push(keyword.clone());
        }
    }
    hits
}
