//! Jaccard token-set similarity, used to suppress duplicate search results
//! that differ only cosmetically (punctuation, casing, a trailing venue
//! tag) across the alternative queries a degraded search tries.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

pub fn calculate_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

fn tokenize(s: &str) -> HashSet<String> {
    // Fold accented characters (e.g. "naive" vs "naïve") to their base
    // form before comparing, so titles differing only by diacritics still
    // count as a match.
    s.nfkd()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Deduplicates by pairwise title similarity; the first-seen result wins.
pub fn dedup_by_title<T>(items: Vec<T>, threshold: f64, title: impl Fn(&T) -> &str) -> Vec<T> {
    let mut kept: Vec<T> = Vec::new();
    for item in items {
        let is_dup = kept
            .iter()
            .any(|k| calculate_similarity(title(k), title(&item)) >= threshold);
        if !is_dup {
            kept.push(item);
        }
    }
    kept
}
