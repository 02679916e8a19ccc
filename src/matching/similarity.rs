//! String similarity primitives for track matching.
//!
//! Token-based ratios handle word reordering and extra words the way fuzzy
//! title/artist comparisons need; all functions are pure and return a value
//! in `[0.0, 1.0]`.

use std::collections::BTreeSet;

use unicode_normalization::UnicodeNormalization;

/// Normalize a string for comparison: NFKC, lowercase, whitespace split.
pub fn normalize_tokens(s: &str) -> Vec<String> {
    let normalized: String = s.nfkc().collect();
    normalized
        .to_lowercase()
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Indel-normalized similarity: `2 * LCS / (len1 + len2)` over characters.
///
/// Equivalent to one minus the normalized insert/delete edit distance, so
/// identical strings score 1.0 and disjoint strings score 0.0.
pub fn ratio(s1: &str, s2: &str) -> f64 {
    if s1 == s2 {
        return 1.0;
    }
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_length(&a, &b);
    (2.0 * lcs as f64) / ((a.len() + b.len()) as f64)
}

/// Longest common subsequence length, two-row dynamic programming.
fn lcs_length(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity after sorting tokens, so word order does not matter.
///
/// "The Beatles" vs "Beatles, The" compares as "beatles the" on both sides.
pub fn token_sort_ratio(s1: &str, s2: &str) -> f64 {
    let mut tokens1 = normalize_tokens(s1);
    let mut tokens2 = normalize_tokens(s2);
    tokens1.sort();
    tokens2.sort();
    ratio(&tokens1.join(" "), &tokens2.join(" "))
}

/// Set-based similarity tolerant of extra words on either side.
///
/// Compares the shared-token core against each full token set and takes the
/// best score, so "Paranoid Android" vs "Paranoid Android Live 1997" still
/// scores highly.
pub fn token_set_ratio(s1: &str, s2: &str) -> f64 {
    let tokens1: BTreeSet<String> = normalize_tokens(s1).into_iter().collect();
    let tokens2: BTreeSet<String> = normalize_tokens(s2).into_iter().collect();

    if tokens1.is_empty() && tokens2.is_empty() {
        return 1.0;
    }
    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens1
        .intersection(&tokens2)
        .map(String::as_str)
        .collect();
    let diff1: Vec<&str> = tokens1.difference(&tokens2).map(String::as_str).collect();
    let diff2: Vec<&str> = tokens2.difference(&tokens1).map(String::as_str).collect();

    // One side fully contained in the other.
    if !intersection.is_empty() && (diff1.is_empty() || diff2.is_empty()) {
        return 1.0;
    }

    let sect = intersection.join(" ");
    let combined1 = join_nonempty(&sect, &diff1.join(" "));
    let combined2 = join_nonempty(&sect, &diff2.join(" "));

    ratio(&combined1, &combined2)
        .max(ratio(&sect, &combined1))
        .max(ratio(&sect, &combined2))
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}
