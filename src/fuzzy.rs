//! Fuzzy label matching for OCR output.
//!
//! OCR text is noisy (`l` read as `1`, dropped spaces, trailing counters), so
//! labels are compared with a Ratcliff/Obershelp similarity ratio in `0.0..=1.0`.
//! Candidates that are longer than the label (a row reading "Escalations 12")
//! also get a containment score over label-sized windows, but only when nucleo
//! confirms the label's characters appear in order.

use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Matcher, Utf32Str};

/// Scores that differ by less than this are ties.
const SCORE_EPSILON: f64 = 1e-6;

/// Containment matches rank just below an equally similar whole-line match.
const CONTAINMENT_WEIGHT: f64 = 0.95;

/// Lowercase, keep alphanumerics, collapse everything else to single spaces.
pub fn normalize(text: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Ratcliff/Obershelp: `2 * matched / (len(a) + len(b))` on normalized text.
pub fn similarity(a: &str, b: &str) -> f64 {
    ratio(&normalize(a), &normalize(b))
}

fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(a, b) as f64 / total as f64
}

/// Sum of longest-common-block lengths, recursing left and right of each block.
fn matched_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (start_a, start_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matched_chars(&a[..start_a], &b[..start_b])
        + matched_chars(&a[start_a + len..], &b[start_b + len..])
}

fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    // Rolling DP row: lengths[j + 1] = common suffix length ending at a[i], b[j]
    let mut lengths = vec![0usize; b.len() + 1];
    let mut best = (0, 0, 0);
    for (i, ca) in a.iter().enumerate() {
        let mut prev_diag = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = lengths[j + 1];
            lengths[j + 1] = if ca == cb { prev_diag + 1 } else { 0 };
            prev_diag = above;
            let len = lengths[j + 1];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
    }
    best
}

/// Best similarity of `needle` against any needle-sized window of `haystack`.
fn window_similarity(haystack: &[char], needle: &[char]) -> f64 {
    if needle.is_empty() || haystack.len() <= needle.len() {
        return ratio(haystack, needle);
    }
    haystack
        .windows(needle.len())
        .map(|window| ratio(window, needle))
        .fold(0.0, f64::max)
}

/// True when `needle` fuzzily appears somewhere in `haystack`.
pub fn fuzzy_contains(haystack: &str, needle: &str, threshold: f64) -> bool {
    let needle = normalize(needle);
    if needle.is_empty() {
        return false;
    }
    window_similarity(&normalize(haystack), &needle) >= threshold
}

/// Scores candidates against one label, reusing nucleo buffers across calls.
pub struct LabelMatcher {
    label: Vec<char>,
    pattern: Pattern,
    matcher: Matcher,
    buf: Vec<char>,
}

impl LabelMatcher {
    pub fn new(label: &str) -> Self {
        Self {
            label: normalize(label),
            pattern: Pattern::parse(label, CaseMatching::Ignore, Normalization::Smart),
            matcher: Matcher::new(nucleo_matcher::Config::DEFAULT),
            buf: Vec::with_capacity(64),
        }
    }

    /// Similarity of `candidate` to the label, in `0.0..=1.0`.
    pub fn score(&mut self, candidate: &str) -> f64 {
        let candidate_norm = normalize(candidate);
        let direct = ratio(&self.label, &candidate_norm);
        if candidate_norm.len() <= self.label.len() {
            return direct;
        }

        self.buf.clear();
        let haystack = Utf32Str::new(candidate, &mut self.buf);
        if self.pattern.score(haystack, &mut self.matcher).is_none() {
            return direct;
        }
        let contained = window_similarity(&candidate_norm, &self.label) * CONTAINMENT_WEIGHT;
        direct.max(contained)
    }
}

/// A candidate that cleared the acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub index: usize,
    pub score: f64,
}

/// Highest-scoring candidate at or above `threshold`.
///
/// `candidates` yields `(text, center_y)`. Equal scores go to the candidate
/// vertically closest to `anchor_y`, then to the earlier one.
pub fn best_match<'c>(
    label: &str,
    candidates: impl IntoIterator<Item = (&'c str, i32)>,
    threshold: f64,
    anchor_y: i32,
) -> Option<BestMatch> {
    let mut matcher = LabelMatcher::new(label);
    let mut best: Option<(BestMatch, i32)> = None;

    for (index, (text, center_y)) in candidates.into_iter().enumerate() {
        let score = matcher.score(text);
        if score < threshold {
            continue;
        }
        let distance = (center_y - anchor_y).abs();
        let better = match &best {
            None => true,
            Some((current, current_distance)) => {
                score > current.score + SCORE_EPSILON
                    || ((score - current.score).abs() <= SCORE_EPSILON
                        && distance < *current_distance)
            }
        };
        if better {
            best = Some((BestMatch { index, score }, distance));
        }
    }
    best.map(|(m, _)| m)
}
