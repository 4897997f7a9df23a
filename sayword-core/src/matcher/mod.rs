//! Decides whether what the child said matches the target word.
//!
//! Every candidate runs through the same cascade, first hit wins:
//!
//! | # | Strategy       | Rule                                                   |
//! |---|----------------|--------------------------------------------------------|
//! | 1 | `Exact`        | equal after [`normalize`]                              |
//! | 2 | `Containment`  | target is a substring of the candidate                 |
//! | 3 | `Homophone`    | both words share a row of the homophone table          |
//! | 4 | `Similarity`   | `(maxLen - lev) / maxLen >= 0.8`                       |
//! | 5 | `EditDistance` | target has at least 4 letters and `lev <= 1`           |
//! | 6 | `Phonetic`     | target has at least 4 letters and the dual codes match |
//!
//! Stages 5 and 6 are gated on the *target's* length: a one-letter slip on a
//! three-letter word ("cat" / "bat") is a different word.
//!
//! Everything here is pure and synchronous.

pub mod distance;
pub mod homophones;
pub mod normalize;
pub mod phonetic;

use serde::{Deserialize, Serialize};

pub use distance::{levenshtein, similarity};
pub use normalize::normalize;

/// Minimum normalized similarity for stage 4.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Shortest target (in letters) for which the fuzzy stages 5 and 6 apply.
pub const FUZZY_MIN_TARGET_LEN: usize = 4;

/// Which cascade stage accepted the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    Exact,
    Containment,
    Homophone,
    Similarity,
    EditDistance,
    Phonetic,
}

/// Outcome of matching a recognition against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: bool,
    pub strategy: Option<MatchStrategy>,
    /// The alternative that matched, as the recognizer produced it.
    pub candidate: Option<String>,
}

impl MatchResult {
    fn miss() -> Self {
        Self {
            matched: false,
            strategy: None,
            candidate: None,
        }
    }
}

/// A single transcript or a ranked n-best list.
pub trait Recognized {
    fn alternatives(&self) -> Vec<&str>;
}

impl Recognized for str {
    fn alternatives(&self) -> Vec<&str> {
        vec![self]
    }
}

impl Recognized for String {
    fn alternatives(&self) -> Vec<&str> {
        vec![self.as_str()]
    }
}

impl<T: AsRef<str>> Recognized for [T] {
    fn alternatives(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<T: AsRef<str>, const N: usize> Recognized for [T; N] {
    fn alternatives(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<T: AsRef<str>> Recognized for Vec<T> {
    fn alternatives(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

/// `true` if any alternative matches `target`.
pub fn matches<R: Recognized + ?Sized>(recognized: &R, target: &str) -> bool {
    evaluate(recognized, target).matched
}

/// Like [`matches`], but reports which alternative and which stage matched.
pub fn evaluate<R: Recognized + ?Sized>(recognized: &R, target: &str) -> MatchResult {
    let target = normalize(target);
    if target.is_empty() {
        return MatchResult::miss();
    }

    for raw in recognized.alternatives() {
        let candidate = normalize(raw);
        if candidate.is_empty() {
            continue;
        }
        if let Some(strategy) = match_normalized(&candidate, &target) {
            return MatchResult {
                matched: true,
                strategy: Some(strategy),
                candidate: Some(raw.to_string()),
            };
        }
    }

    MatchResult::miss()
}

/// Run the cascade for one pre-normalized pair.
pub fn match_normalized(candidate: &str, target: &str) -> Option<MatchStrategy> {
    if candidate == target {
        return Some(MatchStrategy::Exact);
    }
    if candidate.contains(target) {
        return Some(MatchStrategy::Containment);
    }
    if homophones::table().are_homophones(candidate, target) {
        return Some(MatchStrategy::Homophone);
    }
    if similarity(candidate, target) >= SIMILARITY_THRESHOLD {
        return Some(MatchStrategy::Similarity);
    }

    if target.chars().count() < FUZZY_MIN_TARGET_LEN {
        return None;
    }
    if levenshtein(candidate, target) <= 1 {
        return Some(MatchStrategy::EditDistance);
    }
    if phonetic::codes_match(&phonetic::encode(candidate), &phonetic::encode(target)) {
        return Some(MatchStrategy::Phonetic);
    }

    None
}
