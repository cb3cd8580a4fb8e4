use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Text similarity algorithm used by a similarity strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Normalized edit distance over Unicode scalar values
    Levenshtein,
    /// Token-set overlap of lowercased whitespace tokens
    Jaccard,
    /// Bigram Dice coefficient, used as a cosine-style string score
    Cosine,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Self::Levenshtein, Self::Jaccard, Self::Cosine];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Levenshtein => "levenshtein",
            Self::Jaccard => "jaccard",
            Self::Cosine => "cosine",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "levenshtein" | "edit" => Some(Self::Levenshtein),
            "jaccard" | "tokens" => Some(Self::Jaccard),
            "cosine" | "dice" => Some(Self::Cosine),
            _ => None,
        }
    }

    /// Uncached similarity in `[0, 1]`. Symmetric in its arguments.
    #[must_use]
    pub fn score(self, a: &str, b: &str) -> f64 {
        match self {
            Self::Levenshtein => levenshtein_similarity(a, b),
            Self::Jaccard => jaccard_similarity(a, b),
            Self::Cosine => dice_similarity(a, b),
        }
    }
}

/// Edit distance between `a` and `b`, counted in chars.
///
/// Single-row dynamic programming; the row spans the shorter input.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return long.len();
    }

    let mut row: Vec<usize> = (0..=short.len()).collect();
    for (i, lc) in long.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(lc != sc);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[short.len()]
}

/// `1 - distance / max(len)`; two empty strings are identical.
#[must_use]
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / max_len as f64
}

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// `|A ∩ B| / |A ∪ B|` over lowercased whitespace tokens.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

fn bigrams(chars: &[char]) -> HashMap<(char, char), usize> {
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Dice coefficient over character bigrams with whitespace removed.
#[must_use]
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let grams_a = bigrams(&a);
    let grams_b = bigrams(&b);
    let shared: usize = grams_a
        .iter()
        .map(|(gram, count)| grams_b.get(gram).map_or(0, |other| (*count).min(*other)))
        .sum();
    (2 * shared) as f64 / (a.len() + b.len() - 2) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn levenshtein_distance_known_values() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn levenshtein_counts_chars_not_bytes() {
        assert_eq!(levenshtein_distance("héllo", "hello"), 1);
        assert!((levenshtein_similarity("héllo", "hello") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_are_identical() {
        assert_eq!(levenshtein_similarity("", ""), 1.0);
        assert_eq!(jaccard_similarity("", "  "), 1.0);
        assert_eq!(dice_similarity("", ""), 1.0);
    }

    #[test]
    fn jaccard_ignores_case_and_order() {
        assert_eq!(jaccard_similarity("Plan A now", "now plan a"), 1.0);
        assert!((jaccard_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn dice_matches_reference_values() {
        assert_eq!(dice_similarity("french", "quebec"), 0.0);
        assert!((dice_similarity("healed", "sealed") - 0.8).abs() < 1e-9);
        assert_eq!(dice_similarity("a", "b"), 0.0);
        assert_eq!(dice_similarity("plan A", "planA"), 1.0);
    }

    #[test]
    fn algorithm_parse_accepts_aliases() {
        assert_eq!(Algorithm::parse(" Dice "), Some(Algorithm::Cosine));
        assert_eq!(Algorithm::parse("levenshtein"), Some(Algorithm::Levenshtein));
        assert_eq!(Algorithm::parse("semantic"), None);
    }

    proptest! {
        #[test]
        fn proptest_every_algorithm_is_symmetric(a in "[a-c ]{0,12}", b in "[a-c ]{0,12}") {
            for algorithm in Algorithm::ALL {
                prop_assert_eq!(algorithm.score(&a, &b), algorithm.score(&b, &a));
            }
        }

        #[test]
        fn proptest_scores_stay_in_unit_range(a in "\\PC{0,16}", b in "\\PC{0,16}") {
            for algorithm in Algorithm::ALL {
                let score = algorithm.score(&a, &b);
                prop_assert!((0.0..=1.0).contains(&score), "{} -> {}", algorithm.as_str(), score);
            }
        }
    }
}
