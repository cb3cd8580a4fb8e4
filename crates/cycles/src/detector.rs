use crate::cache::SimilarityCache;
use crate::config::DetectorConfig;
use crate::similarity::Algorithm;
use serde::Serialize;
use std::sync::Arc;

/// Diagnostic for a detected cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleMatch {
    /// Strategy that fired
    pub strategy: &'static str,
    /// Index into the history of the matched thought (first thought of the
    /// earlier block for pattern matches)
    pub matched_index: usize,
    /// Similarity that crossed the threshold (lowest pair score for patterns)
    pub score: f64,
    /// Block length for pattern matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_length: Option<usize>,
}

/// One cycle detection algorithm.
pub trait CycleStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pairwise score this strategy compares with.
    fn similarity(&self, a: &str, b: &str) -> f64;

    /// `history` holds prior thoughts oldest first and excludes `candidate`.
    fn detect(&self, history: &[&str], candidate: &str) -> Option<CycleMatch>;
}

/// Flags a candidate that is too close to any single prior thought.
pub struct SimilarityStrategy {
    algorithm: Algorithm,
    threshold: f64,
    min_thoughts: usize,
    cache: Arc<SimilarityCache>,
}

impl SimilarityStrategy {
    pub fn new(
        algorithm: Algorithm,
        threshold: f64,
        min_thoughts: usize,
        cache: Arc<SimilarityCache>,
    ) -> Self {
        Self {
            algorithm,
            threshold,
            min_thoughts,
            cache,
        }
    }
}

impl CycleStrategy for SimilarityStrategy {
    fn name(&self) -> &'static str {
        self.algorithm.as_str()
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        self.cache.similarity(a, b, self.algorithm)
    }

    fn detect(&self, history: &[&str], candidate: &str) -> Option<CycleMatch> {
        if history.len() < self.min_thoughts {
            return None;
        }
        history.iter().enumerate().find_map(|(idx, prior)| {
            let score = self.similarity(candidate, prior);
            (score > self.threshold).then_some(CycleMatch {
                strategy: self.name(),
                matched_index: idx,
                score,
                pattern_length: None,
            })
        })
    }
}

/// Flags a candidate that closes a block repeating the block right before it.
pub struct PatternStrategy {
    min_length: usize,
    max_length: usize,
    threshold: f64,
    cache: Arc<SimilarityCache>,
}

impl PatternStrategy {
    pub fn new(
        min_length: usize,
        max_length: usize,
        threshold: f64,
        cache: Arc<SimilarityCache>,
    ) -> Self {
        Self {
            min_length: min_length.max(1),
            max_length,
            threshold,
            cache,
        }
    }
}

impl CycleStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        self.cache.similarity(a, b, Algorithm::Levenshtein)
    }

    fn detect(&self, history: &[&str], candidate: &str) -> Option<CycleMatch> {
        let mut sequence: Vec<&str> = Vec::with_capacity(history.len() + 1);
        sequence.extend_from_slice(history);
        sequence.push(candidate);
        let n = sequence.len();

        for len in self.min_length..=self.max_length {
            if n < 2 * len {
                break;
            }
            let earlier = &sequence[n - 2 * len..n - len];
            let recent = &sequence[n - len..];
            let mut lowest = f64::INFINITY;
            let repeated = earlier.iter().zip(recent).all(|(a, b)| {
                let score = self.similarity(a, b);
                lowest = lowest.min(score);
                score > self.threshold
            });
            if repeated {
                return Some(CycleMatch {
                    strategy: self.name(),
                    matched_index: n - 2 * len,
                    score: lowest,
                    pattern_length: Some(len),
                });
            }
        }
        None
    }
}

/// Ordered strategy list; a cycle is reported when any strategy fires.
pub struct CompositeDetector {
    strategies: Vec<Box<dyn CycleStrategy>>,
    cache: Arc<SimilarityCache>,
}

impl CompositeDetector {
    pub fn new(cache: Arc<SimilarityCache>) -> Self {
        Self {
            strategies: Vec::new(),
            cache,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        let config = config.clone().normalized();
        let cache = Arc::new(SimilarityCache::with_ttl(
            config.cache_capacity,
            config.cache_ttl(),
        ));
        let mut detector = Self::new(cache.clone());
        for algorithm in &config.algorithms {
            detector.push(Box::new(SimilarityStrategy::new(
                *algorithm,
                config.threshold,
                config.min_thoughts,
                cache.clone(),
            )));
        }
        if config.pattern_detection {
            detector.push(Box::new(PatternStrategy::new(
                config.min_pattern_length,
                config.max_pattern_length,
                config.pattern_threshold,
                cache,
            )));
        }
        detector
    }

    pub fn push(&mut self, strategy: Box<dyn CycleStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn detect_cycle(&self, history: &[&str], candidate: &str) -> Option<CycleMatch> {
        self.strategies
            .iter()
            .find_map(|strategy| strategy.detect(history, candidate))
    }

    pub fn is_cycle(&self, history: &[&str], candidate: &str) -> bool {
        self.detect_cycle(history, candidate).is_some()
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn cache(&self) -> &Arc<SimilarityCache> {
        &self.cache
    }
}

impl std::fmt::Debug for CompositeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeDetector")
            .field("strategies", &self.strategy_names())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn similarity(algorithm: Algorithm, threshold: f64) -> SimilarityStrategy {
        SimilarityStrategy::new(algorithm, threshold, 4, Arc::new(SimilarityCache::new(64)))
    }

    #[test]
    fn repeated_thought_is_a_cycle_once_history_is_warm() {
        let detector = CompositeDetector::from_config(&DetectorConfig {
            pattern_detection: false,
            ..DetectorConfig::default()
        });
        let history = ["plan A"; 4];
        let found = detector.detect_cycle(&history, "plan A").expect("cycle");
        assert_eq!(found.strategy, "levenshtein");
        assert_eq!(found.matched_index, 0);
        assert_eq!(found.score, 1.0);
    }

    #[test]
    fn cold_start_guard_suppresses_similarity_strategies() {
        let strategy = similarity(Algorithm::Levenshtein, 0.8);
        assert!(strategy.detect(&["plan A"; 3], "plan A").is_none());
    }

    #[test]
    fn first_matching_prior_wins() {
        let strategy = similarity(Algorithm::Jaccard, 0.8);
        let history = ["alpha beta", "check the logs", "gamma", "check the logs"];
        let found = strategy.detect(&history, "Check the LOGS").expect("cycle");
        assert_eq!(found.matched_index, 1);
    }

    #[test]
    fn threshold_is_strict() {
        let strategy = similarity(Algorithm::Jaccard, 0.5);
        // "a b c" vs "a b d" scores exactly 0.5.
        assert!(strategy.detect(&["a b d", "x", "y", "z"], "a b c").is_none());
    }

    #[test]
    fn pattern_strategy_finds_two_step_loop() {
        let strategy = PatternStrategy::new(2, 5, 0.7, Arc::new(SimilarityCache::new(64)));
        let history = ["read the config", "run the tests", "read the config"];
        let found = strategy.detect(&history, "run the tests").expect("pattern");
        assert_eq!(found.pattern_length, Some(2));
        assert_eq!(found.matched_index, 0);
    }

    #[test]
    fn pattern_strategy_needs_two_full_blocks() {
        let strategy = PatternStrategy::new(2, 5, 0.7, Arc::new(SimilarityCache::new(64)));
        assert!(strategy.detect(&["step one", "step two"], "step one").is_none());
    }

    #[test]
    fn pattern_strategy_prefers_shortest_block() {
        let strategy = PatternStrategy::new(2, 5, 0.7, Arc::new(SimilarityCache::new(64)));
        let history = ["aaaa", "bbbb", "aaaa", "bbbb", "aaaa", "bbbb", "aaaa"];
        let found = strategy.detect(&history, "bbbb").expect("pattern");
        assert_eq!(found.pattern_length, Some(2));
        assert_eq!(found.matched_index, 4);
    }

    #[test]
    fn pattern_strategy_requires_every_pair() {
        let strategy = PatternStrategy::new(2, 2, 0.7, Arc::new(SimilarityCache::new(64)));
        let history = ["inspect cache layer", "totally different", "inspect cache layer"];
        assert!(strategy.detect(&history, "unrelated closing step").is_none());
    }

    #[test]
    fn composite_shares_one_cache() {
        let detector = CompositeDetector::from_config(&DetectorConfig {
            algorithms: vec![Algorithm::Levenshtein, Algorithm::Jaccard],
            ..DetectorConfig::default()
        });
        assert_eq!(
            detector.strategy_names(),
            vec!["levenshtein", "jaccard", "pattern"]
        );
        assert!(!detector.is_cycle(&["one", "two", "three", "four"], "five"));
        assert!(!detector.cache().is_empty());
    }

    #[test]
    fn empty_composite_never_fires() {
        let detector = CompositeDetector::new(Arc::new(SimilarityCache::default()));
        assert!(!detector.is_cycle(&["x"; 8], "x"));
    }

    proptest! {
        #[test]
        fn proptest_lowering_threshold_only_adds_detections(
            history in proptest::collection::vec("[ab ]{0,6}", 4..8),
            candidate in "[ab ]{0,6}",
            high in 0.0f64..1.0,
            delta in 0.0f64..1.0,
        ) {
            let low = (high - delta).max(0.0);
            let refs: Vec<&str> = history.iter().map(String::as_str).collect();
            for algorithm in Algorithm::ALL {
                let strict = similarity(algorithm, high).detect(&refs, &candidate).is_some();
                let loose = similarity(algorithm, low).detect(&refs, &candidate).is_some();
                prop_assert!(!strict || loose);
            }
        }
    }
}
