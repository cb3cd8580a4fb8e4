use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::similarity::Algorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MIN_THOUGHTS: usize = 4;
pub const DEFAULT_PATTERN_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MIN_PATTERN_LENGTH: usize = 2;
pub const DEFAULT_MAX_PATTERN_LENGTH: usize = 5;

/// Tunables for the composite cycle detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Similarity strategies, checked in this order
    pub algorithms: Vec<Algorithm>,
    /// A prior thought scoring strictly above this is a cycle
    pub threshold: f64,
    /// History length below which similarity strategies stay silent
    pub min_thoughts: usize,
    /// Enables the repeating-block strategy
    pub pattern_detection: bool,
    pub pattern_threshold: f64,
    pub min_pattern_length: usize,
    pub max_pattern_length: usize,
    pub cache_capacity: usize,
    /// Cache entry lifetime; `None` keeps entries until evicted
    pub cache_ttl_secs: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::Levenshtein],
            threshold: DEFAULT_THRESHOLD,
            min_thoughts: DEFAULT_MIN_THOUGHTS,
            pattern_detection: true,
            pattern_threshold: DEFAULT_PATTERN_THRESHOLD,
            min_pattern_length: DEFAULT_MIN_PATTERN_LENGTH,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: None,
        }
    }
}

impl DetectorConfig {
    /// Clamps thresholds into `[0, 1]` and orders the pattern bounds.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.threshold = clamp_unit(self.threshold, DEFAULT_THRESHOLD);
        self.pattern_threshold = clamp_unit(self.pattern_threshold, DEFAULT_PATTERN_THRESHOLD);
        self.min_pattern_length = self.min_pattern_length.max(1);
        if self.max_pattern_length < self.min_pattern_length {
            self.max_pattern_length = self.min_pattern_length;
        }
        self.cache_capacity = self.cache_capacity.max(1);
        let mut seen = Vec::with_capacity(self.algorithms.len());
        self.algorithms.retain(|algorithm| {
            if seen.contains(algorithm) {
                false
            } else {
                seen.push(*algorithm);
                true
            }
        });
        self
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}
