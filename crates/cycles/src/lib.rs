//! # Thinking Cycles
//!
//! Detects when a reasoning agent starts repeating itself.
//!
//! ## Architecture
//!
//! ```text
//! candidate thought + branch history
//!     │
//!     └──> CompositeDetector (first strategy that fires wins)
//!            ├─ SimilarityStrategy (levenshtein | jaccard | cosine)
//!            │     └─ candidate vs every prior thought, score > threshold
//!            └─ PatternStrategy
//!                  └─ last L thoughts repeat the L before them (L = 2..=5)
//!
//! every pairwise score goes through SimilarityCache (bounded LRU, order-insensitive keys)
//! ```

mod cache;
mod config;
mod detector;
mod similarity;

pub use cache::{CacheStats, SimilarityCache, DEFAULT_CACHE_CAPACITY};
pub use config::{
    DetectorConfig, DEFAULT_MAX_PATTERN_LENGTH, DEFAULT_MIN_PATTERN_LENGTH, DEFAULT_MIN_THOUGHTS,
    DEFAULT_PATTERN_THRESHOLD, DEFAULT_THRESHOLD,
};
pub use detector::{CompositeDetector, CycleMatch, CycleStrategy, PatternStrategy, SimilarityStrategy};
pub use similarity::{
    dice_similarity, jaccard_similarity, levenshtein_distance, levenshtein_similarity, Algorithm,
};
