use crate::similarity::Algorithm;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

type TextDigest = [u8; 32];

/// Cache key with the two text digests in sorted order, so `(a, b)` and `(b, a)`
/// address the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    low: TextDigest,
    high: TextDigest,
    algorithm: Algorithm,
}

impl CacheKey {
    fn new(a: &str, b: &str, algorithm: Algorithm) -> Self {
        let da = digest(a);
        let db = digest(b);
        let (low, high) = if da <= db { (da, db) } else { (db, da) };
        Self {
            low,
            high,
            algorithm,
        }
    }
}

fn digest(text: &str) -> TextDigest {
    Sha256::digest(text.as_bytes()).into()
}

#[derive(Debug, Clone, Copy)]
struct CachedScore {
    score: f64,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheInner {
    entries: LruCache<CacheKey, CachedScore>,
    hits: u64,
    misses: u64,
}

/// Bounded LRU memo of similarity scores keyed on `(text, text, algorithm)`.
///
/// Shared between strategies behind an `Arc`; all methods take `&self`.
pub struct SimilarityCache {
    inner: Mutex<CacheInner>,
    capacity: NonZeroUsize,
    ttl: Option<Duration>,
}

impl SimilarityCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, None)
    }

    pub fn with_ttl(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            capacity,
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A poisoned lock only means a panic happened mid-update; the map itself is intact.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, a: &str, b: &str, algorithm: Algorithm) -> Option<f64> {
        let key = CacheKey::new(a, b, algorithm);
        let mut inner = self.lock();
        let cached = inner.entries.get(&key).copied();
        match cached {
            Some(entry) if self.is_expired(&entry) => {
                inner.entries.pop(&key);
                inner.misses += 1;
                None
            }
            Some(entry) => {
                inner.hits += 1;
                Some(entry.score)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts a score; the least recently accessed entry is evicted on overflow.
    pub fn set(&self, a: &str, b: &str, algorithm: Algorithm, score: f64) {
        let key = CacheKey::new(a, b, algorithm);
        let entry = CachedScore {
            score,
            stored_at: Instant::now(),
        };
        if let Some((evicted, _)) = self.lock().entries.push(key, entry) {
            if evicted != key {
                log::trace!("similarity cache evicted {} entry", evicted.algorithm.as_str());
            }
        }
    }

    /// Cached score, computing and storing it on a miss.
    pub fn similarity(&self, a: &str, b: &str, algorithm: Algorithm) -> f64 {
        if let Some(score) = self.get(a, b, algorithm) {
            return score;
        }
        let score = algorithm.score(a, b);
        self.set(a, b, algorithm, score);
        score
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity.get(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    fn is_expired(&self, entry: &CachedScore) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }
}

impl Default for SimilarityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for SimilarityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityCache")
            .field("stats", &self.stats())
            .field("ttl", &self.ttl)
            .finish()
    }
}
