//! Positive-result cache
//!
//! Holds successful detections for a fixed time so repeated requests for the
//! same page skip the browser entirely. Negative results are never stored.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use swprobe_core::DetectionResult;
use tracing::trace;
use url::Url;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses, expired entries included
    pub misses: u64,

    /// Number of entries dropped because they outlived the TTL
    pub expired: u64,

    /// Current number of cached results
    pub count: usize,
}

impl CacheStats {
    /// Get the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct Inner {
    entries: LruCache<String, (DetectionResult, Instant)>,
    stats: CacheStats,
}

/// Concurrency-safe cache of positive detections with a TTL.
pub struct SuccessCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl SuccessCache {
    /// Create a cache holding at most `capacity` results for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            ttl,
        }
    }

    /// Normalized key for a target: the URL without its fragment.
    pub fn key(url: &Url) -> String {
        let mut key = url.clone();
        key.set_fragment(None);
        key.into()
    }

    // A panic while holding the lock can't leave the map half-updated
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh cached result for `url`, if any.
    pub fn get(&self, url: &Url) -> Option<DetectionResult> {
        let key = Self::key(url);
        let mut guard = self.lock();
        let inner = &mut *guard;

        let lookup = inner
            .entries
            .get(&key)
            .map(|(result, stored_at)| (result.clone(), stored_at.elapsed() < self.ttl));

        match lookup {
            Some((result, true)) => {
                inner.stats.hits += 1;
                trace!(key = %key, "Cache hit");
                Some(result)
            }
            Some((_, false)) => {
                inner.entries.pop(&key);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                inner.stats.count = inner.entries.len();
                trace!(key = %key, "Cache entry expired");
                None
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Store a result. Returns `false` (storing nothing) for negative results.
    ///
    /// Concurrent writers for the same key race benignly; the last one wins.
    pub fn insert(&self, url: &Url, result: &DetectionResult) -> bool {
        if !result.has_service_worker() {
            return false;
        }

        let mut inner = self.lock();
        inner
            .entries
            .put(Self::key(url), (result.clone(), Instant::now()));
        inner.stats.count = inner.entries.len();
        true
    }

    /// Check if a fresh result is cached, without touching statistics or LRU order.
    pub fn contains(&self, url: &Url) -> bool {
        self.lock()
            .entries
            .peek(&Self::key(url))
            .is_some_and(|(_, stored_at)| stored_at.elapsed() < self.ttl)
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.stats.count = 0;
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn positive() -> DetectionResult {
        DetectionResult::found(url("https://example.com/sw.js"))
    }

    #[test]
    fn test_stores_only_positive_results() {
        let cache = SuccessCache::new(8, Duration::from_secs(60));
        let page = url("https://example.com/");

        assert!(!cache.insert(&page, &DetectionResult::not_found("nope")));
        assert!(!cache.insert(&page, &DetectionResult::timed_out("slow")));
        assert!(cache.get(&page).is_none());

        assert!(cache.insert(&page, &positive()));
        assert_eq!(cache.get(&page), Some(positive()));
    }

    #[test]
    fn test_fragment_is_ignored() {
        let cache = SuccessCache::new(8, Duration::from_secs(60));
        cache.insert(&url("https://example.com/app#top"), &positive());

        assert!(cache.contains(&url("https://example.com/app#other")));
        assert!(cache.contains(&url("https://example.com/app")));
        assert!(!cache.contains(&url("https://example.com/app?x=1")));
    }

    #[test]
    fn test_entries_expire() {
        let cache = SuccessCache::new(8, Duration::from_millis(20));
        let page = url("https://example.com/");
        cache.insert(&page, &positive());
        assert!(cache.get(&page).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.contains(&page));
        assert!(cache.get(&page).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = SuccessCache::new(2, Duration::from_secs(60));
        let (a, b, c) = (
            url("https://a.example/"),
            url("https://b.example/"),
            url("https://c.example/"),
        );
        cache.insert(&a, &positive());
        cache.insert(&b, &positive());
        cache.get(&a);
        cache.insert(&c, &positive());

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().count, 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(SuccessCache::new(64, Duration::from_secs(60)));
        let page = url("https://example.com/");

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let page = page.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        cache.insert(&page, &positive());
                        cache.get(&page);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(cache.get(&page), Some(positive()));
        assert_eq!(cache.stats().count, 1);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
