//! C12: normalized-query-keyed memoization with TTL (spec §4.12).
//!
//! Grounded on the teacher's `cache::embedding_cache` (`Mutex`-guarded map
//! with explicit capacity) generalized from LRU-only to LRU+TTL, and on
//! `original_source/src/infrastructure/cache.py`'s `make_key` namespacing
//! convention, ported from Redis keys to an in-process map since Redis
//! itself is out of scope (spec §1).

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A namespace-keyed, TTL-bounded LRU cache over an opaque value type `V`.
/// `increment`-style counters (`cache_hits`/`cache_misses`) are atomic, per
/// spec §5 "Cache: independent per-key atomicity; `increment` is atomic."
pub struct Cache<V: Clone> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
    namespace: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> Cache<V> {
    pub fn new(namespace: impl Into<String>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            namespace: namespace.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// `md5(normalized_query || sorted_params_json)` truncated to 16 hex
    /// chars, prefixed with the cache's namespace.
    pub fn make_key(&self, normalized_query: &str, sorted_params_json: &str) -> String {
        let payload = format!("{normalized_query}{sorted_params_json}");
        let digest = md5::compute(payload.as_bytes());
        let hex = format!("{digest:x}");
        format!("{}:{}", self.namespace, &hex[..16])
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.get(key) {
            if entry.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        inner.pop(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: String, value: V) {
        let mut inner = self.inner.lock().unwrap();
        inner.put(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lower-case, collapse internal whitespace, strip trailing `?!.`, unify
/// quote characters (spec §4.12: "critical for hit rate").
pub fn normalize_query(query: &str) -> String {
    let lowered = query.trim().to_lowercase();
    let collapsed: String = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['?', '!', '.']);
    trimmed
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_query_is_idempotent() {
        let once = normalize_query(" What is RAG? ");
        let twice = normalize_query(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_query_matches_seed_scenario() {
        assert_eq!(normalize_query(" What is RAG? "), normalize_query("what is rag"));
    }

    #[test]
    fn normalize_query_collapses_internal_whitespace() {
        assert_eq!(normalize_query("what   is    hybrid  search"), "what is hybrid search");
    }

    #[test]
    fn normalize_query_unifies_quote_characters() {
        let smart = normalize_query("what\u{2019}s rag\u{2019}s definition");
        assert_eq!(smart, "what's rag's definition");
    }

    #[test]
    fn cache_hit_miss_counters_increment() {
        let cache: Cache<String> = Cache::new("ns", 10, Duration::from_secs(60));
        let key = cache.make_key("q", "{}");
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.cache_misses(), 1);
        cache.put(key.clone(), "answer".to_string());
        assert_eq!(cache.get(&key).as_deref(), Some("answer"));
        assert_eq!(cache.cache_hits(), 1);
    }

    #[test]
    fn cache_entries_expire_after_ttl() {
        let cache: Cache<String> = Cache::new("ns", 10, Duration::from_millis(1));
        let key = cache.make_key("q", "{}");
        cache.put(key.clone(), "answer".to_string());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn make_key_is_namespaced_and_truncated_to_sixteen_hex_chars() {
        let cache: Cache<String> = Cache::new("ragcore", 10, Duration::from_secs(60));
        let key = cache.make_key("what is rag", "{}");
        assert!(key.starts_with("ragcore:"));
        assert_eq!(key.len(), "ragcore:".len() + 16);
    }

    #[test]
    fn make_key_is_deterministic_for_same_inputs() {
        let cache: Cache<String> = Cache::new("ns", 10, Duration::from_secs(60));
        assert_eq!(cache.make_key("q", "{}"), cache.make_key("q", "{}"));
    }
}
