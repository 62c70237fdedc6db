//! Local cache primitive: a size-bounded, concurrent TTL+LRU cache with
//! jittered expiry (spec.md §4.9).
//!
//! Grounded on the teacher's `frys-cache/src/core.rs` `CacheEntry`/
//! `CacheStats` shape, collapsed from a multi-backend `CacheManager` into
//! a single in-process structure since the spec only calls for one level.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    /// Monotonically increasing "last touched" counter used for LRU
    /// eviction without needing a second data structure per read.
    last_used: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    clock: u64,
}

/// A TTL+LRU cache safe for concurrent access. Each insertion computes
/// `expires_at = now + ttl * (1 + U(-jitter, +jitter))`, per spec.md §4.9.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_entries: usize,
    default_ttl: Duration,
    jitter_factor: f64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache bounded to `max_entries` with the given default TTL
    /// and jitter factor (e.g. `0.1` for ±10%).
    pub fn new(max_entries: usize, default_ttl: Duration, jitter_factor: f64) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), clock: 0 }),
            max_entries,
            default_ttl,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    fn jittered_ttl(&self, ttl: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return ttl;
        }
        let mut rng = rand::thread_rng();
        let delta: f64 = rng.gen_range(-self.jitter_factor..=self.jitter_factor);
        let secs = ttl.as_secs_f64() * (1.0 + delta);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Read a value, returning `None` if absent or expired. A hit bumps
    /// the entry's LRU recency.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let clock = {
            inner.clock += 1;
            inner.clock
        };
        match inner.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = clock;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite a value with the cache's default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite a value with an explicit TTL (still jittered).
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + self.jittered_ttl(ttl);
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            evict_lru(&mut inner.entries);
        }

        inner.entries.insert(key, Entry { value, expires_at, last_used: clock });
    }

    /// Remove a key unconditionally.
    pub fn invalidate(&self, key: &K) {
        self.inner.lock().entries.remove(key);
    }

    /// Current entry count, including not-yet-expired-but-stale entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_lru<K: Eq + Hash + Clone, V>(entries: &mut HashMap<K, Entry<V>>) {
    if let Some(lru_key) = entries
        .iter()
        .min_by_key(|(_, e)| e.last_used)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&lru_key);
    }
}
