//! JWKS cache and fetch coalescer (spec.md §4.8).
//!
//! Grounded on the teacher's `frys-cache` caching idiom plus the
//! request-coalescing pattern common across the example pack for
//! collapsing concurrent cache misses into a single upstream fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::error::{GatewayError, Result};

/// A single JSON Web Key, opaque to the gateway beyond its key ID.
#[derive(Debug, Clone)]
pub struct Jwk {
    /// Key ID (`kid`).
    pub kid: String,
    /// Raw key material/JSON, opaque to this crate.
    pub raw: String,
}

/// A fetched key set plus when it was obtained.
#[derive(Debug, Clone)]
pub struct KeySet {
    /// Keys in the set, by `kid`.
    pub keys: HashMap<String, Jwk>,
}

/// External fetch function; production wiring performs the HTTP call to
/// the JWKS endpoint, tests supply a fake.
#[async_trait::async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch the current key set. Any non-2xx response or transport
    /// failure must surface as `Err`.
    async fn fetch(&self) -> Result<KeySet>;
}

enum Slot {
    Ready(Arc<KeySet>),
    /// A fetch is in flight; late arrivals subscribe instead of firing a
    /// second request.
    InFlight(broadcast::Sender<Result<Arc<KeySet>>>),
}

/// A single-entry (per issuer) JWKS cache with concurrent-miss
/// coalescing and a default one-hour TTL.
pub struct JwksCache {
    fetcher: Arc<dyn JwksFetcher>,
    ttl: Duration,
    slot: DashMap<(), (Slot, std::time::Instant)>,
}

impl JwksCache {
    /// Construct a cache around `fetcher` with the default one-hour TTL.
    pub fn new(fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self::with_ttl(fetcher, Duration::from_secs(3600))
    }

    /// Construct a cache with an explicit TTL.
    pub fn with_ttl(fetcher: Arc<dyn JwksFetcher>, ttl: Duration) -> Self {
        Self { fetcher, ttl, slot: DashMap::new() }
    }

    /// Get the current key set, fetching (or joining an in-flight fetch)
    /// on a miss or expiry.
    #[instrument(skip(self))]
    pub async fn get_key_set(&self) -> Result<Arc<KeySet>> {
        if let Some(entry) = self.slot.get(&()) {
            if let (Slot::Ready(ref set), fetched_at) = *entry {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(set));
                }
            }
        }
        self.fetch_coalesced().await
    }

    async fn fetch_coalesced(&self) -> Result<Arc<KeySet>> {
        use dashmap::mapref::entry::Entry;

        // The entry creator must be the one to fetch; a late arrival that
        // merely finds the slot already `InFlight` subscribes instead. A
        // single `or_insert_with` can't tell the two apart (both observe
        // `InFlight` once the closure runs), so match on `Entry` directly.
        enum Next {
            Ready(Arc<KeySet>),
            Subscribe(broadcast::Receiver<Result<Arc<KeySet>>>),
            Fetch,
        }

        let next = match self.slot.entry(()) {
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert((Slot::InFlight(tx), std::time::Instant::now()));
                Next::Fetch
            }
            Entry::Occupied(mut occupied) => {
                let fresh_ready = matches!(occupied.get().0, Slot::Ready(_)) && occupied.get().1.elapsed() < self.ttl;
                if fresh_ready {
                    let Slot::Ready(set) = &occupied.get().0 else { unreachable!() };
                    Next::Ready(Arc::clone(set))
                } else if let Slot::InFlight(sender) = &occupied.get().0 {
                    Next::Subscribe(sender.subscribe())
                } else {
                    let (tx, _rx) = broadcast::channel(1);
                    occupied.insert((Slot::InFlight(tx), std::time::Instant::now()));
                    Next::Fetch
                }
            }
        };

        match next {
            Next::Ready(set) => Ok(set),
            Next::Fetch => self.do_fetch().await,
            Next::Subscribe(mut rx) => match rx.recv().await {
                Ok(result) => result,
                Err(_) => self.do_fetch().await,
            },
        }
    }

    async fn do_fetch(&self) -> Result<Arc<KeySet>> {
        let result = self.fetcher.fetch().await.map(Arc::new);

        let sender = match self.slot.get(&()) {
            Some(entry) => match &entry.0 {
                Slot::InFlight(sender) => Some(sender.clone()),
                Slot::Ready(_) => None,
            },
            None => None,
        };

        match &result {
            Ok(set) => {
                self.slot.insert((), (Slot::Ready(Arc::clone(set)), std::time::Instant::now()));
            }
            Err(_) => {
                self.slot.remove(&());
            }
        }

        if let Some(sender) = sender {
            let _ = sender.send(result.clone());
        }

        result
    }

    /// Force the next `get_key_set` call to fetch, regardless of TTL.
    pub fn invalidate(&self) {
        self.slot.remove(&());
    }

    /// Force an immediate refresh, coalescing with any concurrent caller.
    pub async fn refresh(&self) -> Result<Arc<KeySet>> {
        self.invalidate();
        self.get_key_set().await
    }
}

/// Error used when the configured fetcher reports a non-2xx response.
pub fn fetch_failed(status: u16) -> GatewayError {
    GatewayError::Upstream { reason: format!("jwks endpoint returned status {status}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingFetcher {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl JwksFetcher for CountingFetcher {
        async fn fetch(&self) -> Result<KeySet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(fetch_failed(500));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mut keys = HashMap::new();
            keys.insert("k1".to_string(), Jwk { kid: "k1".into(), raw: "raw".into() });
            Ok(KeySet { keys })
        }
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_fetch() {
        let fetcher = Arc::new(CountingFetcher { calls: AtomicU64::new(0), fail: false });
        let cache = Arc::new(JwksCache::new(fetcher.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get_key_set().await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_not_cached() {
        let fetcher = Arc::new(CountingFetcher { calls: AtomicU64::new(0), fail: true });
        let cache = JwksCache::new(fetcher.clone());

        assert!(cache.get_key_set().await.is_err());
        assert!(cache.get_key_set().await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let fetcher = Arc::new(CountingFetcher { calls: AtomicU64::new(0), fail: false });
        let cache = JwksCache::new(fetcher.clone());

        cache.get_key_set().await.unwrap();
        cache.invalidate();
        cache.get_key_set().await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
