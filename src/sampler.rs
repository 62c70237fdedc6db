//! Hierarchical sampler (spec.md §4.6): resolves an effective trace
//! sampling rate per service/endpoint without ever blocking the request
//! path on a cache miss.
//!
//! Grounded on the teacher's non-blocking-populate idiom in
//! `frys-cache/src/core.rs` (`CacheManager` returns a default while a
//! background refresh runs), adapted to sampling's platform-default
//! fallback instead of a cache-level miss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rand::Rng;
use tracing::{instrument, warn};

use crate::cache::TtlCache;
use crate::model::{EffectiveSamplingRate, SamplingConfig, SamplingSource};

/// Reserved first-path-segment values that never identify a real service;
/// span attribution for these collapses to `"unknown"`.
const RESERVED_SEGMENTS: [&str; 4] = ["admin", "gateway", "auth", "q"];

/// Platform-wide sampling configuration, validated at startup.
#[derive(Debug, Clone, Copy)]
pub struct PlatformSamplingConfig {
    /// Sampling rate used when no service/endpoint override applies, or
    /// while an override is being asynchronously resolved.
    pub default_rate: f64,
    /// Lower clamp for any effective rate.
    pub minimum_rate: f64,
    /// Upper clamp for any effective rate.
    pub maximum_rate: f64,
}

impl PlatformSamplingConfig {
    /// Validate at startup: `default_rate` must lie in `[0, 1]` and
    /// `minimum_rate` must not exceed `maximum_rate`; both are hard
    /// rejections. A `default_rate` outside `[minimum_rate, maximum_rate]`
    /// is only logged, not rejected, per spec.md §9.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.default_rate) {
            return Err(format!("default_rate {} must be within [0, 1]", self.default_rate));
        }
        if self.minimum_rate > self.maximum_rate {
            return Err(format!(
                "minimum_rate {} exceeds maximum_rate {}",
                self.minimum_rate, self.maximum_rate
            ));
        }
        if self.default_rate < self.minimum_rate || self.default_rate > self.maximum_rate {
            warn!(
                default_rate = self.default_rate,
                minimum_rate = self.minimum_rate,
                maximum_rate = self.maximum_rate,
                "default sampling rate falls outside [minimum_rate, maximum_rate]; will be clamped per request"
            );
        }
        Ok(())
    }

    fn clamp(&self, rate: f64) -> f64 {
        rate.clamp(self.minimum_rate, self.maximum_rate)
    }
}

/// Extract the service ID used for sampling attribution from span
/// attributes, trying each in priority order: `http.route` ->
/// `url.path` (query stripped) -> `http.target` (query stripped) ->
/// span name. Reserved segments map to `"unknown"`.
pub fn extract_service_id(
    http_route: Option<&str>,
    url_path: Option<&str>,
    http_target: Option<&str>,
    span_name: &str,
) -> String {
    let candidate = http_route
        .map(first_segment)
        .or_else(|| url_path.map(|p| first_segment(strip_query(p))))
        .or_else(|| http_target.map(|t| first_segment(strip_query(t))))
        .unwrap_or_else(|| first_segment(span_name));

    if RESERVED_SEGMENTS.contains(&candidate.as_str()) || candidate.is_empty() {
        "unknown".to_string()
    } else {
        candidate
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

fn first_segment(path: &str) -> String {
    path.trim_start_matches('/').split('/').next().unwrap_or("").to_string()
}

/// Resolver that caches per-service sampling overrides and never blocks a
/// request on a miss: a cache miss returns the platform default
/// immediately and fires a background populate via `fetch`.
pub struct SamplingResolver<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Option<SamplingConfig>> + Send + 'static,
{
    platform: PlatformSamplingConfig,
    cache: Arc<TtlCache<String, SamplingConfig>>,
    in_flight: Arc<dashmap::DashSet<String>>,
    fetch: Arc<F>,
}

impl<F, Fut> SamplingResolver<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Option<SamplingConfig>> + Send + 'static,
{
    /// Construct a resolver. `fetch` looks up a service's sampling
    /// override (e.g. from the registry) and is only ever invoked in the
    /// background, never inline with request handling.
    pub fn new(platform: PlatformSamplingConfig, fetch: F) -> Self {
        Self {
            platform,
            cache: Arc::new(TtlCache::new(10_000, Duration::from_secs(60), 0.1)),
            in_flight: Arc::new(dashmap::DashSet::new()),
            fetch: Arc::new(fetch),
        }
    }

    /// Resolve the effective sampling rate for `service_id` without
    /// blocking. On a cache hit, returns the cached override immediately.
    /// On a miss, returns the platform default and spawns a background
    /// task to populate the cache for subsequent calls.
    #[instrument(skip(self))]
    pub fn resolve_non_blocking(&self, service_id: &str) -> EffectiveSamplingRate {
        if let Some(cfg) = self.cache.get(&service_id.to_string()) {
            return EffectiveSamplingRate { rate: self.platform.clamp(cfg.rate), source: SamplingSource::Service };
        }

        if self.in_flight.insert(service_id.to_string()) {
            let cache = Arc::clone(&self.cache);
            let in_flight = Arc::clone(&self.in_flight);
            let fetch = Arc::clone(&self.fetch);
            let key = service_id.to_string();
            tokio::spawn(async move {
                if let Some(cfg) = (fetch)(key.clone()).await {
                    cache.put(key.clone(), cfg);
                }
                in_flight.remove(&key);
            });
        }

        EffectiveSamplingRate { rate: self.platform.clamp(self.platform.default_rate), source: SamplingSource::Platform }
    }
}

/// Object-safe facade over [`SamplingResolver`], letting dispatch hold a
/// `&dyn SamplingProvider` without propagating the resolver's `F`/`Fut`
/// generics into its own, non-generic context type.
pub trait SamplingProvider: Send + Sync {
    /// See [`SamplingResolver::resolve_non_blocking`].
    fn resolve_non_blocking(&self, service_id: &str) -> EffectiveSamplingRate;
}

impl<F, Fut> SamplingProvider for SamplingResolver<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Option<SamplingConfig>> + Send + 'static,
{
    fn resolve_non_blocking(&self, service_id: &str) -> EffectiveSamplingRate {
        SamplingResolver::resolve_non_blocking(self, service_id)
    }
}

/// Draw a boolean sampling decision for `rate` using the process-wide
/// thread-local RNG.
pub fn should_sample(rate: f64) -> bool {
    rand::thread_rng().gen::<f64>() < rate
}

static DRAWS: AtomicU64 = AtomicU64::new(0);

/// Record that a sampling draw occurred, for diagnostics only.
pub fn record_draw() -> u64 {
    DRAWS.fetch_add(1, Ordering::Relaxed) + 1
}

/// Process-wide handoff slot so a single global sampler instance can be
/// installed once at startup and read from anywhere without passing it
/// through every call site (spec.md §4.6's parent-based propagation needs
/// a single shared decision point).
static GLOBAL_DEFAULT_RATE: OnceLock<f64> = OnceLock::new();

/// Install the platform default sampling rate globally. Returns `false`
/// if a rate was already installed (it is write-once).
pub fn install_global_default_rate(rate: f64) -> bool {
    GLOBAL_DEFAULT_RATE.set(rate).is_ok()
}

/// Read the globally installed default rate, if any.
pub fn global_default_rate() -> Option<f64> {
    GLOBAL_DEFAULT_RATE.get().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_prefers_http_route_over_others() {
        let id = extract_service_id(Some("/orders/{id}"), Some("/ignored"), None, "ignored");
        assert_eq!(id, "orders");
    }

    #[test]
    fn extract_falls_back_to_url_path_with_query_stripped() {
        let id = extract_service_id(None, Some("/billing/invoices?x=1"), None, "ignored");
        assert_eq!(id, "billing");
    }

    #[test]
    fn extract_maps_reserved_segment_to_unknown() {
        let id = extract_service_id(Some("/admin/users"), None, None, "ignored");
        assert_eq!(id, "unknown");
    }

    #[test]
    fn validate_rejects_out_of_range_default() {
        let cfg = PlatformSamplingConfig { default_rate: 1.5, minimum_rate: 0.0, maximum_rate: 1.0 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_min_above_max() {
        let cfg = PlatformSamplingConfig { default_rate: 0.1, minimum_rate: 0.5, maximum_rate: 0.2 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_warns_but_accepts_default_outside_clamp_range() {
        let cfg = PlatformSamplingConfig { default_rate: 0.9, minimum_rate: 0.0, maximum_rate: 0.5 };
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn miss_returns_platform_default_and_populates_cache() {
        let platform = PlatformSamplingConfig { default_rate: 0.25, minimum_rate: 0.0, maximum_rate: 1.0 };
        let resolver = SamplingResolver::new(platform, |_service_id| async { Some(SamplingConfig { rate: 0.75 }) });

        let first = resolver.resolve_non_blocking("svc");
        assert_eq!(first.source, SamplingSource::Platform);
        assert_eq!(first.rate, 0.25);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = resolver.resolve_non_blocking("svc");
        assert_eq!(second.source, SamplingSource::Service);
        assert_eq!(second.rate, 0.75);
    }

    #[test]
    fn install_global_default_rate_is_write_once() {
        assert!(install_global_default_rate(0.1) || global_default_rate().is_some());
    }
}
