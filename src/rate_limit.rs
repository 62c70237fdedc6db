//! Hierarchical rate limiter and resolver (spec.md §4.2).
//!
//! Grounded on the teacher's `RateLimitConfig` shape in `core.rs`; the
//! token-bucket mechanics themselves are new since the teacher only carried
//! rate-limit *configuration*, not an enforcement primitive.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::warn;

use crate::model::{EffectiveRateLimit, EndpointConfig, RateLimitConfig, ServiceRegistration};
use crate::ports::MetricsSink;

/// Which namespace a rate-limit key belongs to, per spec.md §4.2. Keeping
/// these separate means an HTTP burst and a WebSocket message burst never
/// share a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Regular HTTP requests.
    Http,
    /// WebSocket connection-open attempts.
    WsConnection,
    /// WebSocket per-message traffic on an established connection.
    WsMessage,
}

impl LimitKind {
    fn prefix(self) -> &'static str {
        match self {
            LimitKind::Http => "http",
            LimitKind::WsConnection => "ws_connection",
            LimitKind::WsMessage => "ws_message",
        }
    }
}

/// Resolve the effective rate limit for a request by merging platform,
/// service, and endpoint configuration, per-field, then clamping the
/// result to the platform maximum.
pub fn resolve(
    platform_default: &RateLimitConfig,
    platform_max: &RateLimitConfig,
    service: Option<&RateLimitConfig>,
    endpoint: Option<&RateLimitConfig>,
    kind: LimitKind,
) -> EffectiveRateLimit {
    let scoped = |cfg: &RateLimitConfig| -> RateLimitConfig {
        match kind {
            LimitKind::Http => cfg.clone(),
            LimitKind::WsConnection => cfg.ws_connection.as_deref().cloned().unwrap_or_default(),
            LimitKind::WsMessage => cfg.ws_message.as_deref().cloned().unwrap_or_default(),
        }
    };

    let layers = [Some(scoped(platform_default)), service.map(scoped), endpoint.map(scoped)];

    let mut requests_per_window = None;
    let mut window_seconds = None;
    let mut burst_capacity = None;
    for layer in layers.into_iter().flatten() {
        requests_per_window = layer.requests_per_window.or(requests_per_window);
        window_seconds = layer.window_seconds.or(window_seconds);
        burst_capacity = layer.burst_capacity.or(burst_capacity);
    }

    let max = scoped(platform_max);
    let requests_per_window = requests_per_window
        .unwrap_or(1)
        .min(max.requests_per_window.unwrap_or(u32::MAX));
    let window_seconds = window_seconds.unwrap_or(60).min(max.window_seconds.unwrap_or(u32::MAX));
    let burst_capacity = burst_capacity
        .unwrap_or(0)
        .min(max.burst_capacity.unwrap_or(u32::MAX));

    EffectiveRateLimit { requests_per_window, window_seconds, burst_capacity }
}

/// Build the rate-limit key for a request, per the namespace rules in
/// spec.md §4.2 (`http:`, `ws_connection:`, `ws_message:` prefixes keep
/// the three traffic classes from colliding on the same counter).
pub fn build_key(kind: LimitKind, service_id: &str, route_key: &str, client_id: &str) -> String {
    format!("{}:{service_id}:{route_key}:{client_id}", kind.prefix())
}

struct Bucket {
    /// Tokens available, scaled by 1000 for integer atomics (fixed-point).
    tokens_milli: AtomicI64,
    last_refill_unix_ms: AtomicI64,
}

/// Fail-open, in-process token-bucket limiter. A storage/backing failure
/// (there is none here, since state is purely in-memory) would otherwise
/// admit all traffic rather than reject it, per spec.md §4.2; this
/// implementation documents that contract even though the in-memory path
/// cannot itself fail.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Construct an empty limiter.
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    /// Attempt to consume one token from `key`'s bucket under `limit`.
    /// Returns `Ok(())` if admitted, or `Err(retry_after_secs)` if the
    /// bucket is empty.
    pub fn check_and_consume(&self, key: &str, limit: EffectiveRateLimit) -> Result<(), u64> {
        let now_ms = now_unix_ms();
        let capacity_milli = (limit.requests_per_window as i64 + limit.burst_capacity as i64) * 1000;
        let refill_rate_milli_per_ms = if limit.window_seconds == 0 {
            capacity_milli
        } else {
            capacity_milli / (limit.window_seconds as i64 * 1000).max(1)
        };

        let bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens_milli: AtomicI64::new(capacity_milli),
            last_refill_unix_ms: AtomicI64::new(now_ms),
        });

        let last = bucket.last_refill_unix_ms.swap(now_ms, Ordering::SeqCst);
        let elapsed_ms = (now_ms - last).max(0);
        let refill = elapsed_ms.saturating_mul(refill_rate_milli_per_ms.max(1));

        let mut current = bucket.tokens_milli.load(Ordering::SeqCst);
        loop {
            let refilled = (current + refill).min(capacity_milli);
            if refilled < 1000 {
                let window = limit.window_seconds.max(1) as u64;
                return Err(window);
            }
            match bucket.tokens_milli.compare_exchange_weak(
                current,
                refilled - 1000,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Drop all per-connection bucket state on WebSocket close, per
    /// spec.md §4.2's `cleanupConnection`.
    pub fn cleanup_connection(&self, service_id: &str, route_key: &str, client_id: &str) {
        for kind in [LimitKind::WsConnection, LimitKind::WsMessage] {
            self.buckets.remove(&build_key(kind, service_id, route_key, client_id));
        }
    }

    /// Record the outcome of an admission decision for telemetry.
    pub fn record_metric(&self, sink: &dyn MetricsSink, service_id: &str, admitted: bool) {
        sink.counter(
            "rate_limit.decisions",
            1,
            &[("service_id", service_id), ("admitted", if admitted { "true" } else { "false" })],
        );
    }
}

static WARNED_ONCE: AtomicU64 = AtomicU64::new(0);

/// Called by the endpoint/service registration path when a configured
/// limit exceeds the platform maximum -- logged once per process so a
/// misconfigured deploy doesn't flood logs.
pub fn warn_if_exceeds_platform_max(service_id: &str, configured: &RateLimitConfig, platform_max: &RateLimitConfig) {
    let exceeds = matches!(
        (configured.requests_per_window, platform_max.requests_per_window),
        (Some(c), Some(m)) if c > m
    );
    if exceeds && WARNED_ONCE.fetch_add(1, Ordering::Relaxed) < 100 {
        warn!(service_id, "configured rate limit exceeds platform maximum; will be clamped");
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Convenience: resolve effective limits straight from a matched
/// service/endpoint pair.
pub fn resolve_for_route(
    platform_default: &RateLimitConfig,
    platform_max: &RateLimitConfig,
    service: &ServiceRegistration,
    endpoint: &EndpointConfig,
    kind: LimitKind,
) -> EffectiveRateLimit {
    resolve(
        platform_default,
        platform_max,
        service.rate_limit_config.as_ref(),
        endpoint.rate_limit_config.as_ref(),
        kind,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rpw: u32, window: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: Some(rpw),
            window_seconds: Some(window),
            burst_capacity: Some(burst),
            ws_connection: None,
            ws_message: None,
        }
    }

    #[test]
    fn endpoint_overrides_service_overrides_platform() {
        let platform_default = cfg(10, 60, 0);
        let platform_max = cfg(1000, 60, 100);
        let service = cfg(50, 60, 0);
        let endpoint = RateLimitConfig { requests_per_window: Some(20), ..Default::default() };

        let resolved = resolve(&platform_default, &platform_max, Some(&service), Some(&endpoint), LimitKind::Http);
        assert_eq!(resolved.requests_per_window, 20);
        assert_eq!(resolved.window_seconds, 60);
    }

    #[test]
    fn result_is_clamped_to_platform_max() {
        let platform_default = cfg(10, 60, 0);
        let platform_max = cfg(30, 60, 0);
        let service = cfg(500, 60, 0);

        let resolved = resolve(&platform_default, &platform_max, Some(&service), None, LimitKind::Http);
        assert_eq!(resolved.requests_per_window, 30);
    }

    #[test]
    fn ws_message_namespace_uses_nested_override() {
        let mut platform_default = cfg(10, 60, 0);
        platform_default.ws_message = Some(Box::new(cfg(5, 1, 0)));
        let platform_max = cfg(1000, 60, 1000);

        let resolved = resolve(&platform_default, &platform_max, None, None, LimitKind::WsMessage);
        assert_eq!(resolved.requests_per_window, 5);
        assert_eq!(resolved.window_seconds, 1);
    }

    #[test]
    fn build_key_separates_namespaces() {
        let http = build_key(LimitKind::Http, "svc", "GET:/x", "1.2.3.4");
        let ws = build_key(LimitKind::WsMessage, "svc", "GET:/x", "1.2.3.4");
        assert_ne!(http, ws);
        assert!(http.starts_with("http:"));
        assert!(ws.starts_with("ws_message:"));
    }

    #[test]
    fn admits_within_capacity_then_rejects() {
        let limiter = RateLimiter::new();
        let limit = EffectiveRateLimit { requests_per_window: 2, window_seconds: 60, burst_capacity: 0 };
        assert!(limiter.check_and_consume("k", limit).is_ok());
        assert!(limiter.check_and_consume("k", limit).is_ok());
        assert!(limiter.check_and_consume("k", limit).is_err());
    }

    #[test]
    fn cleanup_connection_removes_ws_buckets() {
        let limiter = RateLimiter::new();
        let limit = EffectiveRateLimit { requests_per_window: 5, window_seconds: 60, burst_capacity: 0 };
        let key = build_key(LimitKind::WsConnection, "svc", "ws", "client-1");
        limiter.check_and_consume(&key, limit).unwrap();
        assert!(limiter.buckets.contains_key(&key));
        limiter.cleanup_connection("svc", "ws", "client-1");
        assert!(!limiter.buckets.contains_key(&key));
    }
}
