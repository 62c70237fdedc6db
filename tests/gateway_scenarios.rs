//! End-to-end scenarios against the public dispatch/registry/security
//! surface, using the in-memory port fakes from [`aussie_gateway::testutil`].

use std::collections::HashMap;
use std::sync::Arc;

use aussie_gateway::dispatch::{dispatch_gateway, dispatch_pass_through, DispatchContext};
use aussie_gateway::model::{
    AccessConfig, EndpointConfig, EndpointType, GatewayResult, RateLimitConfig, ServiceRegistration, Visibility,
};
use aussie_gateway::ports::{InboundRequest, NullMetricsSink, ProxyResponse};
use aussie_gateway::rate_limit::RateLimiter;
use aussie_gateway::registry::Registry;
use aussie_gateway::sampler::{PlatformSamplingConfig, SamplingResolver};
use aussie_gateway::security::{SecurityEventKind, SecurityMonitor, Thresholds};
use aussie_gateway::testutil::{
    FakeProxyClient, FakeSessionStore, FakeTokenIssuer, FakeTokenValidator, InMemoryServiceRepository,
};
use aussie_gateway::validation::SizeLimits;

fn generous_size_limits() -> SizeLimits {
    SizeLimits { max_body_size: 10 * 1024 * 1024, max_header_size: 8 * 1024, max_total_headers_size: 64 * 1024 }
}

fn permissive_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        requests_per_window: Some(10_000),
        window_seconds: Some(60),
        burst_capacity: Some(1_000),
        ws_connection: None,
        ws_message: None,
    }
}

fn lenient_thresholds() -> Thresholds {
    Thresholds {
        window: std::time::Duration::from_secs(60),
        rate_limit_threshold: 10_000,
        request_flood_count: 10_000,
        high_error_rate_ratio: 1.0,
        brute_force_attempt_count: 1_000,
    }
}

fn request(method: &str, path: &str, headers: &[(&str, &str)]) -> InboundRequest {
    let mut map = HashMap::new();
    for (k, v) in headers {
        map.insert(k.to_string(), v.to_string());
    }
    InboundRequest { method: method.to_string(), path: path.to_string(), query: None, headers: map, content_length: None }
}

fn endpoint(path: &str, methods: &[&str], visibility: Visibility, auth_required: bool) -> EndpointConfig {
    EndpointConfig {
        path: path.to_string(),
        methods: methods.iter().map(|s| s.to_string()).collect(),
        visibility: Some(visibility),
        endpoint_type: EndpointType::Http,
        auth_required: Some(auth_required),
        path_rewrite: None,
        rate_limit_config: None,
        sampling_config: None,
    }
}

fn service(service_id: &str, endpoints: Vec<EndpointConfig>, access_config: Option<AccessConfig>) -> ServiceRegistration {
    ServiceRegistration {
        service_id: service_id.to_string(),
        display_name: service_id.to_string(),
        base_url: "http://backend.internal".to_string(),
        endpoints,
        default_visibility: Visibility::Public,
        default_auth_required: false,
        access_config,
        rate_limit_config: None,
        sampling_config: None,
        permission_policy: None,
        version: 1,
    }
}

/// Scenario: a plain public GET through gateway mode proxies through and
/// the backend's response comes back verbatim.
#[tokio::test]
async fn gateway_mode_proxies_public_get() {
    let repo = Arc::new(InMemoryServiceRepository::default());
    assert!(repo.put_cas(service("orders", vec![endpoint("/orders/{id}", &["GET"], Visibility::Public, false)], None), None).await.unwrap());
    let registry = Registry::new(repo);
    registry.warm().await.unwrap();

    let validator = FakeTokenValidator { valid_token: "tok".into(), subject: "user-1".into() };
    let issuer = FakeTokenIssuer::default();
    let sessions = FakeSessionStore::default();
    let proxy = FakeProxyClient::new(ProxyResponse { status_code: 200, headers: HashMap::new(), body: b"ok".to_vec() });
    let metrics = NullMetricsSink;
    let global_access = AccessConfig::default();
    let size_limits = generous_size_limits();
    let rate_limit_default = permissive_rate_limit();
    let rate_limit_max = permissive_rate_limit();
    let rate_limiter = RateLimiter::new();
    let (security_monitor, _events) = SecurityMonitor::new(lenient_thresholds(), 16);
    let platform = PlatformSamplingConfig { default_rate: 0.0, minimum_rate: 0.0, maximum_rate: 1.0 };
    let sampler = SamplingResolver::new(platform, |_service_id| async { None });

    let ctx = DispatchContext {
        registry: &registry,
        global_access: &global_access,
        token_validator: &validator,
        token_issuer: &issuer,
        session_store: &sessions,
        proxy_client: &proxy,
        metrics: &metrics,
        size_limits: &size_limits,
        rate_limiter: &rate_limiter,
        rate_limit_platform_default: &rate_limit_default,
        rate_limit_platform_max: &rate_limit_max,
        security_monitor: &security_monitor,
        sampler: &sampler,
    };

    let req = request("GET", "/gateway/orders/42", &[]);
    let result = dispatch_gateway(&ctx, &req, "/gateway").await;
    match result {
        GatewayResult::Success { status_code, body, .. } => {
            assert_eq!(status_code, 200);
            assert_eq!(body, b"ok");
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(proxy.calls.lock().unwrap()[0].url, "http://backend.internal/orders/42");
}

/// Scenario: pass-through mode, PRIVATE endpoint restricted by CIDR. A
/// caller outside the allow-list is forbidden; one inside it passes.
#[tokio::test]
async fn pass_through_cidr_restricted_endpoint() {
    let access = AccessConfig { allowed_ips: vec!["10.0.0.0/8".to_string()], ..Default::default() };
    let repo = Arc::new(InMemoryServiceRepository::default());
    assert!(repo
        .put_cas(
            service("billing", vec![endpoint("/invoices", &["GET"], Visibility::Private, false)], Some(access)),
            None
        )
        .await
        .unwrap());
    let registry = Registry::new(repo);
    registry.warm().await.unwrap();

    let validator = FakeTokenValidator { valid_token: "tok".into(), subject: "user-1".into() };
    let issuer = FakeTokenIssuer::default();
    let sessions = FakeSessionStore::default();
    let proxy = FakeProxyClient::new(ProxyResponse { status_code: 200, headers: HashMap::new(), body: vec![] });
    let metrics = NullMetricsSink;
    let global_access = AccessConfig::default();
    let size_limits = generous_size_limits();
    let rate_limit_default = permissive_rate_limit();
    let rate_limit_max = permissive_rate_limit();
    let rate_limiter = RateLimiter::new();
    let (security_monitor, _events) = SecurityMonitor::new(lenient_thresholds(), 16);
    let platform = PlatformSamplingConfig { default_rate: 0.0, minimum_rate: 0.0, maximum_rate: 1.0 };
    let sampler = SamplingResolver::new(platform, |_service_id| async { None });
    let ctx = DispatchContext {
        registry: &registry,
        global_access: &global_access,
        token_validator: &validator,
        token_issuer: &issuer,
        session_store: &sessions,
        proxy_client: &proxy,
        metrics: &metrics,
        size_limits: &size_limits,
        rate_limiter: &rate_limiter,
        rate_limit_platform_default: &rate_limit_default,
        rate_limit_platform_max: &rate_limit_max,
        security_monitor: &security_monitor,
        sampler: &sampler,
    };

    let denied_req = request("GET", "/billing/invoices", &[("X-Forwarded-For", "203.0.113.5")]);
    assert!(matches!(dispatch_pass_through(&ctx, &denied_req).await, GatewayResult::Forbidden { .. }));

    let allowed_req = request("GET", "/billing/invoices", &[("X-Forwarded-For", "10.1.2.3")]);
    assert!(matches!(dispatch_pass_through(&ctx, &allowed_req).await, GatewayResult::Success { .. }));
}

/// Scenario: pass-through against a reserved top-level segment never
/// reaches the registry and is rejected outright.
#[tokio::test]
async fn pass_through_reserved_path_is_rejected() {
    let repo = Arc::new(InMemoryServiceRepository::default());
    let registry = Registry::new(repo);

    let validator = FakeTokenValidator { valid_token: "tok".into(), subject: "user-1".into() };
    let issuer = FakeTokenIssuer::default();
    let sessions = FakeSessionStore::default();
    let proxy = FakeProxyClient::new(ProxyResponse { status_code: 200, headers: HashMap::new(), body: vec![] });
    let metrics = NullMetricsSink;
    let global_access = AccessConfig::default();
    let size_limits = generous_size_limits();
    let rate_limit_default = permissive_rate_limit();
    let rate_limit_max = permissive_rate_limit();
    let rate_limiter = RateLimiter::new();
    let (security_monitor, _events) = SecurityMonitor::new(lenient_thresholds(), 16);
    let platform = PlatformSamplingConfig { default_rate: 0.0, minimum_rate: 0.0, maximum_rate: 1.0 };
    let sampler = SamplingResolver::new(platform, |_service_id| async { None });
    let ctx = DispatchContext {
        registry: &registry,
        global_access: &global_access,
        token_validator: &validator,
        token_issuer: &issuer,
        session_store: &sessions,
        proxy_client: &proxy,
        metrics: &metrics,
        size_limits: &size_limits,
        rate_limiter: &rate_limiter,
        rate_limit_platform_default: &rate_limit_default,
        rate_limit_platform_max: &rate_limit_max,
        security_monitor: &security_monitor,
        sampler: &sampler,
    };

    let req = request("GET", "/admin/users", &[]);
    let result = dispatch_pass_through(&ctx, &req).await;
    assert!(matches!(result, GatewayResult::ReservedPath));
    assert!(proxy.calls.lock().unwrap().is_empty());
}

/// Scenario: registering under a stale `expected_current_version` is
/// rejected as a conflict, and a correctly-versioned retry succeeds.
#[tokio::test]
async fn version_conflict_on_stale_update() {
    let repo = Arc::new(InMemoryServiceRepository::default());
    let registry = Registry::new(repo);

    registry.register(service("orders", vec![], None), None, &[]).await.unwrap();

    let stale_update = registry.register(service("orders", vec![], None), Some(99), &[]).await;
    assert!(matches!(stale_update, Err(aussie_gateway::GatewayError::Conflict { .. })));

    let correct_update = registry.register(service("orders", vec![], None), Some(1), &[]).await;
    assert!(correct_update.is_ok());
}

/// Scenario: repeated authentication failures from the same client raise a
/// brute-force security event once the threshold is crossed.
#[tokio::test]
async fn repeated_auth_failures_raise_brute_force_alert() {
    let thresholds = Thresholds {
        window: std::time::Duration::from_secs(60),
        rate_limit_threshold: 1000,
        request_flood_count: 1000,
        high_error_rate_ratio: 1.0,
        brute_force_attempt_count: 3,
    };
    let (monitor, mut events) = SecurityMonitor::new(thresholds, 16);

    for _ in 0..3 {
        monitor.record_request("198.51.100.7", None, true, true).await;
    }

    let mut saw_brute_force = false;
    while let Ok(event) = events.try_recv() {
        if event.kind == SecurityEventKind::SuspiciousPatternBruteForceAttempt {
            saw_brute_force = true;
            assert_ne!(event.hashed_client_id, "198.51.100.7");
        }
    }
    assert!(saw_brute_force, "expected a brute-force event after 3 auth failures");
}

/// Scenario: the sampler never blocks on a cold cache -- it returns the
/// platform default immediately, then serves the resolved override once
/// the background populate completes.
#[tokio::test]
async fn sampler_resolves_non_blocking_then_converges() {
    let platform = PlatformSamplingConfig { default_rate: 0.2, minimum_rate: 0.0, maximum_rate: 1.0 };
    let resolver = SamplingResolver::new(platform, |service_id| async move {
        if service_id == "checkout" {
            Some(aussie_gateway::model::SamplingConfig { rate: 1.0 })
        } else {
            None
        }
    });

    let immediate = resolver.resolve_non_blocking("checkout");
    assert_eq!(immediate.rate, 0.2);
    assert_eq!(immediate.source, aussie_gateway::model::SamplingSource::Platform);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let converged = resolver.resolve_non_blocking("checkout");
    assert_eq!(converged.rate, 1.0);
    assert_eq!(converged.source, aussie_gateway::model::SamplingSource::Service);
}
