//! Gateway and pass-through dispatchers (spec.md §4.5).
//!
//! Grounded on the teacher's `core.rs`/`load_balancing.rs` composition
//! pattern -- a thin orchestrator wiring registry lookup, auth, access
//! control, rate limiting, and the proxy client behind one entry point --
//! generalized from single-upstream load balancing to the gateway's two
//! request shapes, now also carrying the full per-request pipeline (size
//! validation, rate limiting, security monitoring, sampling) spec.md §2
//! requires between route lookup and the terminating metrics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::access_control::{self, AccessDecision};
use crate::auth;
use crate::model::{
    EndpointConfig, EndpointType, GatewayResult, RouteAuthResult, RouteLookupResult, ServiceRegistration, Visibility,
};
use crate::ports::{InboundRequest, MetricsSink, ProxyClient, ProxyRequest, SessionStore, TokenIssuer, TokenValidator};
use crate::rate_limit::{self, LimitKind, RateLimiter};
use crate::registry::{normalize_path, Registry};
use crate::sampler::{self, SamplingProvider};
use crate::security::SecurityMonitor;
use crate::telemetry::metric_names;
use crate::validation::{self, SizeLimits};

/// Hop-by-hop headers stripped before forwarding upstream, per RFC 7230
/// §6.1; none of these are meaningful to relay across a proxy hop.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Collaborators a dispatch call needs; grouped so call sites don't have
/// to thread a dozen separate parameters through every helper.
pub struct DispatchContext<'a> {
    /// Compiled service/route registry.
    pub registry: &'a Registry,
    /// Global access-control allow-list, used when a service declares none.
    pub global_access: &'a crate::model::AccessConfig,
    /// External bearer-token validator.
    pub token_validator: &'a dyn TokenValidator,
    /// External forward-token issuer.
    pub token_issuer: &'a dyn TokenIssuer,
    /// External session store.
    pub session_store: &'a dyn SessionStore,
    /// Outbound HTTP client to the matched backend.
    pub proxy_client: &'a dyn ProxyClient,
    /// Metrics sink for terminating-state counters.
    pub metrics: &'a dyn MetricsSink,
    /// Request size limits, enforced before any routing work.
    pub size_limits: &'a SizeLimits,
    /// Hierarchical token-bucket limiter.
    pub rate_limiter: &'a RateLimiter,
    /// Platform-wide rate limit default, lowest-priority layer.
    pub rate_limit_platform_default: &'a crate::model::RateLimitConfig,
    /// Platform-wide rate limit ceiling, clamps every resolved limit.
    pub rate_limit_platform_max: &'a crate::model::RateLimitConfig,
    /// Sliding-window anomaly monitor.
    pub security_monitor: &'a SecurityMonitor,
    /// Non-blocking sampling rate resolver.
    pub sampler: &'a dyn SamplingProvider,
}

/// Bookkeeping gathered while forwarding a request, carried back to
/// [`terminate`] since [`GatewayResult`] itself has no room for it.
#[derive(Default)]
struct ForwardMetrics {
    latency: Option<Duration>,
    bytes_in: u64,
    bytes_out: u64,
    auth_session_id: Option<String>,
}

/// Dispatch a gateway-mode request, i.e. `/gateway/{rest...}`, where the
/// service is resolved purely from matching registered endpoint patterns
/// across all services (no explicit `service_id` in the path).
#[instrument(skip(ctx, request))]
pub async fn dispatch_gateway(ctx: &DispatchContext<'_>, request: &InboundRequest, gateway_prefix: &str) -> GatewayResult {
    if let Some(violation) = validation::validate(request, ctx.size_limits) {
        return terminate(ctx, violation, "none", &request.method, None, ForwardMetrics::default());
    }

    let Some(rest) = strip_gateway_prefix(&request.path, gateway_prefix) else {
        return terminate(ctx, GatewayResult::RouteNotFound, "none", &request.method, None, ForwardMetrics::default());
    };

    match ctx.registry.find_route_any(&request.method, &rest) {
        RouteLookupResult::Matched(route_match) => {
            let (outcome, fwd) = authorize_and_forward(
                ctx,
                request,
                &route_match.service,
                &route_match.endpoint,
                &route_match.target_path,
                &route_match.path_variables,
            )
            .await;
            terminate(ctx, outcome, &route_match.service.service_id, &request.method, Some(&route_match.endpoint.path), fwd)
        }
        RouteLookupResult::ServiceOnly(_) | RouteLookupResult::None => {
            terminate(ctx, GatewayResult::RouteNotFound, "none", &request.method, None, ForwardMetrics::default())
        }
    }
}

/// Dispatch a pass-through-mode request, i.e. `/{serviceId}/{remainder}`.
/// Unlike gateway mode, an unmatched endpoint pattern still proxies
/// through via a synthesized catch-all (spec.md §4.5) rather than 404ing,
/// as long as the service itself exists and isn't reserved.
#[instrument(skip(ctx, request))]
pub async fn dispatch_pass_through(ctx: &DispatchContext<'_>, request: &InboundRequest) -> GatewayResult {
    if let Some(violation) = validation::validate(request, ctx.size_limits) {
        return terminate(ctx, violation, "none", &request.method, None, ForwardMetrics::default());
    }

    let normalized = normalize_path(&request.path);
    let mut segments = normalized.splitn(3, '/').filter(|s| !s.is_empty());
    let Some(service_id) = segments.next() else {
        return terminate(ctx, GatewayResult::ServiceNotFound, "none", &request.method, None, ForwardMetrics::default());
    };

    if ServiceRegistration::is_reserved_id(service_id) {
        return terminate(ctx, GatewayResult::ReservedPath, service_id, &request.method, None, ForwardMetrics::default());
    }

    let Ok(Some(service)) = ctx.registry.get_service(service_id).await else {
        return terminate(ctx, GatewayResult::ServiceNotFound, service_id, &request.method, None, ForwardMetrics::default());
    };

    let remainder = normalized.splitn(2, &format!("/{service_id}")).nth(1).unwrap_or("").to_string();
    let remainder = if remainder.is_empty() { "/".to_string() } else { remainder };

    let (outcome, fwd, route_pattern) = match ctx.registry.find_route(service_id, &request.method, &remainder) {
        RouteLookupResult::Matched(route_match) => {
            let (outcome, fwd) = authorize_and_forward(
                ctx,
                request,
                &route_match.service,
                &route_match.endpoint,
                &route_match.target_path,
                &route_match.path_variables,
            )
            .await;
            (outcome, fwd, Some(route_match.endpoint.path.clone()))
        }
        RouteLookupResult::ServiceOnly(_) | RouteLookupResult::None => {
            let catch_all = synthesize_catch_all(&service);
            let (outcome, fwd) = authorize_and_forward(ctx, request, &service, &catch_all, &remainder, &HashMap::new()).await;
            (outcome, fwd, None)
        }
    };
    terminate(ctx, outcome, service_id, &request.method, route_pattern.as_deref(), fwd)
}

/// Build the synthetic `/** ` catch-all endpoint used when a pass-through
/// service has no endpoint pattern matching the request. It inherits the
/// service's default visibility/auth and is never persisted.
fn synthesize_catch_all(service: &ServiceRegistration) -> EndpointConfig {
    EndpointConfig {
        path: "/**".to_string(),
        methods: vec!["*".to_string()],
        visibility: Some(service.default_visibility),
        endpoint_type: EndpointType::Http,
        auth_required: Some(service.default_auth_required),
        path_rewrite: None,
        rate_limit_config: None,
        sampling_config: None,
    }
}

/// Rate limit -> access control -> auth -> proxy, per spec.md §2's data
/// flow, with the security monitor and sampler observing along the way.
async fn authorize_and_forward(
    ctx: &DispatchContext<'_>,
    request: &InboundRequest,
    service: &ServiceRegistration,
    endpoint: &EndpointConfig,
    target_path: &str,
    path_variables: &HashMap<String, String>,
) -> (GatewayResult, ForwardMetrics) {
    let client_id = access_control::extract_source_ip(request).unwrap_or_else(|| "unknown".to_string());
    let route_key = format!("{}:{}", request.method, endpoint.path);

    let limit = rate_limit::resolve_for_route(
        ctx.rate_limit_platform_default,
        ctx.rate_limit_platform_max,
        service,
        endpoint,
        LimitKind::Http,
    );
    let bucket_key = rate_limit::build_key(LimitKind::Http, &service.service_id, &route_key, &client_id);
    if let Err(retry_after_secs) = ctx.rate_limiter.check_and_consume(&bucket_key, limit) {
        ctx.rate_limiter.record_metric(ctx.metrics, &service.service_id, false);
        ctx.security_monitor.record_rate_limited(&client_id).await;
        return (GatewayResult::RateLimited { retry_after_secs }, ForwardMetrics::default());
    }
    ctx.rate_limiter.record_metric(ctx.metrics, &service.service_id, true);

    let visibility = service.effective_visibility(endpoint);
    if let AccessDecision::Denied { reason } =
        access_control::evaluate(visibility, request, service.access_config.as_ref(), ctx.global_access)
    {
        ctx.security_monitor.record_request(&client_id, None, true, false).await;
        return (GatewayResult::Forbidden { reason }, ForwardMetrics::default());
    }

    let mut forward_token = None;
    let mut auth_session_id = None;
    if service.effective_auth_required(endpoint) {
        match auth::authenticate(request, ctx.token_validator, ctx.token_issuer, ctx.session_store).await {
            RouteAuthResult::Authenticated { token, auth_session_id: session_id } => {
                forward_token = Some(token);
                auth_session_id = session_id;
            }
            RouteAuthResult::NotRequired => {}
            RouteAuthResult::Unauthorized { reason } => {
                ctx.security_monitor.record_request(&client_id, None, true, true).await;
                return (GatewayResult::Unauthorized { reason }, ForwardMetrics::default());
            }
            RouteAuthResult::Forbidden { reason } => {
                ctx.security_monitor.record_request(&client_id, None, true, false).await;
                return (GatewayResult::Forbidden { reason }, ForwardMetrics::default());
            }
            RouteAuthResult::BadRequest { reason } => {
                ctx.security_monitor.record_request(&client_id, None, true, false).await;
                return (GatewayResult::BadRequest { reason }, ForwardMetrics::default());
            }
        }
    }

    let sampling = ctx.sampler.resolve_non_blocking(&service.service_id);
    if sampler::should_sample(sampling.rate) {
        sampler::record_draw();
    }

    let bytes_in = request.content_length.unwrap_or(0);
    let proxy_request = build_proxy_request(request, service, target_path, path_variables, forward_token);

    let started = Instant::now();
    let (outcome, bytes_out) = match ctx.proxy_client.call(proxy_request).await {
        Ok(response) => {
            let bytes_out = response.body.len() as u64;
            let outcome =
                GatewayResult::Success { status_code: response.status_code, headers: response.headers, body: response.body };
            (outcome, bytes_out)
        }
        Err(err) => (GatewayResult::Error { message: err.to_string() }, 0),
    };
    let latency = started.elapsed();

    let is_error = outcome.http_status() >= 400;
    ctx.security_monitor.record_request(&client_id, auth_session_id.as_deref(), is_error, false).await;

    (outcome, ForwardMetrics { latency: Some(latency), bytes_in, bytes_out, auth_session_id })
}

/// Build the outbound request: strip hop-by-hop headers, inject the
/// `Forwarded` header (proto/for/host), and attach the forward auth token.
fn build_proxy_request(
    request: &InboundRequest,
    service: &ServiceRegistration,
    target_path: &str,
    path_variables: &HashMap<String, String>,
    forward_token: Option<String>,
) -> ProxyRequest {
    let mut headers = HashMap::new();
    for (k, v) in &request.headers {
        if !HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(k)) {
            headers.insert(k.clone(), v.clone());
        }
    }

    let source_ip = access_control::extract_source_ip(request).unwrap_or_else(|| "unknown".to_string());
    let host = access_control::extract_host(request).unwrap_or_else(|| "unknown".to_string());
    let proto = request.header("x-forwarded-proto").unwrap_or("http");
    let forwarded_existing = request.header("forwarded").map(|s| format!("{s}, ")).unwrap_or_default();
    headers.insert(
        "Forwarded".to_string(),
        format!("{forwarded_existing}for={source_ip};host={host};proto={proto}"),
    );

    if let Some(token) = forward_token {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }

    for (name, value) in path_variables {
        headers.insert(format!("X-Aussie-Param-{name}"), value.clone());
    }

    let query = request.query.as_deref().map(|q| format!("?{q}")).unwrap_or_default();
    let url = format!("{}{}{}", service.base_url.trim_end_matches('/'), target_path, query);

    ProxyRequest { url, method: request.method.clone(), headers, body: Vec::new() }
}

fn strip_gateway_prefix(path: &str, gateway_prefix: &str) -> Option<String> {
    let normalized = normalize_path(path);
    let prefix = normalize_path(gateway_prefix);
    normalized.strip_prefix(&prefix).map(|rest| {
        if rest.is_empty() {
            "/".to_string()
        } else {
            normalize_path(rest)
        }
    })
}

fn terminate(
    ctx: &DispatchContext<'_>,
    outcome: GatewayResult,
    service_id: &str,
    method: &str,
    route_pattern: Option<&str>,
    fwd: ForwardMetrics,
) -> GatewayResult {
    let status = outcome.http_status();
    let status_str = status.to_string();
    info!(service_id, method, status, "request terminated");

    let mut tags: Vec<(&'static str, &str)> =
        vec![("service_id", service_id), ("method", method), ("status_class", status_class(status)), ("status", &status_str)];
    if let Some(pattern) = route_pattern {
        tags.push(("route_pattern", pattern));
    }
    if let Some(session_id) = fwd.auth_session_id.as_deref() {
        tags.push(("auth_session_id", session_id));
    }
    ctx.metrics.counter(metric_names::REQUESTS_TOTAL, 1, &tags);

    if let Some(latency) = fwd.latency {
        ctx.metrics.histogram(metric_names::PROXY_LATENCY_MS, latency.as_secs_f64() * 1000.0, &[("service_id", service_id)]);
    }
    if fwd.bytes_in > 0 {
        ctx.metrics.counter(metric_names::PROXY_BYTES_IN, fwd.bytes_in, &[("service_id", service_id)]);
    }
    if fwd.bytes_out > 0 {
        ctx.metrics.counter(metric_names::PROXY_BYTES_OUT, fwd.bytes_out, &[("service_id", service_id)]);
    }

    outcome
}

fn status_class(status: u16) -> &'static str {
    match status / 100 {
        2 | 3 => "2xx",
        4 => "4xx",
        _ => "5xx",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_gateway_prefix() {
        assert_eq!(strip_gateway_prefix("/gateway/users/1", "/gateway").as_deref(), Some("/users/1"));
        assert_eq!(strip_gateway_prefix("/gateway", "/gateway").as_deref(), Some("/"));
        assert_eq!(strip_gateway_prefix("/other/path", "/gateway"), None);
    }

    #[test]
    fn hop_by_hop_headers_are_filtered() {
        let mut headers = HashMap::new();
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("X-Custom".to_string(), "1".to_string());
        let req = InboundRequest { method: "GET".into(), path: "/svc/x".into(), query: None, headers, content_length: None };
        let service = ServiceRegistration {
            service_id: "svc".into(),
            display_name: "svc".into(),
            base_url: "http://backend".into(),
            endpoints: vec![],
            default_visibility: Visibility::Public,
            default_auth_required: false,
            access_config: None,
            rate_limit_config: None,
            sampling_config: None,
            permission_policy: None,
            version: 1,
        };
        let built = build_proxy_request(&req, &service, "/x", &HashMap::new(), None);
        assert!(!built.headers.contains_key("Connection"));
        assert!(built.headers.contains_key("X-Custom"));
        assert!(built.headers.contains_key("Forwarded"));
        assert_eq!(built.url, "http://backend/x");
    }

    #[test]
    fn synthesized_catch_all_inherits_service_defaults() {
        let service = ServiceRegistration {
            service_id: "svc".into(),
            display_name: "svc".into(),
            base_url: "http://backend".into(),
            endpoints: vec![],
            default_visibility: Visibility::Private,
            default_auth_required: true,
            access_config: None,
            rate_limit_config: None,
            sampling_config: None,
            permission_policy: None,
            version: 1,
        };
        let endpoint = synthesize_catch_all(&service);
        assert_eq!(service.effective_visibility(&endpoint), Visibility::Private);
        assert!(service.effective_auth_required(&endpoint));
    }
}
