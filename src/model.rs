//! Core data model: service registrations, endpoint configuration, and the
//! tagged-variant outcomes the pipeline produces at each stage.
//!
//! Per spec.md §9 ("Tagged variants for outcomes"), every multi-way result
//! is a plain enum matched exhaustively, not a trait-object hierarchy.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Path segments no service may register under; they are claimed by the
/// gateway itself (admin API, gateway-mode dispatch, runtime health/metrics).
pub const RESERVED_SERVICE_IDS: [&str; 3] = ["admin", "gateway", "q"];

/// Visibility of an endpoint or service default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// No access-control check is performed.
    Public,
    /// Subject to the access-control evaluator (§4.4).
    Private,
}

/// Endpoint protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointType {
    /// Regular HTTP request/response.
    Http,
    /// WebSocket upgrade.
    WebSocket,
}

/// Optional IP/CIDR/domain allow-list attached to a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Exact IPs or CIDR blocks allowed to reach PRIVATE endpoints.
    pub allowed_ips: Vec<String>,
    /// Exact hostnames allowed (case-insensitive).
    pub allowed_domains: Vec<String>,
    /// Subdomain wildcard patterns, e.g. `*.example.com`.
    pub allowed_subdomains: Vec<String>,
}

impl AccessConfig {
    /// `true` when this service declares any restriction at all, making it
    /// the authority over the global allow-list (spec.md §4.4).
    pub fn has_restrictions(&self) -> bool {
        !self.allowed_ips.is_empty()
            || !self.allowed_domains.is_empty()
            || !self.allowed_subdomains.is_empty()
    }
}

/// Per-scope rate limit override. Any field left `None` inherits from the
/// next layer up in the hierarchy (spec.md §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per `window_seconds`.
    pub requests_per_window: Option<u32>,
    /// Window length in seconds.
    pub window_seconds: Option<u32>,
    /// Extra burst capacity on top of the steady-state rate.
    pub burst_capacity: Option<u32>,
    /// Override for WebSocket connection-open rate limiting.
    pub ws_connection: Option<Box<RateLimitConfig>>,
    /// Override for WebSocket per-message rate limiting.
    pub ws_message: Option<Box<RateLimitConfig>>,
}

/// Service- or endpoint-level sampling override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Sampling probability in `[0, 1]`.
    pub rate: f64,
}

/// `operation -> any-of(roles)` permission policy.
pub type PermissionPolicy = BTreeMap<String, Vec<String>>;

/// A single endpoint registered under a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path template; may contain `{name}`, `*`, `**`.
    pub path: String,
    /// Uppercase HTTP methods, or `["*"]` for any method.
    pub methods: Vec<String>,
    /// Overrides the service's `default_visibility` when present.
    pub visibility: Option<Visibility>,
    /// HTTP or WebSocket.
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    /// Overrides the service's `default_auth_required` when present.
    pub auth_required: Option<bool>,
    /// Optional rewrite template; may reference only variables declared in
    /// `path`.
    pub path_rewrite: Option<String>,
    /// Endpoint-level rate limit override.
    pub rate_limit_config: Option<RateLimitConfig>,
    /// Endpoint-level sampling override.
    pub sampling_config: Option<SamplingConfig>,
}

/// A registered backend service and its endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Unique, stable identifier; also the pass-through path segment.
    pub service_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Absolute base URL (`http`/`https`).
    pub base_url: String,
    /// Endpoints, in registration order -- match order is stable across
    /// re-registration (spec.md §4.1).
    pub endpoints: Vec<EndpointConfig>,
    /// Default visibility for endpoints that don't override it.
    pub default_visibility: Visibility,
    /// Default auth requirement for endpoints that don't override it.
    pub default_auth_required: bool,
    /// Optional IP/domain allow-list.
    pub access_config: Option<AccessConfig>,
    /// Optional service-level rate limit override.
    pub rate_limit_config: Option<RateLimitConfig>,
    /// Optional service-level sampling override.
    pub sampling_config: Option<SamplingConfig>,
    /// Optional `operation -> roles` policy.
    pub permission_policy: Option<PermissionPolicy>,
    /// Optimistic-locking version; new registrations must be `1`, updates
    /// must supply `current + 1`.
    pub version: u64,
}

impl ServiceRegistration {
    /// `true` if `service_id` is one of the gateway's reserved prefixes.
    pub fn is_reserved_id(service_id: &str) -> bool {
        RESERVED_SERVICE_IDS.contains(&service_id)
    }

    /// Resolve the effective visibility for a matched endpoint.
    pub fn effective_visibility(&self, endpoint: &EndpointConfig) -> Visibility {
        endpoint.visibility.unwrap_or(self.default_visibility)
    }

    /// Resolve the effective auth requirement for a matched endpoint.
    pub fn effective_auth_required(&self, endpoint: &EndpointConfig) -> bool {
        endpoint.auth_required.unwrap_or(self.default_auth_required)
    }
}

/// A successful route match: which service/endpoint matched, the path to
/// forward to the backend, and any extracted `{name}` variables.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Matched service registration.
    pub service: ServiceRegistration,
    /// Matched (or synthesized, for pass-through catch-all) endpoint.
    pub endpoint: EndpointConfig,
    /// Path to send upstream after any rewrite is applied.
    pub target_path: String,
    /// `{name}` captures from the path template.
    pub path_variables: HashMap<String, String>,
}

/// Outcome of a route lookup.
#[derive(Debug, Clone)]
pub enum RouteLookupResult {
    /// A specific endpoint matched.
    Matched(RouteMatch),
    /// Only the service (pass-through, no endpoint pattern) matched.
    ServiceOnly(ServiceRegistration),
    /// Nothing matched.
    None,
}

/// Outcome of a full gateway dispatch.
#[derive(Debug, Clone)]
pub enum GatewayResult {
    /// Backend responded; status/headers/body are forwarded verbatim.
    Success {
        /// Backend-provided HTTP status.
        status_code: u16,
        /// Response headers to forward.
        headers: HashMap<String, String>,
        /// Response body bytes.
        body: Vec<u8>,
    },
    /// No endpoint pattern matched (gateway mode).
    RouteNotFound,
    /// No service matched (pass-through mode).
    ServiceNotFound,
    /// Pass-through attempted against a reserved top-level segment.
    ReservedPath,
    /// Unexpected internal failure; message is for logs only.
    Error {
        /// Internal-only message.
        message: String,
    },
    /// Authentication failed.
    Unauthorized {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Authorization failed (access control or permission policy).
    Forbidden {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Malformed request.
    BadRequest {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Request body exceeded the configured maximum.
    PayloadTooLarge {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Request headers exceeded the configured maximum, individually or in
    /// aggregate.
    HeadersTooLarge {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Rate limit exceeded for the resolved key.
    RateLimited {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },
}

impl GatewayResult {
    /// HTTP status this outcome maps to, per spec.md §6.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayResult::Success { status_code, .. } => *status_code,
            GatewayResult::RouteNotFound | GatewayResult::ServiceNotFound => 404,
            GatewayResult::ReservedPath => 404,
            GatewayResult::BadRequest { .. } => 400,
            GatewayResult::Unauthorized { .. } => 401,
            GatewayResult::Forbidden { .. } => 403,
            GatewayResult::PayloadTooLarge { .. } => 413,
            GatewayResult::HeadersTooLarge { .. } => 431,
            GatewayResult::RateLimited { .. } => 429,
            GatewayResult::Error { .. } => 502,
        }
    }
}

/// Outcome of the per-route authentication decision (§4.3).
#[derive(Debug, Clone)]
pub enum RouteAuthResult {
    /// Caller authenticated; `token` is what gets forwarded upstream as
    /// `Authorization: Bearer`, `auth_session_id` is set for session-cookie
    /// flows.
    Authenticated {
        /// Forward token (JWS) to attach to the outbound request.
        token: String,
        /// Session identifier, present only for cookie-based auth.
        auth_session_id: Option<String>,
    },
    /// The endpoint does not require authentication.
    NotRequired,
    /// Credentials missing, invalid, or expired.
    Unauthorized {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Credentials valid but insufficient for the endpoint's policy.
    Forbidden {
        /// Reason shown to the caller.
        reason: String,
    },
    /// Malformed auth input (e.g. both bearer and cookie present).
    BadRequest {
        /// Reason shown to the caller.
        reason: String,
    },
}

/// Effective rate limit after hierarchical resolution and platform clamp
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveRateLimit {
    /// Requests admitted per window, clamped at the platform maximum.
    pub requests_per_window: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
    /// Burst capacity.
    pub burst_capacity: u32,
}

/// Which layer of the hierarchy supplied the effective sampling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingSource {
    /// Platform default.
    Platform,
    /// Service-level override.
    Service,
    /// Endpoint-level override.
    Endpoint,
}

/// Effective sampling rate after hierarchical resolution and clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveSamplingRate {
    /// Sampling probability in `[minimum_rate, maximum_rate]`.
    pub rate: f64,
    /// Which layer produced `rate`.
    pub source: SamplingSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_service_ids() {
        assert!(ServiceRegistration::is_reserved_id("admin"));
        assert!(ServiceRegistration::is_reserved_id("gateway"));
        assert!(ServiceRegistration::is_reserved_id("q"));
        assert!(!ServiceRegistration::is_reserved_id("user-service"));
    }

    #[test]
    fn access_config_restrictions() {
        let empty = AccessConfig::default();
        assert!(!empty.has_restrictions());

        let with_ips = AccessConfig {
            allowed_ips: vec!["10.0.0.0/8".into()],
            ..Default::default()
        };
        assert!(with_ips.has_restrictions());
    }

    #[test]
    fn gateway_result_status_mapping() {
        assert_eq!(GatewayResult::RouteNotFound.http_status(), 404);
        assert_eq!(GatewayResult::ServiceNotFound.http_status(), 404);
        assert_eq!(GatewayResult::ReservedPath.http_status(), 404);
        assert_eq!(GatewayResult::BadRequest { reason: "x".into() }.http_status(), 400);
        assert_eq!(GatewayResult::Unauthorized { reason: "x".into() }.http_status(), 401);
        assert_eq!(GatewayResult::Forbidden { reason: "x".into() }.http_status(), 403);
        assert_eq!(GatewayResult::Error { message: "x".into() }.http_status(), 502);
        assert_eq!(GatewayResult::PayloadTooLarge { reason: "x".into() }.http_status(), 413);
        assert_eq!(GatewayResult::HeadersTooLarge { reason: "x".into() }.http_status(), 431);
        assert_eq!(GatewayResult::RateLimited { retry_after_secs: 1 }.http_status(), 429);
        assert_eq!(
            GatewayResult::Success { status_code: 201, headers: HashMap::new(), body: vec![] }.http_status(),
            201
        );
    }
}
