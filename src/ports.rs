//! Traits for everything spec.md §1 calls out as an external collaborator:
//! the HTTP framework, credential stores, token validation/issuance, the
//! physical proxy client, and metric/log sinks. The core depends only on
//! these interfaces; production wiring supplies concrete adapters, tests
//! supply in-memory fakes (see [`crate::testutil`]).

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::ServiceRegistration;

/// Minimal representation of an inbound request the core needs to reason
/// about. The real HTTP framework's request type is adapted into this at
/// the edge.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Uppercase HTTP method.
    pub method: String,
    /// Request path (not including query string).
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Headers, preserving original casing; lookups are case-insensitive
    /// (see [`InboundRequest::header`]).
    pub headers: HashMap<String, String>,
    /// Body length in bytes, if known ahead of buffering.
    pub content_length: Option<u64>,
}

impl InboundRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Abstract repository over [`ServiceRegistration`]s. Implemented by the
/// out-of-scope persistence layer; the registry is the only component that
/// talks to it directly.
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Fetch a service by ID.
    async fn get(&self, service_id: &str) -> Result<Option<ServiceRegistration>>;

    /// Insert or update a registration, provided the compare-and-swap on
    /// `version` succeeds. Returns `Ok(false)` (not an error) on a version
    /// mismatch so callers can distinguish "stale write" from "storage
    /// failure".
    async fn put_cas(&self, reg: ServiceRegistration, expected_current_version: Option<u64>) -> Result<bool>;

    /// Remove a registration. Returns `true` if something was removed.
    async fn delete(&self, service_id: &str) -> Result<bool>;

    /// List all registered service IDs, for diagnostics/admin tooling.
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// Result of validating a bearer token against the external token service.
#[derive(Debug, Clone)]
pub enum TokenValidationResult {
    /// Token is valid; carries the claims needed for forward-token issuance.
    Valid {
        /// Token subject.
        subject: String,
        /// Raw claims, opaque to the core.
        claims: HashMap<String, String>,
    },
    /// Token is invalid or expired; `reason` is caller-facing.
    Invalid {
        /// Reason shown to the caller.
        reason: String,
    },
}

/// External bearer-token validator (JWT/JWKS verification lives here, out
/// of scope for the core per spec.md §1).
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a raw bearer token string (without the `Bearer ` prefix).
    async fn validate(&self, token: &str) -> Result<TokenValidationResult>;
}

/// External forward-token issuance (group/role expansion, JWS minting).
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Mint an internal forward token carrying the subject and expanded
    /// claims. `Err` triggers the degraded minimal-token fallback in
    /// [`crate::auth`].
    async fn issue_forward_token(&self, subject: &str, claims: &HashMap<String, String>) -> Result<String>;

    /// Mint a short-lived session-derived forward token.
    async fn issue_session_token(&self, session_id: &str, subject: &str) -> Result<String>;
}

/// A resolved session record, as returned by the out-of-scope session
/// store.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: String,
    /// Authenticated subject.
    pub subject: String,
    /// `true` if the session is still within its TTL/idle window.
    pub active: bool,
}

/// External session store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a session by its cookie value.
    async fn lookup(&self, cookie_value: &str) -> Result<Option<SessionRecord>>;
}

/// Outbound request the dispatcher hands to the physical proxy client.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Absolute upstream URL.
    pub url: String,
    /// Original HTTP method.
    pub method: String,
    /// Headers to send upstream (already scrubbed/augmented).
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
}

/// Response returned by the physical proxy client.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    /// Backend HTTP status.
    pub status_code: u16,
    /// Backend response headers.
    pub headers: HashMap<String, String>,
    /// Backend response body.
    pub body: Vec<u8>,
}

/// The out-of-scope outbound HTTP client.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// Perform the proxied call. `Err` becomes [`crate::model::GatewayResult::Error`].
    async fn call(&self, request: ProxyRequest) -> Result<ProxyResponse>;
}

/// Sink for the metrics enumerated in spec.md §6. The core never reads
/// metrics back; this is a write-only, best-effort interface.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by `value`, with the given dimension tags.
    fn counter(&self, name: &'static str, value: u64, tags: &[(&'static str, &str)]);

    /// Record an observation into a histogram.
    fn histogram(&self, name: &'static str, value: f64, tags: &[(&'static str, &str)]);

    /// Set a gauge to an absolute value.
    fn gauge(&self, name: &'static str, value: f64, tags: &[(&'static str, &str)]);
}

/// A no-op sink, useful as a default when telemetry is disabled
/// (`telemetry.enabled = false`, spec.md §6).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn counter(&self, _name: &'static str, _value: u64, _tags: &[(&'static str, &str)]) {}
    fn histogram(&self, _name: &'static str, _value: f64, _tags: &[(&'static str, &str)]) {}
    fn gauge(&self, _name: &'static str, _value: f64, _tags: &[(&'static str, &str)]) {}
}
