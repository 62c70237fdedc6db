//! Gateway error taxonomy and mapping to outward-facing result variants.

use thiserror::Error;

/// Crate-wide error type. Every fallible internal operation returns one of
/// these variants; the dispatcher boundary (see [`crate::dispatch`]) maps
/// each to the closest [`crate::model::GatewayResult`] rather than letting
/// it escape to a caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// Bad input from a caller (malformed registration, request body too
    /// large, conflicting auth methods, ...). Maps to HTTP 400.
    #[error("validation failed for '{field}': {reason}")]
    Validation {
        /// Field or parameter that failed validation.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Caller did not present valid credentials. Maps to HTTP 401.
    #[error("authentication failed: {reason}")]
    AuthN {
        /// Reason shown to the caller (never includes internal detail).
        reason: String,
    },

    /// Caller is authenticated but not permitted. Maps to HTTP 403.
    #[error("authorization failed: {reason}")]
    AuthZ {
        /// Reason shown to the caller.
        reason: String,
    },

    /// No registered route/service matched. Maps to HTTP 404.
    #[error("not found: {reason}")]
    NotFound {
        /// Reason shown to the caller.
        reason: String,
    },

    /// Optimistic-locking or policy guardrail conflict. Maps to HTTP 409
    /// (or 403 for guardrail violations).
    #[error("conflict: {reason}")]
    Conflict {
        /// Reason shown to the caller.
        reason: String,
    },

    /// Rate limit exceeded. Maps to HTTP 429 with `Retry-After`.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },

    /// Upstream backend unreachable or returned a failure the gateway
    /// can't pass through verbatim. Maps to HTTP 502.
    #[error("upstream error: {reason}")]
    Upstream {
        /// Reason shown to the caller.
        reason: String,
    },

    /// Unexpected internal failure. Maps to HTTP 500. Never includes the
    /// underlying cause in any field that might be serialized to a client.
    #[error("internal error")]
    Internal {
        /// Internal-only detail, logged but never returned to a client.
        detail: String,
    },
}

impl GatewayError {
    /// Status class used for metric dimensioning (`status_class` tag).
    pub fn status_class(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "4xx",
            GatewayError::AuthN { .. } => "4xx",
            GatewayError::AuthZ { .. } => "4xx",
            GatewayError::NotFound { .. } => "4xx",
            GatewayError::Conflict { .. } => "4xx",
            GatewayError::RateLimited { .. } => "4xx",
            GatewayError::Upstream { .. } => "5xx",
            GatewayError::Internal { .. } => "5xx",
        }
    }

    /// HTTP status code this error maps to, per spec.md §7.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::AuthN { .. } => 401,
            GatewayError::AuthZ { .. } => 403,
            GatewayError::NotFound { .. } => 404,
            GatewayError::Conflict { .. } => 409,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Upstream { .. } => 502,
            GatewayError::Internal { .. } => 500,
        }
    }

    /// Construct an [`Internal`](GatewayError::Internal) error from any
    /// lower-level failure without leaking its `Display` text to clients.
    pub fn internal(detail: impl Into<String>) -> Self {
        GatewayError::Internal { detail: detail.into() }
    }
}

/// RFC 7807 problem+json body. Construction only -- serializing this onto
/// the wire is the HTTP framework's job (out of scope, spec.md §1).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProblemDetails {
    /// A URI reference identifying the problem type. Fixed to a generic
    /// "about:blank" since the core does not own a docs site.
    #[serde(rename = "type")]
    pub problem_type: String,
    /// Short, human-readable summary.
    pub title: String,
    /// Human-readable explanation specific to this occurrence.
    pub detail: String,
    /// HTTP status code, duplicated in the body per RFC 7807.
    pub status: u16,
    /// When the error occurred, for log correlation.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProblemDetails {
    /// Serialize to the `application/problem+json` wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&GatewayError> for ProblemDetails {
    fn from(err: &GatewayError) -> Self {
        let status = err.http_status();
        let detail = match err {
            GatewayError::Internal { .. } => "an internal error occurred".to_string(),
            other => other.to_string(),
        };
        ProblemDetails {
            problem_type: "about:blank".to_string(),
            title: titled_status(status).to_string(),
            detail,
            status,
            timestamp: chrono::Utc::now(),
        }
    }
}

fn titled_status(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::Validation { field: "x".into(), reason: "y".into() }.http_status(), 400);
        assert_eq!(GatewayError::AuthN { reason: "x".into() }.http_status(), 401);
        assert_eq!(GatewayError::AuthZ { reason: "x".into() }.http_status(), 403);
        assert_eq!(GatewayError::NotFound { reason: "x".into() }.http_status(), 404);
        assert_eq!(GatewayError::Conflict { reason: "x".into() }.http_status(), 409);
        assert_eq!(GatewayError::RateLimited { retry_after_secs: 1 }.http_status(), 429);
        assert_eq!(GatewayError::Upstream { reason: "x".into() }.http_status(), 502);
        assert_eq!(GatewayError::internal("boom").http_status(), 500);
    }

    #[test]
    fn problem_details_never_leaks_internal_detail() {
        let err = GatewayError::internal("stack trace or secret");
        let problem = ProblemDetails::from(&err);
        assert!(!problem.detail.contains("stack trace"));
        assert_eq!(problem.status, 500);
    }

    #[test]
    fn problem_details_carries_reason_for_client_errors() {
        let err = GatewayError::Validation { field: "body".into(), reason: "too large".into() };
        let problem = ProblemDetails::from(&err);
        assert!(problem.detail.contains("too large"));
    }

    #[test]
    fn problem_details_serializes_to_problem_json() {
        let err = GatewayError::NotFound { reason: "no such route".into() };
        let json = ProblemDetails::from(&err).to_json().unwrap();
        assert!(json.contains("\"type\":\"about:blank\""));
        assert!(json.contains("\"status\":404"));
    }
}
