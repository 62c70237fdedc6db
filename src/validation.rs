//! Request size validator (spec.md §4.10): pure functions checking body,
//! header, and total-header sizes against configured limits.
//!
//! New to this crate -- the teacher never validated inbound size limits
//! (it operated purely on already-parsed `Route`/`Upstream` config) -- so
//! this is written directly against spec.md's rules rather than
//! generalized from a teacher analogue.

use crate::model::GatewayResult;
use crate::ports::InboundRequest;

/// Size limits enforced before a request reaches routing/auth.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    /// Maximum body size in bytes.
    pub max_body_size: u64,
    /// Maximum size of any single header (name + value) in bytes.
    pub max_header_size: u64,
    /// Maximum combined size of all headers in bytes.
    pub max_total_headers_size: u64,
}

/// Validate `request` against `limits`. Returns `None` if the request
/// passes, or the terminating [`GatewayResult`] to short-circuit with
/// otherwise (413 for an oversized body, 431 for oversized headers).
pub fn validate(request: &InboundRequest, limits: &SizeLimits) -> Option<GatewayResult> {
    match classify(request, limits)? {
        SizeViolation::BodyTooLarge => Some(GatewayResult::PayloadTooLarge {
            reason: format!("body exceeds max_body_size {}", limits.max_body_size),
        }),
        SizeViolation::HeadersTooLarge => Some(GatewayResult::HeadersTooLarge {
            reason: "headers exceed the configured size limit".to_string(),
        }),
    }
}

/// Which oversized-request limit was exceeded; maps 1:1 to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeViolation {
    /// Body exceeds `max_body_size`. Maps to HTTP 413.
    BodyTooLarge,
    /// A header, or the combined headers, exceeds its limit. Maps to HTTP 431.
    HeadersTooLarge,
}

impl SizeViolation {
    /// HTTP status this violation maps to.
    pub fn http_status(self) -> u16 {
        match self {
            SizeViolation::BodyTooLarge => 413,
            SizeViolation::HeadersTooLarge => 431,
        }
    }
}

/// Validate and, on failure, classify which limit was exceeded. Per-header
/// size includes the `": "` separator between name and value, matching how
/// the header is actually rendered on the wire.
pub fn classify(request: &InboundRequest, limits: &SizeLimits) -> Option<SizeViolation> {
    if let Some(len) = body_length(request) {
        if len > limits.max_body_size {
            return Some(SizeViolation::BodyTooLarge);
        }
    }

    let mut total: u64 = 0;
    for (name, value) in &request.headers {
        let size = (name.len() + value.len() + 2) as u64;
        if size > limits.max_header_size {
            return Some(SizeViolation::HeadersTooLarge);
        }
        total += size;
    }
    if total > limits.max_total_headers_size {
        return Some(SizeViolation::HeadersTooLarge);
    }

    None
}

/// Resolve the declared body length from `Content-Length`, falling back
/// to the structured `content_length` field, and finally to `0` when
/// neither is present or the header is malformed (spec.md §4.10).
fn body_length(request: &InboundRequest) -> Option<u64> {
    if let Some(len) = request.content_length {
        return Some(len);
    }
    match request.header("content-length") {
        Some(raw) => Some(raw.trim().parse::<u64>().unwrap_or(0)),
        None => Some(0),
    }
}
