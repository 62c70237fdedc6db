//! Access control evaluator (spec.md §4.4): PUBLIC/PRIVATE visibility,
//! IP/CIDR and domain allow-lists, and the header-priority rules for
//! extracting a caller's apparent source IP and host.
//!
//! Grounded on the teacher's header-inspection style in `core.rs`'s
//! request handling; CIDR matching uses `ipnet` since the teacher never
//! needed it (load balancing operates on upstream health, not caller IP).

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::instrument;

use crate::model::{AccessConfig, Visibility};
use crate::ports::InboundRequest;

/// Outcome of an access-control evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Request is admitted.
    Allowed,
    /// Request is rejected; `reason` is caller-facing.
    Denied {
        /// Reason shown to the caller.
        reason: String,
    },
}

/// Evaluate access control for a matched endpoint.
///
/// PUBLIC endpoints are always admitted. For PRIVATE endpoints, a
/// service-level [`AccessConfig`] with any restriction is authoritative
/// over the platform's global allow-list; an empty/absent service config
/// falls back to `global_allow_list`.
#[instrument(skip(request, service_access, global_allow_list))]
pub fn evaluate(
    visibility: Visibility,
    request: &InboundRequest,
    service_access: Option<&AccessConfig>,
    global_allow_list: &AccessConfig,
) -> AccessDecision {
    if visibility == Visibility::Public {
        return AccessDecision::Allowed;
    }

    let effective = match service_access {
        Some(cfg) if cfg.has_restrictions() => cfg,
        _ => global_allow_list,
    };

    if !effective.has_restrictions() {
        return AccessDecision::Allowed;
    }

    let source_ip = extract_source_ip(request);
    let host = extract_host(request);

    let ip_ok = source_ip
        .as_deref()
        .map(|ip| ip_allowed(ip, &effective.allowed_ips))
        .unwrap_or(false);
    let domain_ok = host
        .as_deref()
        .map(|h| domain_allowed(h, &effective.allowed_domains, &effective.allowed_subdomains))
        .unwrap_or(false);

    if ip_ok || domain_ok {
        AccessDecision::Allowed
    } else {
        AccessDecision::Denied { reason: "source not in allow-list".to_string() }
    }
}

/// Check a candidate IP string against a list of exact IPs and/or CIDR
/// blocks. Matching never crosses address families (an IPv4 candidate
/// never matches an IPv6 entry and vice versa).
pub fn ip_allowed(candidate: &str, entries: &[String]) -> bool {
    let Ok(candidate_ip) = candidate.parse::<IpAddr>() else { return false };
    entries.iter().any(|entry| {
        if let Ok(net) = entry.parse::<IpNet>() {
            same_family(net.addr(), candidate_ip) && net.contains(&candidate_ip)
        } else if let Ok(exact) = entry.parse::<IpAddr>() {
            exact == candidate_ip
        } else {
            false
        }
    })
}

fn same_family(a: IpAddr, b: IpAddr) -> bool {
    matches!((a, b), (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)))
}

/// Check a candidate host against exact domains (case-insensitive) and
/// subdomain wildcard patterns (`*.example.com`).
pub fn domain_allowed(candidate: &str, exact: &[String], wildcards: &[String]) -> bool {
    let candidate = candidate.to_ascii_lowercase();
    if exact.iter().any(|d| d.eq_ignore_ascii_case(&candidate)) {
        return true;
    }
    wildcards.iter().any(|pattern| {
        let Some(suffix) = pattern.strip_prefix("*.") else { return false };
        let suffix = suffix.to_ascii_lowercase();
        candidate.ends_with(&format!(".{suffix}"))
    })
}

/// Extract the caller's apparent source IP, in priority order:
/// `X-Forwarded-For` (first hop) -> `Forwarded: for=` -> `X-Real-IP` ->
/// `None` (the HTTP framework's peer address is not visible to the core).
pub fn extract_source_ip(request: &InboundRequest) -> Option<String> {
    if let Some(xff) = request.header("x-forwarded-for") {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    if let Some(forwarded) = request.header("forwarded") {
        if let Some(ip) = parse_forwarded_param(forwarded, "for") {
            return Some(ip);
        }
    }
    if let Some(real_ip) = request.header("x-real-ip") {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    None
}

/// Extract the caller's apparent requested host, in priority order:
/// `X-Forwarded-Host` -> `Forwarded: host=` -> `Host` (port stripped).
pub fn extract_host(request: &InboundRequest) -> Option<String> {
    if let Some(h) = request.header("x-forwarded-host") {
        let trimmed = h.trim();
        if !trimmed.is_empty() {
            return Some(strip_port(trimmed));
        }
    }
    if let Some(forwarded) = request.header("forwarded") {
        if let Some(host) = parse_forwarded_param(forwarded, "host") {
            return Some(strip_port(&host));
        }
    }
    request.header("host").map(strip_port)
}

fn strip_port(host: &str) -> String {
    if host.starts_with('[') {
        // IPv6 literal, e.g. "[::1]:8080"
        if let Some(end) = host.find(']') {
            return host[..=end].to_string();
        }
        return host.to_string();
    }
    host.split(':').next().unwrap_or(host).to_string()
}

/// Parse a single parameter out of a `Forwarded` header's first element,
/// per RFC 7239 (simplified: no quoted-pair escaping, case-insensitive
/// key match).
fn parse_forwarded_param(header: &str, key: &str) -> Option<String> {
    let first_element = header.split(',').next()?;
    for pair in first_element.split(';') {
        let pair = pair.trim();
        if let Some((k, v)) = pair.split_once('=') {
            if k.trim().eq_ignore_ascii_case(key) {
                return Some(v.trim().trim_matches('"').to_string());
            }
        }
    }
    None
}
