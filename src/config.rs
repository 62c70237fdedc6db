//! Typed gateway configuration tree (spec.md §6), loaded via the `config`
//! crate the teacher also depends on for its own `frys-config` module.
//!
//! Grounded on the teacher's `GatewayConfig` struct in `core.rs` for the
//! top-level shape (nested structs per concern, `Default` impls, serde
//! derives); field contents are rewritten to match spec.md §6's option
//! list rather than the teacher's load-balancer-oriented fields.

use serde::Deserialize;

use crate::model::RateLimitConfig;
use crate::sampler::PlatformSamplingConfig;
use crate::validation::SizeLimits;

/// Top-level gateway configuration, deserialized from YAML/TOML/env via
/// the `config` crate's layered `ConfigBuilder`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Telemetry toggles.
    pub telemetry: TelemetryConfig,
    /// Platform-wide rate limiting defaults and ceiling.
    pub rate_limiting: RateLimitingSection,
    /// Sampling defaults and clamp range.
    pub sampling: SamplingSection,
    /// Security monitor thresholds.
    pub security: SecuritySection,
    /// Span/log attribution toggles.
    pub attribution: AttributionSection,
    /// Session cookie behavior.
    pub session: SessionSection,
    /// API key encryption behavior.
    pub auth_encryption: AuthEncryptionSection,
    /// First-boot/bootstrap behavior.
    pub bootstrap: BootstrapSection,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            rate_limiting: RateLimitingSection::default(),
            sampling: SamplingSection::default(),
            security: SecuritySection::default(),
            attribution: AttributionSection::default(),
            session: SessionSection::default(),
            auth_encryption: AuthEncryptionSection::default(),
            bootstrap: BootstrapSection::default(),
        }
    }
}

/// `telemetry.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Master switch; when `false`, a [`crate::ports::NullMetricsSink`] is
    /// used regardless of other settings.
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `rateLimiting.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitingSection {
    /// Platform default applied when no service/endpoint overrides it.
    pub default: RateLimitConfig,
    /// Platform-wide ceiling no override may exceed.
    pub maximum: RateLimitConfig,
    /// WebSocket-specific defaults, nested per spec.md §6.
    pub websocket: WebSocketRateLimitingSection,
}

impl Default for RateLimitingSection {
    fn default() -> Self {
        Self {
            default: RateLimitConfig {
                requests_per_window: Some(100),
                window_seconds: Some(60),
                burst_capacity: Some(20),
                ws_connection: None,
                ws_message: None,
            },
            maximum: RateLimitConfig {
                requests_per_window: Some(10_000),
                window_seconds: Some(60),
                burst_capacity: Some(1_000),
                ws_connection: None,
                ws_message: None,
            },
            websocket: WebSocketRateLimitingSection::default(),
        }
    }
}

/// `rateLimiting.websocket.{connection,message}.*`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebSocketRateLimitingSection {
    /// Connection-open rate limit.
    pub connection: RateLimitConfig,
    /// Per-message rate limit.
    pub message: RateLimitConfig,
}

/// `sampling.*`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    /// Platform default sampling rate.
    pub default_rate: f64,
    /// Minimum effective rate after clamping.
    pub minimum_rate: f64,
    /// Maximum effective rate after clamping.
    pub maximum_rate: f64,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self { default_rate: 0.1, minimum_rate: 0.0, maximum_rate: 1.0 }
    }
}

impl From<SamplingSection> for PlatformSamplingConfig {
    fn from(section: SamplingSection) -> Self {
        PlatformSamplingConfig {
            default_rate: section.default_rate,
            minimum_rate: section.minimum_rate,
            maximum_rate: section.maximum_rate,
        }
    }
}

/// `security.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Sliding window length, in seconds.
    pub window_seconds: u64,
    /// Requests within the window beyond which a rate-limit-exceeded event
    /// fires, independent of any actual limiter rejection.
    pub rate_limit_threshold: u64,
    /// Requests within the window that trigger a request-flood event.
    pub request_flood_count: u64,
    /// Error ratio within the window that triggers a high-error-rate event.
    pub high_error_rate_ratio: f64,
    /// Auth failures within the window that trigger a brute-force event.
    pub brute_force_attempt_count: u64,
    /// Security event queue capacity.
    pub event_queue_capacity: usize,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            rate_limit_threshold: 100,
            request_flood_count: 200,
            high_error_rate_ratio: 0.5,
            brute_force_attempt_count: 5,
            event_queue_capacity: 1024,
        }
    }
}

impl SecuritySection {
    /// Build the [`crate::security::Thresholds`] this section describes.
    pub fn thresholds(&self) -> crate::security::Thresholds {
        crate::security::Thresholds {
            window: std::time::Duration::from_secs(self.window_seconds),
            rate_limit_threshold: self.rate_limit_threshold,
            request_flood_count: self.request_flood_count,
            high_error_rate_ratio: self.high_error_rate_ratio,
            brute_force_attempt_count: self.brute_force_attempt_count,
        }
    }
}

/// `attribution.*`: individually togglable span attributes, per
/// spec.md §6's `aussie.*` naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttributionSection {
    /// Emit `aussie.service_id`.
    pub service_id: bool,
    /// Emit `aussie.route_pattern`.
    pub route_pattern: bool,
    /// Emit `aussie.auth_session_id`.
    pub auth_session_id: bool,
    /// Emit `aussie.sampling_source`.
    pub sampling_source: bool,
}

impl Default for AttributionSection {
    fn default() -> Self {
        Self { service_id: true, route_pattern: true, auth_session_id: false, sampling_source: true }
    }
}

/// `session.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Cookie name carrying the session ID.
    pub cookie_name: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self { cookie_name: "aussie_session".to_string() }
    }
}

/// `auth.encryption.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthEncryptionSection {
    /// Whether persisted API keys are encrypted at rest.
    pub enabled: bool,
    /// Active key ID, must be present in the configured key ring.
    pub active_key_id: String,
}

impl Default for AuthEncryptionSection {
    fn default() -> Self {
        Self { enabled: true, active_key_id: "default".to_string() }
    }
}

/// `bootstrap.*`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapSection {
    /// Preload the registry's compiled route cache on startup.
    pub warm_registry_on_start: bool,
    /// Request body/header size limits.
    pub max_body_size: u64,
    /// See [`SizeLimits::max_header_size`].
    pub max_header_size: u64,
    /// See [`SizeLimits::max_total_headers_size`].
    pub max_total_headers_size: u64,
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            warm_registry_on_start: true,
            max_body_size: 10 * 1024 * 1024,
            max_header_size: 8 * 1024,
            max_total_headers_size: 64 * 1024,
        }
    }
}

impl BootstrapSection {
    /// Build the [`SizeLimits`] this section describes.
    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            max_body_size: self.max_body_size,
            max_header_size: self.max_header_size,
            max_total_headers_size: self.max_total_headers_size,
        }
    }
}

/// Load configuration from the given file path, layered over defaults,
/// with environment variable overrides prefixed `AUSSIE_GATEWAY__`
/// (double underscore as the `config` crate's nesting separator).
///
/// Bootstrap-time failures are surfaced as `anyhow::Error` with context
/// rather than the library's own [`crate::error::GatewayError`], since a
/// broken startup config isn't a per-request outcome the dispatcher needs
/// to map to an HTTP status.
pub fn load(path: Option<&str>) -> anyhow::Result<GatewayConfig> {
    use anyhow::Context;

    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("AUSSIE_GATEWAY").separator("__"));

    let raw = builder.build().context("failed to assemble configuration sources")?;
    raw.try_deserialize().context("failed to deserialize gateway configuration")
}
