//! Tracing/metrics wiring (ambient stack, spec.md §6).
//!
//! Grounded on the teacher's `frys-monitoring` Cargo.toml (`tracing` +
//! `tracing-subscriber` for structured logs, `metrics` as the instrument
//! facade) and `core.rs`'s `TracingConfig`/`MetricsConfig` shape,
//! generalized from gateway-routing spans to the fixed `aussie.*`
//! attribute set spec.md §6 names.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::AttributionSection;
use crate::ports::MetricsSink;

/// Install a global `tracing` subscriber. `json` selects structured JSON
/// output (production); otherwise a compact human-readable formatter is
/// used (local development).
pub fn init_tracing(json: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).json().finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).compact().finish();
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// The fixed set of span attributes spec.md §6 names, each individually
/// togglable via [`AttributionSection`].
#[derive(Debug, Clone)]
pub struct RequestAttributes {
    /// `aussie.service_id`.
    pub service_id: Option<String>,
    /// `aussie.route_pattern`.
    pub route_pattern: Option<String>,
    /// `aussie.auth_session_id`.
    pub auth_session_id: Option<String>,
    /// `aussie.sampling_source`.
    pub sampling_source: Option<String>,
}

/// Record a request's span attributes on the current span, honoring the
/// per-attribute toggles in `attribution`.
pub fn record_attributes(attribution: &AttributionSection, attrs: &RequestAttributes) {
    let span = tracing::Span::current();
    if attribution.service_id {
        if let Some(v) = &attrs.service_id {
            span.record("aussie.service_id", tracing::field::display(v));
        }
    }
    if attribution.route_pattern {
        if let Some(v) = &attrs.route_pattern {
            span.record("aussie.route_pattern", tracing::field::display(v));
        }
    }
    if attribution.auth_session_id {
        if let Some(v) = &attrs.auth_session_id {
            span.record("aussie.auth_session_id", tracing::field::display(v));
        }
    }
    if attribution.sampling_source {
        if let Some(v) = &attrs.sampling_source {
            span.record("aussie.sampling_source", tracing::field::display(v));
        }
    }
}

/// Stable metric names emitted across the pipeline, collected here so
/// every call site references the same constant instead of a literal.
pub mod metric_names {
    /// Total requests terminated, dimensioned by `service_id`/`status_class`.
    pub const REQUESTS_TOTAL: &str = "requests.total";
    /// Rate limiter admission decisions.
    pub const RATE_LIMIT_DECISIONS: &str = "rate_limit.decisions";
    /// Proxy call latency, in milliseconds.
    pub const PROXY_LATENCY_MS: &str = "proxy.latency_ms";
    /// Request bytes forwarded upstream.
    pub const PROXY_BYTES_IN: &str = "proxy.bytes_in";
    /// Response bytes returned to the caller.
    pub const PROXY_BYTES_OUT: &str = "proxy.bytes_out";
    /// JWKS fetches performed (after coalescing).
    pub const JWKS_FETCHES: &str = "jwks.fetches";
    /// Security events emitted, dimensioned by `kind`.
    pub const SECURITY_EVENTS: &str = "security.events";
}

/// Register static metric descriptions with the global `metrics`
/// recorder, including the proxy latency histogram's expected percentile
/// readout. Call once at startup, after an exporter is installed.
pub fn describe_metrics() {
    metrics::describe_histogram!(
        metric_names::PROXY_LATENCY_MS,
        metrics::Unit::Milliseconds,
        "proxy call latency; exporters should surface p50/p90/p95/p99"
    );
    metrics::describe_counter!(metric_names::REQUESTS_TOTAL, "terminated requests by service_id/method/status");
    metrics::describe_counter!(metric_names::PROXY_BYTES_IN, "request bytes forwarded upstream");
    metrics::describe_counter!(metric_names::PROXY_BYTES_OUT, "response bytes returned to the caller");
}

/// A [`MetricsSink`] built over the `metrics` crate's global recorder.
/// Production wiring installs a concrete `metrics` exporter (e.g.
/// Prometheus) once at startup; this sink just emits through the facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCrateSink;

fn to_labels(tags: &[(&'static str, &str)]) -> Vec<metrics::Label> {
    tags.iter().map(|(k, v)| metrics::Label::new(*k, v.to_string())).collect()
}

impl MetricsSink for MetricsCrateSink {
    fn counter(&self, name: &'static str, value: u64, tags: &[(&'static str, &str)]) {
        metrics::counter!(name, to_labels(tags)).increment(value);
    }

    fn histogram(&self, name: &'static str, value: f64, tags: &[(&'static str, &str)]) {
        metrics::histogram!(name, to_labels(tags)).record(value);
    }

    fn gauge(&self, name: &'static str, value: f64, tags: &[(&'static str, &str)]) {
        metrics::gauge!(name, to_labels(tags)).set(value);
    }
}

/// Select the configured sink: the real `metrics`-crate-backed sink when
/// `telemetry.enabled`, otherwise a no-op.
pub fn sink_for(enabled: bool) -> Box<dyn MetricsSink> {
    if enabled {
        Box::new(MetricsCrateSink)
    } else {
        Box::new(crate::ports::NullMetricsSink)
    }
}
