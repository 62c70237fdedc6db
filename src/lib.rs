//! # Aussie Gateway
//!
//! The request admission and routing pipeline for an API gateway: service
//! registration, path-template route matching, hierarchical rate limiting,
//! route authentication, access control, gateway/pass-through dispatch,
//! trace sampling, a security anomaly monitor, a JWKS cache, and the
//! small primitives (TTL cache, request size validation, API-key
//! encryption) those components share.
//!
//! The HTTP framework, persistence, token issuance/validation, and the
//! physical proxy client are all out of scope -- this crate depends on
//! them only through the traits in [`ports`], so it can be wired into any
//! async HTTP stack.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aussie_gateway::config::GatewayConfig;
//! use aussie_gateway::dispatch::DispatchContext;
//! use aussie_gateway::registry::Registry;
//! use aussie_gateway::ports::{NullMetricsSink, InboundRequest};
//!
//! # async fn example(
//! #     repo: Arc<dyn aussie_gateway::ports::ServiceRepository>,
//! #     token_validator: Arc<dyn aussie_gateway::ports::TokenValidator>,
//! #     token_issuer: Arc<dyn aussie_gateway::ports::TokenIssuer>,
//! #     session_store: Arc<dyn aussie_gateway::ports::SessionStore>,
//! #     proxy_client: Arc<dyn aussie_gateway::ports::ProxyClient>,
//! # ) {
//! let config = GatewayConfig::default();
//! let registry = Registry::new(repo);
//! registry.warm().await.ok();
//!
//! let metrics = NullMetricsSink;
//! let rate_limiter = aussie_gateway::rate_limit::RateLimiter::new();
//! let (security_monitor, _events) = aussie_gateway::security::SecurityMonitor::new(
//!     config.security.thresholds(),
//!     config.security.event_queue_capacity,
//! );
//! let sampler = aussie_gateway::sampler::SamplingResolver::new(config.sampling.into(), |_id| async { None });
//!
//! let ctx = DispatchContext {
//!     registry: &registry,
//!     global_access: &Default::default(),
//!     token_validator: token_validator.as_ref(),
//!     token_issuer: token_issuer.as_ref(),
//!     session_store: session_store.as_ref(),
//!     proxy_client: proxy_client.as_ref(),
//!     metrics: &metrics,
//!     size_limits: &config.bootstrap.size_limits(),
//!     rate_limiter: &rate_limiter,
//!     rate_limit_platform_default: &config.rate_limiting.default,
//!     rate_limit_platform_max: &config.rate_limiting.maximum,
//!     security_monitor: &security_monitor,
//!     sampler: &sampler,
//! };
//!
//! let request = InboundRequest {
//!     method: "GET".into(),
//!     path: "/users/service/profile".into(),
//!     query: None,
//!     headers: Default::default(),
//!     content_length: None,
//! };
//! let _result = aussie_gateway::dispatch::dispatch_pass_through(&ctx, &request).await;
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. [`validation`] -- reject oversized requests before any other work.
//! 2. [`registry`] -- service registration and path-template route matching.
//! 3. [`access_control`] -- PUBLIC/PRIVATE visibility and IP/domain allow-lists.
//! 4. [`auth`] -- bearer/session authentication and forward-token issuance.
//! 5. [`rate_limit`] -- hierarchical token-bucket admission control.
//! 6. [`dispatch`] -- ties the above together for gateway and pass-through modes.
//! 7. [`sampler`] -- non-blocking hierarchical trace sampling.
//! 8. [`security`] -- sliding-window anomaly detection and event dispatch.
//! 9. [`jwks`] -- coalesced, TTL-cached JSON Web Key Set fetching.
//! 10. [`cache`] -- the shared TTL+LRU primitive backing the sampler and JWKS cache.
//! 11. [`crypto`] -- AES-256-GCM encryption for persisted API-key blobs.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod access_control;
pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod jwks;
pub mod model;
pub mod ports;
pub mod rate_limit;
pub mod registry;
pub mod sampler;
pub mod security;
pub mod telemetry;
pub mod validation;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{GatewayError, Result};

/// Reserved pass-through/gateway-mode path segment for the admin API.
pub const RESERVED_SEGMENT_ADMIN: &str = "admin";
/// Reserved segment for gateway-mode dispatch (`/gateway/{rest}`).
pub const RESERVED_SEGMENT_GATEWAY: &str = "gateway";
/// Reserved segment for runtime health/metrics endpoints.
pub const RESERVED_SEGMENT_RUNTIME: &str = "q";

/// Default JWKS cache TTL when not overridden.
pub const DEFAULT_JWKS_TTL_SECS: u64 = 3600;
/// Default local-cache TTL jitter factor.
pub const DEFAULT_CACHE_JITTER: f64 = 0.1;
