//! Security monitor and event dispatcher (spec.md §4.7).
//!
//! Grounded on the teacher's `frys-eventbus/src/core.rs` `Event`/
//! `Priority`/`Publisher` shape, generalized from a general-purpose topic
//! bus into a fixed set of security events delivered over a single-
//! consumer `tokio::mpsc` queue instead of the teacher's `crossbeam`
//! channel (this crate is std+tokio, not no_std).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Handler dispatch priority; higher runs first, mirroring the teacher's
/// `Priority` ordering in the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Runs last: logging, archival.
    Low,
    /// Default handler priority.
    Normal,
    /// Runs before `Normal`: alerting, paging.
    High,
    /// Runs first: automated mitigation (e.g. temporary IP ban).
    Critical,
}

/// A security anomaly event, hashed so raw client identifiers never leave
/// the monitor.
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    /// Unique ID for this event, for dedup/correlation across handlers.
    pub event_id: Uuid,
    /// Kind of anomaly detected.
    pub kind: SecurityEventKind,
    /// SHA-256 hex digest of the triggering client IP.
    pub hashed_client_id: String,
    /// SHA-256 hex digest of the session ID, if one was present.
    pub hashed_session_id: Option<String>,
    /// Confidence in `[0, 1]`, meaningful only for `SuspiciousPattern`.
    pub confidence: f64,
    /// Monotonic timestamp of detection.
    pub detected_at: Instant,
}

/// The fixed set of anomalies the monitor raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    /// A client exceeded its configured rate limit.
    RateLimitExceeded,
    /// Request volume from a client exceeds the flood threshold.
    DosAttackDetectedRequestFlood,
    /// Error rate from a client exceeds the suspicious-pattern threshold.
    SuspiciousPatternHighErrorRate,
    /// Repeated authentication failures from a client.
    SuspiciousPatternBruteForceAttempt,
}

/// Threshold configuration for the sliding-window counters.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Sliding window length.
    pub window: Duration,
    /// Requests within `window` beyond which `RateLimitExceeded` fires,
    /// independent of any actual limiter rejection.
    pub rate_limit_threshold: u64,
    /// Requests within `window` that trigger `DosAttackDetectedRequestFlood`.
    pub request_flood_count: u64,
    /// Error ratio (errors / requests) within `window` that triggers
    /// `SuspiciousPatternHighErrorRate`.
    pub high_error_rate_ratio: f64,
    /// Auth failures within `window` that trigger
    /// `SuspiciousPatternBruteForceAttempt`.
    pub brute_force_attempt_count: u64,
}

struct WindowCounters {
    window_start: Instant,
    requests: u64,
    errors: u64,
    auth_failures: u64,
}

impl WindowCounters {
    fn fresh(now: Instant) -> Self {
        Self { window_start: now, requests: 0, errors: 0, auth_failures: 0 }
    }
}

/// Sliding-window anomaly monitor. Counters reset approximately -- the
/// first increment past `window` rebases the window rather than
/// maintaining a precise rolling log, per spec.md §9's accepted
/// approximation.
pub struct SecurityMonitor {
    thresholds: Thresholds,
    counters: DashMap<String, WindowCounters>,
    sender: mpsc::Sender<SecurityEvent>,
}

impl SecurityMonitor {
    /// Construct a monitor and its paired event receiver. The receiver is
    /// meant to be driven by exactly one consumer task (spec.md §4.7's
    /// single-consumer queue).
    pub fn new(thresholds: Thresholds, queue_capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        (Self { thresholds, counters: DashMap::new(), sender }, receiver)
    }

    /// Record one request outcome for `client_id`, emitting any events
    /// the updated counters now cross a threshold for. Best-effort: if
    /// the event queue is full, the event is dropped and logged rather
    /// than blocking the request path.
    #[instrument(skip(self, client_id, session_id))]
    pub async fn record_request(&self, client_id: &str, session_id: Option<&str>, is_error: bool, auth_failed: bool) {
        let hashed_client_id = hash(client_id);
        let hashed_session_id = session_id.map(hash);
        let now = Instant::now();

        let mut events = Vec::new();
        {
            let mut entry = self.counters.entry(hashed_client_id.clone()).or_insert_with(|| WindowCounters::fresh(now));
            if now.duration_since(entry.window_start) > self.thresholds.window {
                *entry = WindowCounters::fresh(now);
            }
            entry.requests += 1;
            if is_error {
                entry.errors += 1;
            }
            if auth_failed {
                entry.auth_failures += 1;
            }

            if entry.requests > self.thresholds.rate_limit_threshold {
                events.push(SecurityEventKind::RateLimitExceeded);
            }
            if entry.requests > self.thresholds.request_flood_count {
                events.push(SecurityEventKind::DosAttackDetectedRequestFlood);
            }
            if entry.requests > 0 {
                let ratio = entry.errors as f64 / entry.requests as f64;
                if ratio > self.thresholds.high_error_rate_ratio {
                    events.push(SecurityEventKind::SuspiciousPatternHighErrorRate);
                }
            }
            if entry.auth_failures >= self.thresholds.brute_force_attempt_count {
                events.push(SecurityEventKind::SuspiciousPatternBruteForceAttempt);
            }
        }

        for kind in events {
            let confidence = match kind {
                SecurityEventKind::SuspiciousPatternBruteForceAttempt => {
                    let failures = self.counters.get(&hashed_client_id).map(|c| c.auth_failures).unwrap_or(0);
                    (failures as f64 / 10.0).min(1.0)
                }
                _ => 1.0,
            };
            let event = SecurityEvent {
                event_id: Uuid::new_v4(),
                kind,
                hashed_client_id: hashed_client_id.clone(),
                hashed_session_id: hashed_session_id.clone(),
                confidence,
                detected_at: now,
            };
            if self.sender.try_send(event).is_err() {
                warn!("security event queue full; dropping event");
            }
        }
    }

    /// Record a rate-limit rejection as its own event kind (the limiter
    /// itself has already decided to reject; this only notifies).
    pub async fn record_rate_limited(&self, client_id: &str) {
        let event = SecurityEvent {
            event_id: Uuid::new_v4(),
            kind: SecurityEventKind::RateLimitExceeded,
            hashed_client_id: hash(client_id),
            hashed_session_id: None,
            confidence: 1.0,
            detected_at: Instant::now(),
        };
        if self.sender.try_send(event).is_err() {
            warn!("security event queue full; dropping rate-limit event");
        }
    }
}

fn hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A registered handler and the priority it runs at.
pub struct HandlerRegistration<H> {
    /// Dispatch priority; higher runs first.
    pub priority: Priority,
    /// The handler itself.
    pub handler: H,
}

/// Drive a monitor's event receiver, dispatching each event to
/// `handlers` in descending priority order. Runs until the channel
/// closes; intended to be spawned as the queue's single consumer.
pub async fn run_dispatch_loop<H>(mut receiver: mpsc::Receiver<SecurityEvent>, mut handlers: Vec<HandlerRegistration<H>>)
where
    H: Fn(&SecurityEvent) + Send + Sync,
{
    handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
    while let Some(event) = receiver.recv().await {
        for registration in &handlers {
            (registration.handler)(&event);
        }
    }
}
