//! Router metrics.
//!
//! Recorded through the `metrics` facade; whichever binary installs a
//! recorder decides where they go.

use metrics::{counter, histogram};

use adreel_models::RouterStatus;

/// Metric names as constants for consistency.
pub mod names {
    pub const ROUTES_TOTAL: &str = "adreel_routes_total";
    pub const ROUTE_DURATION_SECONDS: &str = "adreel_route_duration_seconds";
    pub const DISPATCH_ATTEMPTS_TOTAL: &str = "adreel_dispatch_attempts_total";
    pub const DISPATCH_FAILURES_TOTAL: &str = "adreel_dispatch_failures_total";
    pub const ENGINE_DURATION_SECONDS: &str = "adreel_engine_duration_seconds";
}

/// Record a finished routing call.
pub fn record_route(status: RouterStatus, reason: Option<&str>, duration_secs: f64) {
    let labels = [
        ("status", status.as_str().to_string()),
        ("reason", reason.unwrap_or("none").to_string()),
    ];
    counter!(names::ROUTES_TOTAL, &labels).increment(1);
    histogram!(names::ROUTE_DURATION_SECONDS, &labels[..1]).record(duration_secs);
}

/// Record one engine attempt.
pub fn record_dispatch_attempt(engine_id: &str, duration_secs: f64) {
    let labels = [("engine", engine_id.to_string())];
    counter!(names::DISPATCH_ATTEMPTS_TOTAL, &labels).increment(1);
    histogram!(names::ENGINE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a failed engine attempt.
pub fn record_dispatch_failure(engine_id: &str, kind: &str) {
    let labels = [
        ("engine", engine_id.to_string()),
        ("kind", kind.to_string()),
    ];
    counter!(names::DISPATCH_FAILURES_TOTAL, &labels).increment(1);
}
