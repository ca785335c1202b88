//! Metrics collection.
//!
//! # Responsibilities
//! - Define watch-core metrics (fetches, changes, retries, breaker activity)
//! - Record through the `metrics` facade; the host application installs the exporter
//!
//! # Metrics
//! - `control_plane_fetch_total` (counter): fetches by kind, outcome
//! - `control_plane_fetch_duration_seconds` (histogram): fetch latency incl. retries
//! - `control_plane_changes_total` (counter): snapshot changes by kind
//! - `control_plane_retry_attempts_total` (counter): retries scheduled
//! - `circuit_breaker_transitions_total` (counter): state changes by breaker, target state
//! - `circuit_breaker_rejections_total` (counter): calls refused while open
//! - `service_instances` (gauge): instances by service, status
//! - `active_watchers` (gauge): running watchers by kind
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - Labels for kind, breaker, service, status

use tokio::time::Instant;

use crate::control_plane::InstanceSummary;

pub fn record_fetch(kind: &'static str, outcome: &'static str, started: Instant) {
    metrics::counter!("control_plane_fetch_total", "kind" => kind, "outcome" => outcome).increment(1);
    metrics::histogram!("control_plane_fetch_duration_seconds", "kind" => kind)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_change(kind: &'static str) {
    metrics::counter!("control_plane_changes_total", "kind" => kind).increment(1);
}

pub fn record_retry() {
    metrics::counter!("control_plane_retry_attempts_total").increment(1);
}

pub fn record_breaker_transition(breaker: &str, to: &'static str) {
    metrics::counter!(
        "circuit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(breaker: &str) {
    metrics::counter!("circuit_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_instance_summary(service: &str, summary: &InstanceSummary) {
    for (status, count) in [
        ("healthy", summary.healthy),
        ("unhealthy", summary.unhealthy),
        ("isolated", summary.isolated),
    ] {
        metrics::gauge!("service_instances", "service" => service.to_string(), "status" => status)
            .set(count as f64);
    }
}

pub fn record_active_watchers(kind: &'static str, count: usize) {
    metrics::gauge!("active_watchers", "kind" => kind).set(count as f64);
}
