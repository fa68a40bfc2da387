//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_decisions_total` (counter): decisions by outcome and deciding stage
//! - `guard_decision_duration_seconds` (histogram): engine latency per decision
//! - `guard_rate_limited_total` (counter): rate-limit denials by window
//! - `guard_blocks_imposed_total` (counter): blocks by kind and threat level
//! - `guard_active_blocks` (gauge): blocks left after the last purge
//! - `guard_audit_write_failures_total` (counter): failed audit appends
//!
//! Without an installed recorder every call is a no-op.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::security::types::{DenialKind, RateWindow, ThreatLevel};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(allowed: bool, stage: &'static str, start: Instant) {
    let outcome = if allowed { "allow" } else { "deny" };
    metrics::counter!("guard_decisions_total", "outcome" => outcome, "stage" => stage).increment(1);
    metrics::histogram!("guard_decision_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(window: RateWindow) {
    metrics::counter!("guard_rate_limited_total", "window" => window.as_str()).increment(1);
}

pub fn record_block(kind: &DenialKind, level: ThreatLevel) {
    metrics::counter!(
        "guard_blocks_imposed_total",
        "kind" => kind.code(),
        "threat_level" => level.as_str()
    )
    .increment(1);
}

pub fn record_active_blocks(count: usize) {
    metrics::gauge!("guard_active_blocks").set(count as f64);
}

pub fn record_audit_failure() {
    metrics::counter!("guard_audit_write_failures_total").increment(1);
}
