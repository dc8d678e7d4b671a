//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_requests_total` (counter): forwarded requests by method, status
//! - `edge_request_duration_seconds` (histogram): forward latency
//! - `edge_ws_sessions_total` (counter): relay sessions by outcome
//! - `edge_ws_sessions_active` (gauge): live relay sessions
//! - `edge_backend_ready` (gauge): 1=ready, 0=not ready
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exporter runs its own HTTP listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("edge_requests_total", &labels).increment(1);
    metrics::histogram!("edge_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_session_opened() {
    metrics::gauge!("edge_ws_sessions_active").increment(1.0);
}

pub fn record_session_closed(outcome: &'static str) {
    metrics::gauge!("edge_ws_sessions_active").decrement(1.0);
    metrics::counter!("edge_ws_sessions_total", "outcome" => outcome).increment(1);
}

/// Session whose backend leg never connected.
pub fn record_session_rejected() {
    metrics::counter!("edge_ws_sessions_total", "outcome" => "connect_failed").increment(1);
}

pub fn record_backend_ready(ready: bool) {
    metrics::gauge!("edge_backend_ready").set(if ready { 1.0 } else { 0.0 });
}
