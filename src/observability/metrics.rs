//! Metrics collection and exposition.
//!
//! # Metrics
//! - `agent_envelopes_sent_total` (counter): envelopes written, by payload type
//! - `agent_envelopes_received_total` (counter): envelopes decoded, by route (reply, incoming)
//! - `agent_read_failures_total` (counter): read loops ended by a decode or I/O error
//! - `agent_query_failures_total` (counter): queries ended without a reply, by reason
//! - `agent_query_duration_seconds` (histogram): query round-trip latency
//! - `agent_active_sessions` (gauge): sessions registered on a server
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter is opt-in via configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_envelope_sent(payload_type: &'static str) {
    metrics::counter!("agent_envelopes_sent_total", "payload_type" => payload_type).increment(1);
}

pub fn record_envelope_received(route: &'static str) {
    metrics::counter!("agent_envelopes_received_total", "route" => route).increment(1);
}

pub fn record_read_failure() {
    metrics::counter!("agent_read_failures_total").increment(1);
}

pub fn record_query_failure(reason: &'static str) {
    metrics::counter!("agent_query_failures_total", "reason" => reason).increment(1);
}

pub fn record_query_latency(latency: Duration) {
    metrics::histogram!("agent_query_duration_seconds").record(latency.as_secs_f64());
}

pub fn record_session_opened() {
    metrics::gauge!("agent_active_sessions").increment(1.0);
}

pub fn record_session_closed() {
    metrics::gauge!("agent_active_sessions").decrement(1.0);
}
