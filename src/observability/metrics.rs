//! Metrics collection and exposition.
//!
//! # Metrics
//! - `connector_connections_active` (gauge): currently open connections
//! - `connector_bytes_total{direction}` (counter): plaintext bytes moved
//! - `connector_requests_total` (counter): decoded requests
//! - `connector_messages_total{outcome}` (counter): responses sent or failed
//! - `connector_tls_handshakes_total{outcome}` (counter)
//! - `connector_delegated_tasks_total` (counter)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so the core records unconditionally
//! - The Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened() {
    ::metrics::gauge!("connector_connections_active").increment(1.0);
}

pub fn record_connection_closed() {
    ::metrics::gauge!("connector_connections_active").decrement(1.0);
}

/// Plaintext bytes moved in `direction` ("inbound" or "outbound").
pub fn record_wire_bytes(direction: &'static str, bytes: usize) {
    ::metrics::counter!("connector_bytes_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_request() {
    ::metrics::counter!("connector_requests_total").increment(1);
}

/// A response left the queue: "sent" or "failed".
pub fn record_message(outcome: &'static str) {
    ::metrics::counter!("connector_messages_total", "outcome" => outcome).increment(1);
}

pub fn record_handshake(outcome: &'static str) {
    ::metrics::counter!("connector_tls_handshakes_total", "outcome" => outcome).increment(1);
}

pub fn record_delegated_task() {
    ::metrics::counter!("connector_delegated_tasks_total").increment(1);
}
