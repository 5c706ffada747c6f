//! Metrics collection and exposition.
//!
//! # Metrics
//! - `frontdoor_connections_total` (counter): accepted connections by kind
//! - `frontdoor_handshakes_total` (counter): WebSocket handshakes by outcome
//! - `frontdoor_faults_total` (counter): failed request handler runs
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with a scrape endpoint on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_connection(kind: &'static str) {
    counter!("frontdoor_connections_total", "kind" => kind).increment(1);
}

pub fn record_handshake(outcome: &'static str) {
    counter!("frontdoor_handshakes_total", "outcome" => outcome).increment(1);
}

pub fn record_fault() {
    counter!("frontdoor_faults_total").increment(1);
}
