//! Metrics collection and exposition.
//!
//! # Metrics
//! - `portplex_events_total` (counter): handler callbacks by port, event
//! - `portplex_handshakes_total` (counter): upgrade attempts by port, outcome
//! - `portplex_active_connections` (gauge): registered TCP/WebSocket connections
//! - `portplex_plugins_ready` (gauge): plugins that completed a phase

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_event(port: &str, event: &'static str) {
    ::metrics::counter!("portplex_events_total", "port" => port.to_owned(), "event" => event).increment(1);
}

pub fn record_handshake(port: &str, outcome: &'static str) {
    ::metrics::counter!("portplex_handshakes_total", "port" => port.to_owned(), "outcome" => outcome)
        .increment(1);
}

pub fn record_active_connections(count: usize) {
    ::metrics::gauge!("portplex_active_connections").set(count as f64);
}

pub fn record_plugins_ready(phase: &'static str, count: usize) {
    ::metrics::gauge!("portplex_plugins_ready", "phase" => phase).set(count as f64);
}
