//! Metrics collection and exposition.
//!
//! # Metrics
//! - `secure_accept_handshakes_total` (counter): resolved handshakes by outcome
//! - `secure_accept_handshake_duration_seconds` (histogram): accept to terminal state
//! - `secure_accept_handshakes_in_flight` (gauge): attempts not yet resolved
//! - `secure_accept_listener_errors_total` (counter): forwarded listener errors
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in from the binary

use std::net::SocketAddr;
use std::time::Duration;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::server::HandshakeState;

/// Install the Prometheus recorder with an HTTP scrape endpoint at `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a handshake reaching a terminal state.
pub fn record_handshake(state: HandshakeState, elapsed: Duration) {
    let outcome = match state {
        HandshakeState::Secured => "secured",
        HandshakeState::Failed => "failed",
        HandshakeState::Accepted | HandshakeState::Handshaking => return,
    };
    metrics::counter!("secure_accept_handshakes_total", "outcome" => outcome).increment(1);
    metrics::histogram!("secure_accept_handshake_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

pub fn record_in_flight(count: usize) {
    metrics::gauge!("secure_accept_handshakes_in_flight").set(count as f64);
}

pub fn record_listener_error() {
    metrics::counter!("secure_accept_listener_errors_total").increment(1);
}
