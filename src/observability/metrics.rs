//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience metrics (attempts, latency, circuit state, queue depth)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-provider and aggregate metrics
//!
//! # Metrics
//! - `resilience_attempts_total` (counter): attempts by provider, class, outcome
//! - `resilience_attempt_duration_seconds` (histogram): attempt latency by provider
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_provider_health` (gauge): 1=healthy, 0=unhealthy
//! - `resilience_queue_depth` (gauge): requests by status (pending, in_flight)
//! - `resilience_requests_total` (counter): finished requests by class, status
//! - `resilience_outcomes_dropped_total` (counter): outcome records lost to backpressure
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users pay nothing
//! - Labels for provider, class, outcome

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One attempt against a provider finished.
pub fn record_attempt(provider: &str, class: &str, outcome: &'static str, latency: Duration) {
    ::metrics::counter!(
        "resilience_attempts_total",
        "provider" => provider.to_string(),
        "class" => class.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!(
        "resilience_attempt_duration_seconds",
        "provider" => provider.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_circuit_state(provider: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("resilience_circuit_state", "provider" => provider.to_string()).set(value);
}

pub fn record_provider_health(provider: &str, healthy: bool) {
    ::metrics::gauge!("resilience_provider_health", "provider" => provider.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_queue_depth(pending: usize, in_flight: usize) {
    ::metrics::gauge!("resilience_queue_depth", "status" => "pending").set(pending as f64);
    ::metrics::gauge!("resilience_queue_depth", "status" => "in_flight").set(in_flight as f64);
}

/// A request reached a terminal status.
pub fn record_request(class: &str, status: &'static str) {
    ::metrics::counter!(
        "resilience_requests_total",
        "class" => class.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn record_outcome_dropped() {
    ::metrics::counter!("resilience_outcomes_dropped_total").increment(1);
}
