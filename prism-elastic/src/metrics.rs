//! Client observability metrics
//!
//! Provides Prometheus-compatible metrics for the connection core:
//! - Request attempts and durations
//! - Retries
//! - Node liveness transitions and pool size
//! - Discovery passes and health-check probes

use std::time::{Duration, Instant};

/// Record one attempt against a node
pub fn record_attempt(method: &str, node: &str, outcome: &str, duration: Duration) {
    metrics::counter!(
        "prism_elastic_requests_total",
        "method" => method.to_string(),
        "node" => node.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);

    metrics::histogram!(
        "prism_elastic_request_duration_seconds",
        "method" => method.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a retry after a transport failure
pub fn record_retry(method: &str, error_type: &str) {
    metrics::counter!(
        "prism_elastic_retries_total",
        "method" => method.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record that a request gave up with an error
pub fn record_request_error(method: &str, error_type: &str) {
    metrics::counter!(
        "prism_elastic_request_errors_total",
        "method" => method.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Update node liveness gauge
pub fn record_node_transition(url: &str, dead: bool) {
    let state = if dead { "dead" } else { "alive" };
    metrics::counter!(
        "prism_elastic_node_transitions_total",
        "state" => state,
    )
    .increment(1);

    metrics::gauge!(
        "prism_elastic_node_dead",
        "node" => url.to_string(),
    )
    .set(if dead { 1.0 } else { 0.0 });
}

/// Record pool composition after a mutation
pub fn record_pool_size(alive: usize, dead: usize) {
    metrics::gauge!("prism_elastic_pool_nodes_alive").set(alive as f64);
    metrics::gauge!("prism_elastic_pool_nodes_dead").set(dead as f64);
}

/// Record a finished discovery pass
pub fn record_discovery(success: bool, discovered: usize, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!(
        "prism_elastic_discovery_total",
        "status" => status,
    )
    .increment(1);

    metrics::histogram!("prism_elastic_discovery_duration_seconds")
        .record(duration.as_secs_f64());

    if success {
        metrics::gauge!("prism_elastic_discovered_nodes").set(discovered as f64);
    }
}

/// Record a single health probe result
pub fn record_health_probe(node: &str, healthy: bool, duration: Duration) {
    let status = if healthy { "healthy" } else { "unhealthy" };
    metrics::counter!(
        "prism_elastic_health_probes_total",
        "node" => node.to_string(),
        "status" => status,
    )
    .increment(1);

    metrics::histogram!("prism_elastic_health_probe_duration_seconds")
        .record(duration.as_secs_f64());
}

/// Guard for timing a single attempt
pub struct AttemptTimer {
    method: String,
    node: String,
    start: Instant,
}

impl AttemptTimer {
    pub fn new(method: &str, node: &str) -> Self {
        Self {
            method: method.to_string(),
            node: node.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record the attempt with its outcome label
    pub fn finish(self, outcome: &str) -> Duration {
        let duration = self.start.elapsed();
        record_attempt(&self.method, &self.node, outcome, duration);
        duration
    }
}
