//! Prometheus metrics for the relay
//!
//! Exposes metrics at GET /metrics in Prometheus text format.

use axum::{routing::get, Router};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the Prometheus recorder as the global recorder.
/// Returns the handle for rendering metrics on the /metrics endpoint.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Create metrics route that can be merged into any Router
pub fn routes<S: Clone + Send + Sync + 'static>(handle: PrometheusHandle) -> Router<S> {
    let handle = Arc::new(handle);
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a finished transaction; `outcome` is "accepted" or a rejection kind
pub fn record_transaction(kind: &str, outcome: &str) {
    counter!("relay_transactions_total", "kind" => kind.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record end-to-end transaction latency
pub fn record_transaction_latency(kind: &str, duration_secs: f64) {
    histogram!("relay_transaction_duration_seconds", "kind" => kind.to_string()).record(duration_secs);
}

/// Record one node request of a fan-out
pub fn record_node_request(outcome: &str) {
    counter!("relay_node_requests_total", "outcome" => outcome.to_string()).increment(1);
}
