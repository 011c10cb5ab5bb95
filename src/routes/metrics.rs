use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<JobQueue>,
}

/// Prometheus metrics scrape endpoint.
/// Refreshes the queue depth gauge, then renders the text exposition format.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Err(e) = state.queue.stats().await {
        tracing::warn!(error = %e, "Failed to refresh queue depth for scrape");
    }
    state.handle.render()
}
