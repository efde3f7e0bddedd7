use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Install the global Prometheus recorder and describe the service metrics.
pub fn install_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

pub fn describe() {
    metrics::describe_counter!(
        "video_jobs_submitted_total",
        "Total async video jobs submitted"
    );
    metrics::describe_counter!(
        "video_jobs_completed_total",
        "Total async video jobs completed"
    );
    metrics::describe_counter!(
        "video_jobs_failed_total",
        "Total async video jobs that failed"
    );
    metrics::describe_gauge!(
        "video_jobs_active",
        "Worker slots currently running a video job"
    );
    metrics::describe_histogram!(
        "video_job_processing_seconds",
        "Time to process one async video job"
    );
    metrics::describe_counter!(
        "classifications_total",
        "Total image classifications"
    );
}
