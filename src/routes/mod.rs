use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::config::AppConfig;

pub mod classify;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod upload;
pub mod videos;

/// Build the HTTP router. `/metrics` is mounted only when a recorder handle
/// is supplied.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    let cors = cors_layer(&state.config);

    let mut app = Router::new()
        .route("/", get(health::health_check))
        .route("/health", get(health::health_check))
        .route("/api/classify", axum::routing::post(classify::classify_image))
        .route("/api/heatmap-data", get(classify::heatmap_data))
        .route(
            "/api/classifications/{id}",
            get(classify::get_classification).delete(classify::delete_classification),
        )
        .route("/api/images/{id}", get(classify::get_image))
        .route("/api/stats", get(classify::stats))
        .route("/api/classify-video", axum::routing::post(videos::classify_video))
        .route("/api/videos/{id}", get(videos::get_video))
        .route(
            "/api/video-classifications",
            get(videos::list_video_classifications),
        )
        .route(
            "/api/video-classifications/{id}",
            get(videos::get_video_classification).delete(videos::delete_video_classification),
        )
        .route("/api/demo/latest-video", get(videos::demo_latest_video))
        .route(
            "/api/classify-video-async",
            axum::routing::post(jobs::submit_video_job),
        )
        .route("/api/jobs", get(jobs::list_active_jobs))
        .route(
            "/api/jobs/{id}",
            get(jobs::get_job).delete(jobs::delete_job),
        )
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    match config.cors_origin_list() {
        None => CorsLayer::permissive(),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}
