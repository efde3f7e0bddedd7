use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `connected`, or `error: <reason>`.
    pub database: String,
    pub timestamp: DateTime<Utc>,
}

/// GET / and GET /health: liveness plus database connectivity.
///
/// Always answers 200 so the service stays reachable while the database is
/// down; the `database` field carries the failure.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.jobs.ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            format!("error: {e}")
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        database,
        timestamp: Utc::now(),
    })
}
