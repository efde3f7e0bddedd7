use axum::extract::{Multipart, Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::job::JobStatus;
use crate::models::responses::{DeletedResponse, JobListResponse, JobSnapshot, JobSubmittedResponse};
use crate::routes::upload::Upload;

/// POST /api/classify-video-async: queue a video job and return its id.
pub async fn submit_video_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<JobSubmittedResponse>> {
    let mut upload = Upload::read(multipart).await?;
    let file = upload.take_file()?;
    let location = upload.location()?;

    let job_id = state
        .coordinator
        .submit(&file.bytes, location, &file.filename)
        .await?;

    Ok(Json(JobSubmittedResponse {
        job_id,
        status: JobStatus::Queued,
        progress: 0,
        estimated_time_remaining: None,
        message: format!("Video queued for processing. Poll /api/jobs/{job_id} for status."),
    }))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobSnapshot>> {
    state
        .coordinator
        .poll(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Job", job_id))
}

/// GET /api/jobs: queued and processing jobs.
pub async fn list_active_jobs(State(state): State<AppState>) -> AppResult<Json<JobListResponse>> {
    let jobs = state.coordinator.list_active().await?;
    Ok(Json(JobListResponse {
        total_jobs: jobs.len(),
        jobs,
    }))
}

/// DELETE /api/jobs/{id}: removes the job record; a running worker is not stopped.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<DeletedResponse>> {
    if !state.coordinator.cancel(job_id).await? {
        return Err(AppError::not_found("Job", job_id));
    }
    Ok(Json(DeletedResponse {
        message: "Job deleted successfully".to_string(),
        id: job_id,
    }))
}
