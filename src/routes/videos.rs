use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::responses::{DeletedResponse, VideoClassificationList, VideoClassificationResponse};
use crate::routes::upload::Upload;
use crate::services::video_job::{self, Progress, VideoJobSpec};

/// POST /api/classify-video: process a video and wait for the result.
pub async fn classify_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<VideoClassificationResponse>> {
    let mut upload = Upload::read(multipart).await?;
    let file = upload.take_file()?;
    let location = upload.location()?;

    let id = Uuid::new_v4();
    let spec = VideoJobSpec::new(id, &state.config.upload_dir, &file.filename, location);
    let _scratch = spec.scratch_files();

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create upload dir: {e}")))?;
    tokio::fs::write(&spec.input_path, &file.bytes)
        .await
        .map_err(|e| AppError::Internal(format!("failed to store upload: {e}")))?;

    let record = video_job::process_video(
        &state.detection,
        &state.records,
        id,
        &spec.input_path,
        &spec.output_path,
        location,
        &file.filename,
        &Progress::Silent,
    )
    .await?;

    tracing::info!(
        record_id = %id,
        total_frames = record.total_frames,
        total_detections = record.total_detections,
        "Video classified"
    );

    Ok(Json(VideoClassificationResponse::from_record(
        record,
        upload.include_frames,
    )))
}

/// GET /api/videos/{id}: the annotated video, with single-range support.
///
/// A range request fetches only the requested window from blob storage.
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let blob = state
        .records
        .video_blob(id)
        .await?
        .ok_or_else(|| AppError::not_found("Video", id))?;
    let total = blob.size;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, total));

    let mut response = match range {
        Some(Some((start, end))) => {
            let body = state.records.read_video_range(&blob, start, end).await?;
            let mut response = (StatusCode::PARTIAL_CONTENT, body).into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        Some(None) => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        None => (StatusCode::OK, state.records.read_video(&blob).await?).into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

/// Parse a single `bytes=` range into inclusive offsets. `None` when the
/// range cannot be satisfied.
fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') || total == 0 {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let len: u64 = suffix.parse().ok()?;
            if len == 0 {
                return None;
            }
            (total.saturating_sub(len), total - 1)
        }
        (start, "") => (start.parse().ok()?, total - 1),
        (start, end) => (start.parse().ok()?, end.parse::<u64>().ok()?.min(total - 1)),
    };
    (start <= end && start < total).then_some((start, end))
}

/// GET /api/video-classifications: all video records, newest first.
pub async fn list_video_classifications(
    State(state): State<AppState>,
) -> AppResult<Json<VideoClassificationList>> {
    let videos: Vec<VideoClassificationResponse> = state
        .records
        .get_all_videos()
        .await?
        .into_iter()
        .map(|record| VideoClassificationResponse::from_record(record, false))
        .collect();

    Ok(Json(VideoClassificationList {
        total_records: videos.len(),
        videos,
    }))
}

/// GET /api/video-classifications/{id}
pub async fn get_video_classification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<VideoClassificationResponse>> {
    let record = state
        .records
        .get_video_record(id)
        .await?
        .ok_or_else(|| AppError::not_found("Video classification", id))?;
    Ok(Json(VideoClassificationResponse::from_record(record, true)))
}

/// DELETE /api/video-classifications/{id}: removes the video and its record.
pub async fn delete_video_classification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeletedResponse>> {
    if !state.records.delete_video_record(id).await? {
        return Err(AppError::not_found("Video classification", id));
    }
    tracing::info!(record_id = %id, "Video classification deleted");
    Ok(Json(DeletedResponse {
        message: "Video classification deleted successfully".to_string(),
        id,
    }))
}

/// GET /api/demo/latest-video: the newest stored result after a simulated
/// processing delay.
pub async fn demo_latest_video(
    State(state): State<AppState>,
) -> AppResult<Json<VideoClassificationResponse>> {
    tokio::time::sleep(Duration::from_millis(state.config.demo_delay_ms)).await;
    let record = state
        .records
        .latest_video()
        .await?
        .ok_or_else(|| AppError::NotFound("No video classifications available".into()))?;
    Ok(Json(VideoClassificationResponse::from_record(record, false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_range("bytes=900-", 1000), Some((900, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
        assert_eq!(parse_range("bytes=500-5000", 1000), Some((500, 999)));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=5-2", 1000), None);
        assert_eq!(parse_range("bytes=0-1,5-6", 1000), None);
        assert_eq!(parse_range("items=0-1", 1000), None);
        assert_eq!(parse_range("bytes=0-0", 0), None);
    }
}
