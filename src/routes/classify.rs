use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::responses::{
    ClassificationResponse, DeletedResponse, HeatmapDataPoint, HeatmapResponse, StatsResponse,
};
use crate::routes::upload::{Upload, UploadedFile};
use crate::services::geotag;

pub const NOT_AN_IMAGE: &str = "File must be an image (JPEG, PNG, etc.)";

fn is_image(file: &UploadedFile) -> bool {
    match &file.content_type {
        Some(content_type) => content_type.starts_with("image/"),
        None => image::guess_format(&file.bytes).is_ok(),
    }
}

/// POST /api/classify: detect flowers in one image and store the result.
pub async fn classify_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<ClassificationResponse>> {
    let mut upload = Upload::read(multipart).await?;
    let file = upload.take_file()?;
    if !is_image(&file) {
        return Err(AppError::Validation(NOT_AN_IMAGE.into()));
    }

    let mut location = upload.location()?;
    if !location.is_complete() {
        location = location.or(geotag::gps_location(&file.bytes));
    }

    let session = state.detection.session().await?;
    let bytes = file.bytes.clone();
    let (detections, annotated) = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&bytes)
            .map_err(|e| AppError::Validation(format!("Could not decode image: {e}")))?;
        let detections = session.detect(&image)?;
        let annotated = session.annotate(&image, &detections)?;
        Ok::<_, AppError>((detections, annotated))
    })
    .await
    .map_err(|e| AppError::Internal(format!("classification task failed: {e}")))??;

    let id = Uuid::new_v4();
    let record = state
        .records
        .create_image_record(id, annotated, location, detections, &file.filename)
        .await?;

    metrics::counter!("classifications_total").increment(1);
    tracing::info!(
        record_id = %id,
        filename = %file.filename,
        flowers = record.detections.len(),
        "Image classified"
    );

    Ok(Json(ClassificationResponse::from(record)))
}

/// GET /api/heatmap-data: every image classification as a map point.
pub async fn heatmap_data(State(state): State<AppState>) -> AppResult<Json<HeatmapResponse>> {
    let data_points: Vec<HeatmapDataPoint> = state
        .records
        .get_all_images()
        .await?
        .into_iter()
        .map(HeatmapDataPoint::from)
        .collect();

    Ok(Json(HeatmapResponse {
        total_records: data_points.len(),
        data_points,
    }))
}

/// GET /api/classifications/{id}
pub async fn get_classification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ClassificationResponse>> {
    let record = state
        .records
        .get_image_record(id)
        .await?
        .ok_or_else(|| AppError::not_found("Classification", id))?;
    Ok(Json(ClassificationResponse::from(record)))
}

/// DELETE /api/classifications/{id}
pub async fn delete_classification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeletedResponse>> {
    if !state.records.delete_image_record(id).await? {
        return Err(AppError::not_found("Classification", id));
    }
    tracing::info!(record_id = %id, "Image classification deleted");
    Ok(Json(DeletedResponse {
        message: "Classification deleted successfully".to_string(),
        id,
    }))
}

/// GET /api/images/{id}: the annotated image.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let image = state
        .records
        .get_image(id)
        .await?
        .ok_or_else(|| AppError::not_found("Image", id))?;

    Ok((
        [
            (header::CONTENT_TYPE, image.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", image.filename.replace('"', "")),
            ),
        ],
        image.bytes,
    ))
}

/// GET /api/stats: record and job counts.
pub async fn stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        image_records: state.records.count_images().await?,
        video_records: state.records.count_videos().await?,
        active_jobs: state.jobs.get_active_jobs().await?.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(content_type: Option<&str>, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            filename: "f".into(),
            content_type: content_type.map(str::to_string),
            bytes: axum::body::Bytes::from_static(bytes),
        }
    }

    #[test]
    fn test_is_image_uses_content_type_then_magic() {
        assert!(is_image(&file(Some("image/png"), b"")));
        assert!(!is_image(&file(Some("text/plain"), b"\x89PNG\r\n\x1a\n")));
        assert!(is_image(&file(None, b"\x89PNG\r\n\x1a\n")));
        assert!(!is_image(&file(None, b"hello")));
    }
}
