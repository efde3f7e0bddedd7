use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::detection::Detection;
use crate::models::record::{Location, VideoClassificationRecord};
use crate::services::aggregator::StageCounts;
use crate::services::storage::StorageError;

/// Metadata persistence for video classifications. The annotated video
/// itself lives in blob storage under `video_blob_ref`.
#[async_trait]
pub trait VideoRecordRepo: Send + Sync {
    async fn insert(&self, record: &VideoClassificationRecord) -> Result<(), StorageError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<VideoClassificationRecord>, StorageError>;

    /// All records, most recent first.
    async fn get_all(&self) -> Result<Vec<VideoClassificationRecord>, StorageError>;

    /// The most recent record.
    async fn latest(&self) -> Result<Option<VideoClassificationRecord>, StorageError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;
}

const VIDEO_COLUMNS: &str = "id, video_blob_ref, filename, content_type, latitude, longitude, \
                             timestamp, total_frames, fps, duration_seconds, frame_results, \
                             stage_summary, total_detections, average_flowers_per_frame";

pub struct PgVideoRecordRepo {
    pool: PgPool,
}

impl PgVideoRecordRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<VideoClassificationRecord, StorageError> {
    let frame_results: Json<Vec<Vec<Detection>>> = row.try_get("frame_results")?;
    let stage_summary: Json<StageCounts> = row.try_get("stage_summary")?;
    let total_frames: i64 = row.try_get("total_frames")?;
    let total_detections: i64 = row.try_get("total_detections")?;

    Ok(VideoClassificationRecord {
        id: row.try_get("id")?,
        video_blob_ref: row.try_get("video_blob_ref")?,
        filename: row.try_get("filename")?,
        content_type: row.try_get("content_type")?,
        location: Location::new(row.try_get("latitude")?, row.try_get("longitude")?),
        timestamp: row.try_get("timestamp")?,
        total_frames: total_frames.max(0) as u64,
        fps: row.try_get("fps")?,
        duration_seconds: row.try_get("duration_seconds")?,
        frame_results: frame_results.0,
        stage_summary: stage_summary.0,
        total_detections: total_detections.max(0) as u64,
        average_flowers_per_frame: row.try_get("average_flowers_per_frame")?,
    })
}

#[async_trait]
impl VideoRecordRepo for PgVideoRecordRepo {
    async fn insert(&self, record: &VideoClassificationRecord) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO video_classifications ({VIDEO_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#
        ))
        .bind(record.id)
        .bind(&record.video_blob_ref)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.location.latitude)
        .bind(record.location.longitude)
        .bind(record.timestamp)
        .bind(i64::try_from(record.total_frames).unwrap_or(i64::MAX))
        .bind(record.fps)
        .bind(record.duration_seconds)
        .bind(Json(&record.frame_results))
        .bind(Json(&record.stage_summary))
        .bind(i64::try_from(record.total_detections).unwrap_or(i64::MAX))
        .bind(record.average_flowers_per_frame)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<VideoClassificationRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM video_classifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_all(&self) -> Result<Vec<VideoClassificationRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM video_classifications ORDER BY timestamp DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn latest(&self) -> Result<Option<VideoClassificationRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM video_classifications ORDER BY timestamp DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM video_classifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video_classifications")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
