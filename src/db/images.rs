use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::detection::Detection;
use crate::models::record::{ImageClassificationRecord, Location, NewImageRecord, StoredImage};
use crate::services::storage::StorageError;

/// Metadata and annotated-image persistence for image classifications.
#[async_trait]
pub trait ImageRecordRepo: Send + Sync {
    async fn insert(&self, record: &NewImageRecord) -> Result<ImageClassificationRecord, StorageError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ImageClassificationRecord>, StorageError>;

    async fn get_image(&self, id: Uuid) -> Result<Option<StoredImage>, StorageError>;

    /// All records, most recent first.
    async fn get_all(&self) -> Result<Vec<ImageClassificationRecord>, StorageError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;
}

const IMAGE_COLUMNS: &str = "id, filename, content_type, latitude, longitude, timestamp, detections";

pub struct PgImageRecordRepo {
    pool: PgPool,
}

impl PgImageRecordRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<ImageClassificationRecord, StorageError> {
    let detections: Json<Vec<Detection>> = row.try_get("detections")?;
    Ok(ImageClassificationRecord {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        content_type: row.try_get("content_type")?,
        location: Location::new(row.try_get("latitude")?, row.try_get("longitude")?),
        timestamp: row.try_get("timestamp")?,
        detections: detections.0,
    })
}

#[async_trait]
impl ImageRecordRepo for PgImageRecordRepo {
    async fn insert(&self, record: &NewImageRecord) -> Result<ImageClassificationRecord, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO image_classifications
                (id, annotated_image, filename, content_type, latitude, longitude, timestamp, detections)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.annotated_image)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.location.latitude)
        .bind(record.location.longitude)
        .bind(record.timestamp)
        .bind(Json(&record.detections))
        .execute(&self.pool)
        .await?;

        Ok(ImageClassificationRecord::from(record))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ImageClassificationRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM image_classifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<StoredImage>, StorageError> {
        let row = sqlx::query(
            "SELECT annotated_image, content_type, filename FROM image_classifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(StoredImage {
                bytes: r.try_get("annotated_image")?,
                content_type: r.try_get("content_type")?,
                filename: r.try_get("filename")?,
            }),
            None => None,
        })
    }

    async fn get_all(&self) -> Result<Vec<ImageClassificationRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM image_classifications ORDER BY timestamp DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM image_classifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_classifications")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
