use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobType, JobUpdate};
use crate::services::storage::StorageError;

/// Persistence boundary for job state.
///
/// Every write touches a single job keyed by id; concurrent writers to the
/// same id are last-writer-wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(
        &self,
        job_id: Uuid,
        job_type: JobType,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<Job, StorageError>;

    /// Partial update. Updates to an id that no longer exists are ignored.
    async fn update_status(&self, job_id: Uuid, update: &JobUpdate) -> Result<(), StorageError>;

    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, StorageError>;

    /// Jobs that are queued or processing, oldest first.
    async fn get_active_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// Removes the record only; in-flight work is not interrupted.
    async fn delete_by_id(&self, job_id: Uuid) -> Result<bool, StorageError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StorageError>;
}

const JOB_COLUMNS: &str = "job_id, job_type, status, progress, message, metadata, \
                           created_at, updated_at, completed_at, result, error";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StorageError> {
    let status: String = row.try_get("status")?;
    let job_type: String = row.try_get("job_type")?;
    let progress: i16 = row.try_get("progress")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        job_type: job_type
            .parse()
            .map_err(|_| StorageError::InvalidRow(format!("unknown job type {job_type}")))?,
        status: status
            .parse()
            .map_err(|_| StorageError::InvalidRow(format!("unknown job status {status}")))?,
        progress: progress.clamp(0, 100) as u8,
        message: row.try_get("message")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        job_id: Uuid,
        job_type: JobType,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<Job, StorageError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (job_id, job_type, status, progress, metadata, completed_at)
            VALUES ($1, $2, $3, 0, $4, CASE WHEN $3 IN ('completed', 'failed') THEN NOW() END)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(job_type.to_string())
        .bind(status.to_string())
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn update_status(&self, job_id: Uuid, update: &JobUpdate) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                progress = GREATEST(progress, COALESCE($3, progress)),
                message = COALESCE($4, message),
                result = CASE WHEN $2 = 'completed' THEN COALESCE($5, result) END,
                error = CASE WHEN $2 = 'failed' THEN COALESCE($6, error) END,
                completed_at = CASE
                    WHEN $2 IN ('completed', 'failed') THEN COALESCE(completed_at, NOW())
                END,
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(update.status.to_string())
        .bind(update.progress.map(|p| i16::from(p.min(100))))
        .bind(update.message.as_deref())
        .bind(update.result.clone())
        .bind(update.error.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(job_id = %job_id, status = %update.status, "Ignoring update for missing job");
        }
        Ok(())
    }

    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_active_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status IN ('queued', 'processing')
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn delete_by_id(&self, job_id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
