//! In-memory repositories for single-process deployments and tests.
//!
//! They follow the same contracts as the Postgres repositories, including
//! timestamp-descending listings and silent updates of missing jobs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::images::ImageRecordRepo;
use crate::db::jobs::JobStore;
use crate::db::videos::VideoRecordRepo;
use crate::models::job::{Job, JobStatus, JobType, JobUpdate};
use crate::models::record::{
    ImageClassificationRecord, NewImageRecord, StoredImage, VideoClassificationRecord,
};
use crate::services::storage::StorageError;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        job_id: Uuid,
        job_type: JobType,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<Job, StorageError> {
        let mut job = Job::new(job_id, job_type, metadata);
        if status != JobStatus::Queued {
            job.status = status;
            if status.is_terminal() {
                job.completed_at = Some(Utc::now());
            }
        }
        self.jobs.write().await.insert(job_id, job.clone());
        Ok(job)
    }

    async fn update_status(&self, job_id: Uuid, update: &JobUpdate) -> Result<(), StorageError> {
        match self.jobs.write().await.get_mut(&job_id) {
            Some(job) => job.apply(update),
            None => {
                tracing::debug!(job_id = %job_id, status = %update.status, "Ignoring update for missing job");
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, StorageError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn get_active_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let mut active: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|job| job.created_at);
        Ok(active)
    }

    async fn delete_by_id(&self, job_id: Uuid) -> Result<bool, StorageError> {
        Ok(self.jobs.write().await.remove(&job_id).is_some())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryImageRecordRepo {
    records: RwLock<HashMap<Uuid, (ImageClassificationRecord, StoredImage)>>,
}

impl MemoryImageRecordRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageRecordRepo for MemoryImageRecordRepo {
    async fn insert(&self, record: &NewImageRecord) -> Result<ImageClassificationRecord, StorageError> {
        let metadata = ImageClassificationRecord::from(record);
        let image = StoredImage {
            bytes: record.annotated_image.clone(),
            content_type: record.content_type.clone(),
            filename: record.filename.clone(),
        };
        self.records
            .write()
            .await
            .insert(record.id, (metadata.clone(), image));
        Ok(metadata)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ImageClassificationRecord>, StorageError> {
        Ok(self.records.read().await.get(&id).map(|(r, _)| r.clone()))
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<StoredImage>, StorageError> {
        Ok(self.records.read().await.get(&id).map(|(_, i)| i.clone()))
    }

    async fn get_all(&self) -> Result<Vec<ImageClassificationRecord>, StorageError> {
        let mut records: Vec<ImageClassificationRecord> = self
            .records
            .read()
            .await
            .values()
            .map(|(r, _)| r.clone())
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.records.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryVideoRecordRepo {
    records: RwLock<HashMap<Uuid, VideoClassificationRecord>>,
}

impl MemoryVideoRecordRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoRecordRepo for MemoryVideoRecordRepo {
    async fn insert(&self, record: &VideoClassificationRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StorageError::InvalidRow(format!(
                "video classification {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<VideoClassificationRecord>, StorageError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<VideoClassificationRecord>, StorageError> {
        let mut records: Vec<VideoClassificationRecord> =
            self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn latest(&self) -> Result<Option<VideoClassificationRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .max_by_key(|record| record.timestamp)
            .cloned())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.records.read().await.len() as u64)
    }
}
