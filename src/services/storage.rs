use std::collections::HashMap;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tokio::sync::RwLock;

/// Blob storage for large binaries referenced from metadata records by an
/// opaque key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Fails with [`StorageError::BlobNotFound`] for unknown keys.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Size of an object in bytes.
    async fn size(&self, key: &str) -> Result<u64, StorageError>;

    /// Bytes `start..=end` of an object; `end` is clamped to the object size.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Client for an S3-compatible bucket (R2, MinIO, AWS).
pub struct S3BlobStore {
    bucket: Box<Bucket>,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        check_status(key, response.status_code())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let (head, code) = self.bucket.head_object(key).await?;
        check_status(key, code)?;
        head.content_length
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StorageError::Blob(format!("object {key} has no content length")))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object_range(key, start, Some(end)).await?;
        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await?;
        match response.status_code() {
            // Deleting a missing object is not an error for S3.
            404 => Ok(()),
            code => check_status(key, code),
        }
    }
}

fn check_status(key: &str, code: u16) -> Result<(), StorageError> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StorageError::BlobNotFound(key.to_string())),
        code => Err(StorageError::Blob(format!(
            "object {key} request failed with status {code}"
        ))),
    }
}

/// Process-local blob store for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::BlobNotFound(key.to_string()))
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::BlobNotFound(key.to_string()))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        let objects = self.objects.read().await;
        let data = objects
            .get(key)
            .ok_or_else(|| StorageError::BlobNotFound(key.to_string()))?;
        let start = (start as usize).min(data.len());
        let end = (end as usize).saturating_add(1).min(data.len()).max(start);
        Ok(data[start..end].to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
