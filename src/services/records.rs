use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{ImageRecordRepo, VideoRecordRepo};
use crate::models::detection::Detection;
use crate::models::record::{
    ImageClassificationRecord, Location, NewImageRecord, StoredImage, VideoClassificationRecord,
    VideoMetadata,
};
use crate::services::aggregator;
use crate::services::storage::{BlobStore, StorageError};

pub const ANNOTATED_IMAGE_CONTENT_TYPE: &str = "image/jpeg";
pub const ANNOTATED_VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Blob key under which the annotated video of a record is stored.
pub fn video_blob_key(id: Uuid) -> String {
    format!("videos/{id}.mp4")
}

/// Location of an annotated video in blob storage.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoBlob {
    pub key: String,
    pub size: u64,
}

/// Persistence boundary for classification records.
///
/// Image records keep their annotated bytes next to the metadata; video
/// records keep the annotated video in blob storage and only the blob key in
/// the metadata row.
#[derive(Clone)]
pub struct RecordStore {
    images: Arc<dyn ImageRecordRepo>,
    videos: Arc<dyn VideoRecordRepo>,
    blobs: Arc<dyn BlobStore>,
}

impl RecordStore {
    pub fn new(
        images: Arc<dyn ImageRecordRepo>,
        videos: Arc<dyn VideoRecordRepo>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            images,
            videos,
            blobs,
        }
    }

    pub async fn create_image_record(
        &self,
        id: Uuid,
        annotated_image: Vec<u8>,
        location: Location,
        detections: Vec<Detection>,
        filename: &str,
    ) -> Result<ImageClassificationRecord, StorageError> {
        let record = NewImageRecord {
            id,
            annotated_image,
            filename: filename.to_string(),
            content_type: ANNOTATED_IMAGE_CONTENT_TYPE.to_string(),
            location,
            timestamp: Utc::now(),
            detections,
        };
        self.images.insert(&record).await
    }

    /// Write the annotated video to blob storage, then the metadata row.
    ///
    /// If the metadata write fails the blob is left behind; there is no
    /// compensating delete.
    pub async fn create_video_record(
        &self,
        id: Uuid,
        annotated_video: &[u8],
        location: Location,
        frame_results: Vec<Vec<Detection>>,
        metadata: VideoMetadata,
        filename: &str,
    ) -> Result<VideoClassificationRecord, StorageError> {
        let blob_ref = video_blob_key(id);
        self.blobs
            .put(&blob_ref, annotated_video, ANNOTATED_VIDEO_CONTENT_TYPE)
            .await?;

        let summary = aggregator::summarize_video(&frame_results, metadata.total_frames);
        let record = VideoClassificationRecord {
            id,
            video_blob_ref: blob_ref,
            filename: filename.to_string(),
            content_type: ANNOTATED_VIDEO_CONTENT_TYPE.to_string(),
            location,
            timestamp: Utc::now(),
            total_frames: metadata.total_frames,
            fps: metadata.fps,
            duration_seconds: metadata.duration_seconds,
            frame_results,
            stage_summary: summary.stage_summary,
            total_detections: summary.total_detections,
            average_flowers_per_frame: summary.average_flowers_per_frame,
        };

        if let Err(e) = self.videos.insert(&record).await {
            tracing::warn!(
                record_id = %id,
                blob_ref = %record.video_blob_ref,
                error = %e,
                "Video metadata write failed, blob left orphaned"
            );
            return Err(e);
        }

        Ok(record)
    }

    pub async fn get_image_record(&self, id: Uuid) -> Result<Option<ImageClassificationRecord>, StorageError> {
        self.images.get_by_id(id).await
    }

    pub async fn get_image(&self, id: Uuid) -> Result<Option<StoredImage>, StorageError> {
        self.images.get_image(id).await
    }

    /// Image records, most recent first.
    pub async fn get_all_images(&self) -> Result<Vec<ImageClassificationRecord>, StorageError> {
        self.images.get_all().await
    }

    pub async fn delete_image_record(&self, id: Uuid) -> Result<bool, StorageError> {
        self.images.delete_by_id(id).await
    }

    pub async fn count_images(&self) -> Result<u64, StorageError> {
        self.images.count().await
    }

    pub async fn get_video_record(&self, id: Uuid) -> Result<Option<VideoClassificationRecord>, StorageError> {
        self.videos.get_by_id(id).await
    }

    /// Video records, most recent first.
    pub async fn get_all_videos(&self) -> Result<Vec<VideoClassificationRecord>, StorageError> {
        self.videos.get_all().await
    }

    pub async fn latest_video(&self) -> Result<Option<VideoClassificationRecord>, StorageError> {
        self.videos.latest().await
    }

    /// Blob key and size of a record's annotated video, without reading it.
    pub async fn video_blob(&self, id: Uuid) -> Result<Option<VideoBlob>, StorageError> {
        let Some(record) = self.videos.get_by_id(id).await? else {
            return Ok(None);
        };
        let size = self.blobs.size(&record.video_blob_ref).await?;
        Ok(Some(VideoBlob {
            key: record.video_blob_ref,
            size,
        }))
    }

    pub async fn read_video(&self, blob: &VideoBlob) -> Result<Vec<u8>, StorageError> {
        self.blobs.get(&blob.key).await
    }

    /// Bytes `start..=end` of a stored video.
    pub async fn read_video_range(
        &self,
        blob: &VideoBlob,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StorageError> {
        self.blobs.get_range(&blob.key, start, end).await
    }

    /// Annotated video bytes of a record, or `None` if the record is unknown.
    pub async fn get_video_blob(&self, id: Uuid) -> Result<Option<Vec<u8>>, StorageError> {
        match self.videos.get_by_id(id).await? {
            Some(record) => self.blobs.get(&record.video_blob_ref).await.map(Some),
            None => Ok(None),
        }
    }

    /// Delete the blob first, then the metadata. Returns whether the
    /// metadata row existed.
    pub async fn delete_video_record(&self, id: Uuid) -> Result<bool, StorageError> {
        let Some(record) = self.videos.get_by_id(id).await? else {
            return Ok(false);
        };
        self.blobs.delete(&record.video_blob_ref).await?;
        self.videos.delete_by_id(id).await
    }

    pub async fn count_videos(&self) -> Result<u64, StorageError> {
        self.videos.count().await
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }
}
