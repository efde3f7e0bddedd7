use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::detection::Detection;
use crate::services::aggregator::StageCounts;

/// GPS location attached to an upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Location {
    #[garde(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,

    #[garde(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
}

impl Location {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Fill whichever coordinate is missing from `fallback`.
    pub fn or(self, fallback: Location) -> Self {
        Self {
            latitude: self.latitude.or(fallback.latitude),
            longitude: self.longitude.or(fallback.longitude),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Input for a new image classification record. Only the annotated
/// derivative of the upload is ever persisted.
#[derive(Debug, Clone)]
pub struct NewImageRecord {
    pub id: Uuid,
    pub annotated_image: Vec<u8>,
    pub filename: String,
    pub content_type: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

/// Queryable metadata of an image classification. The annotated bytes are
/// fetched separately through [`StoredImage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageClassificationRecord {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

impl From<&NewImageRecord> for ImageClassificationRecord {
    fn from(new: &NewImageRecord) -> Self {
        Self {
            id: new.id,
            filename: new.filename.clone(),
            content_type: new.content_type.clone(),
            location: new.location,
            timestamp: new.timestamp,
            detections: new.detections.clone(),
        }
    }
}

/// Annotated image bytes with the headers needed to serve them.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// Stream properties reported by the detection adapter for a video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub total_frames: u64,
    pub fps: f64,
    pub duration_seconds: f64,
}

/// Video-level statistics derived from per-frame detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub stage_summary: StageCounts,
    pub total_detections: u64,
    pub average_flowers_per_frame: f64,
}

/// Metadata row of a video classification. `video_blob_ref` is the opaque
/// key of the annotated video in blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoClassificationRecord {
    pub id: Uuid,
    pub video_blob_ref: String,
    pub filename: String,
    pub content_type: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub total_frames: u64,
    pub fps: f64,
    pub duration_seconds: f64,
    pub frame_results: Vec<Vec<Detection>>,
    pub stage_summary: StageCounts,
    pub total_detections: u64,
    pub average_flowers_per_frame: f64,
}

impl VideoClassificationRecord {
    pub fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            total_frames: self.total_frames,
            fps: self.fps,
            duration_seconds: self.duration_seconds,
        }
    }

    pub fn summary(&self) -> VideoSummary {
        VideoSummary {
            stage_summary: self.stage_summary.clone(),
            total_detections: self.total_detections,
            average_flowers_per_frame: self.average_flowers_per_frame,
        }
    }
}
