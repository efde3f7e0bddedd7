use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::detection::Detection;
use crate::models::job::{Job, JobStatus, JobType};
use crate::models::record::{ImageClassificationRecord, Location, VideoClassificationRecord};
use crate::services::aggregator::{self, StageCounts};

pub fn image_path(id: Uuid) -> String {
    format!("/api/images/{id}")
}

pub fn video_path(id: Uuid) -> String {
    format!("/api/videos/{id}")
}

/// Response from POST /api/classify and GET /api/classifications/{id}.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub id: Uuid,
    pub image_path: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub flowers: Vec<Detection>,
    pub flower_count: u64,
    pub stage_summary: StageCounts,
}

impl From<ImageClassificationRecord> for ClassificationResponse {
    fn from(record: ImageClassificationRecord) -> Self {
        let summary = aggregator::summarize(&record.detections);
        Self {
            id: record.id,
            image_path: image_path(record.id),
            location: record.location,
            timestamp: record.timestamp,
            flowers: record.detections,
            flower_count: summary.flower_count,
            stage_summary: summary.stage_counts,
        }
    }
}

/// A location-tagged summary of one stored image classification.
#[derive(Debug, Serialize, Deserialize)]
pub struct HeatmapDataPoint {
    pub id: Uuid,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub flowers: Vec<Detection>,
    pub total_flowers: u64,
    pub stage_counts: StageCounts,
}

impl From<ImageClassificationRecord> for HeatmapDataPoint {
    fn from(record: ImageClassificationRecord) -> Self {
        let summary = aggregator::summarize(&record.detections);
        Self {
            id: record.id,
            latitude: record.location.latitude,
            longitude: record.location.longitude,
            timestamp: record.timestamp,
            flowers: record.detections,
            total_flowers: summary.flower_count,
            stage_counts: summary.stage_counts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeatmapResponse {
    pub total_records: usize,
    pub data_points: Vec<HeatmapDataPoint>,
}

/// Response for video classifications (sync endpoint, lookups, demo).
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoClassificationResponse {
    pub id: Uuid,
    pub video_path: String,
    pub filename: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub total_frames: u64,
    pub fps: f64,
    pub duration_seconds: f64,
    pub total_detections: u64,
    pub average_flowers_per_frame: f64,
    pub stage_summary: StageCounts,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_results: Option<Vec<Vec<Detection>>>,
}

impl VideoClassificationResponse {
    pub fn from_record(record: VideoClassificationRecord, include_frames: bool) -> Self {
        Self {
            id: record.id,
            video_path: video_path(record.id),
            filename: record.filename,
            location: record.location,
            timestamp: record.timestamp,
            total_frames: record.total_frames,
            fps: record.fps,
            duration_seconds: record.duration_seconds,
            total_detections: record.total_detections,
            average_flowers_per_frame: record.average_flowers_per_frame,
            stage_summary: record.stage_summary,
            frame_results: include_frames.then_some(record.frame_results),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoClassificationList {
    pub total_records: usize,
    pub videos: Vec<VideoClassificationResponse>,
}

/// Result payload stored on a completed video job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJobResult {
    pub job_id: Uuid,
    pub video_path: String,
    pub total_frames: u64,
    pub fps: f64,
    pub duration_seconds: f64,
    pub total_detections: u64,
    pub average_flowers_per_frame: f64,
    pub stage_summary: StageCounts,
}

impl VideoJobResult {
    pub fn from_record(record: &VideoClassificationRecord) -> Self {
        Self {
            job_id: record.id,
            video_path: video_path(record.id),
            total_frames: record.total_frames,
            fps: record.fps,
            duration_seconds: record.duration_seconds,
            total_detections: record.total_detections,
            average_flowers_per_frame: record.average_flowers_per_frame,
            stage_summary: record.stage_summary.clone(),
        }
    }
}

/// Response from POST /api/classify-video-async.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSubmittedResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub estimated_time_remaining: Option<f64>,
    pub message: String,
}

/// Current state of a job as seen by a polling client.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimated_time_remaining: Option<f64>,
}

impl JobSnapshot {
    pub fn at(job: Job, now: DateTime<Utc>) -> Self {
        let estimated_time_remaining = job.estimated_time_remaining(now);
        Self {
            job_id: job.job_id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            message: job.message,
            created_at: job.created_at,
            completed_at: job.completed_at,
            result: job.result,
            error: job.error,
            estimated_time_remaining,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub total_jobs: usize,
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub image_records: u64,
    pub video_records: u64,
    pub active_jobs: usize,
}
