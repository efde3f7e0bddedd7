//! The video processing routine shared by the synchronous endpoint and the
//! async job workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::JobStore;
use crate::models::job::{JobStatus, JobUpdate};
use crate::models::record::{Location, VideoClassificationRecord};
use crate::models::responses::VideoJobResult;
use crate::services::detector::{DetectionAdapter, ModelError};
use crate::services::records::RecordStore;
use crate::services::storage::StorageError;

pub const MSG_ANALYZING: &str = "Analyzing video frames...";
pub const MSG_ANNOTATING: &str = "Generating annotated video...";
pub const MSG_SAVING: &str = "Saving to database...";

/// Everything a worker needs to run one job. Sent to worker processes as
/// one JSON line on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJobSpec {
    pub job_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub location: Location,
    pub filename: String,
}

impl VideoJobSpec {
    pub fn new(job_id: Uuid, upload_dir: &Path, filename: &str, location: Location) -> Self {
        Self {
            job_id,
            input_path: upload_dir.join(format!("{job_id}_input.{}", extension_of(filename))),
            output_path: upload_dir.join(format!("{job_id}_output.mp4")),
            location,
            filename: filename.to_string(),
        }
    }

    pub fn scratch_files(&self) -> ScratchFiles {
        ScratchFiles::new([self.input_path.clone(), self.output_path.clone()])
    }
}

/// A worker process's answer to one [`VideoJobSpec`], written as one JSON
/// line on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// File extension of an upload name, `mp4` when it has none.
pub fn extension_of(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mp4")
}

/// Transient files removed when the guard is dropped, on every exit path.
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch file")
                }
            }
        }
    }
}

/// Where progress of a processing run is reported.
pub enum Progress<'a> {
    /// The synchronous endpoint has no job to update.
    Silent,
    Job { store: &'a dyn JobStore, job_id: Uuid },
}

impl Progress<'_> {
    async fn report(&self, progress: u8, message: &str) -> Result<(), JobError> {
        match self {
            Progress::Silent => Ok(()),
            Progress::Job { store, job_id } => {
                tracing::info!(job_id = %job_id, progress, message, "Job progress");
                store
                    .update_status(*job_id, &JobUpdate::processing(progress, message))
                    .await?;
                Ok(())
            }
        }
    }
}

/// Detect, annotate and persist one video. The stored record takes `id`.
#[allow(clippy::too_many_arguments)]
pub async fn process_video(
    detection: &DetectionAdapter,
    records: &RecordStore,
    id: Uuid,
    input: &Path,
    output: &Path,
    location: Location,
    filename: &str,
    progress: &Progress<'_>,
) -> Result<VideoClassificationRecord, JobError> {
    progress.report(10, MSG_ANALYZING).await?;
    let session = detection.session().await?;

    let detect_session = session.clone();
    let detect_input = input.to_path_buf();
    let detections =
        tokio::task::spawn_blocking(move || detect_session.detect_video(&detect_input)).await??;

    progress.report(50, MSG_ANNOTATING).await?;
    let annotate_input = input.to_path_buf();
    let annotate_output = output.to_path_buf();
    let frame_results = detections.frame_results;
    let (frame_results, annotated_path) = tokio::task::spawn_blocking(move || {
        let path = session.annotate_video(&annotate_input, &frame_results, &annotate_output)?;
        Ok::<_, ModelError>((frame_results, path))
    })
    .await??;

    progress.report(80, MSG_SAVING).await?;
    let annotated = tokio::fs::read(&annotated_path).await?;
    let record = records
        .create_video_record(
            id,
            &annotated,
            location,
            frame_results,
            detections.metadata,
            filename,
        )
        .await?;

    Ok(record)
}

/// Stores and model used by the worker routine.
#[derive(Clone)]
pub struct VideoJobContext {
    pub jobs: Arc<dyn JobStore>,
    pub records: RecordStore,
    pub detection: DetectionAdapter,
}

/// Run one async video job to a terminal state.
///
/// Processing failures become a `Failed` job; the returned error is only for
/// failures to record the outcome itself. Scratch files are removed either way.
pub async fn execute(ctx: &VideoJobContext, spec: &VideoJobSpec) -> Result<JobStatus, JobError> {
    let _scratch = spec.scratch_files();
    let started = Instant::now();
    let progress = Progress::Job {
        store: ctx.jobs.as_ref(),
        job_id: spec.job_id,
    };

    tracing::info!(job_id = %spec.job_id, filename = %spec.filename, "Processing video job");

    let outcome = async {
        let record = process_video(
            &ctx.detection,
            &ctx.records,
            spec.job_id,
            &spec.input_path,
            &spec.output_path,
            spec.location,
            &spec.filename,
            &progress,
        )
        .await?;
        Ok::<_, JobError>(serde_json::to_value(VideoJobResult::from_record(&record))?)
    }
    .await;

    let elapsed = started.elapsed().as_secs_f64();

    let failure = match outcome {
        Ok(result) => match ctx.jobs.update_status(spec.job_id, &JobUpdate::completed(result)).await {
            Ok(()) => {
                tracing::info!(job_id = %spec.job_id, elapsed_secs = elapsed, "Video job completed");
                return Ok(JobStatus::Completed);
            }
            Err(e) => JobError::from(e),
        },
        Err(e) => e,
    };

    tracing::error!(job_id = %spec.job_id, elapsed_secs = elapsed, error = %failure, "Video job failed");
    ctx.jobs
        .update_status(spec.job_id, &JobUpdate::failed(failure.to_string()))
        .await?;
    Ok(JobStatus::Failed)
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Worker launch failed: {0}")]
    Launch(String),

    #[error("Worker protocol error: {0}")]
    Worker(String),
}
