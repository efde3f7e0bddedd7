use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an asynchronous processing job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    VideoClassification,
}

/// A tracked unit of asynchronous work with persisted progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// 0-100, never lowered once reported.
    pub progress: u8,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(job_id: Uuid, job_type: JobType, metadata: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            job_type,
            status: JobStatus::Queued,
            progress: 0,
            message: None,
            metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Apply a partial update, keeping the terminal-state rules:
    /// `completed_at` is set iff terminal, `result` only on completed jobs,
    /// `error` only on failed jobs.
    pub fn apply(&mut self, update: &JobUpdate) {
        let now = Utc::now();
        let entering_terminal = update.status.is_terminal() && !self.status.is_terminal();

        self.status = update.status;
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }

        match self.status {
            JobStatus::Completed => self.error = None,
            JobStatus::Failed => self.result = None,
            JobStatus::Queued | JobStatus::Processing => {
                self.result = None;
                self.error = None;
            }
        }

        if entering_terminal {
            self.completed_at = Some(now);
        } else if !self.status.is_terminal() {
            self.completed_at = None;
        }
        self.updated_at = now;
    }

    /// Linear extrapolation of the remaining time in seconds. Only defined
    /// while processing with some progress reported.
    pub fn estimated_time_remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.status != JobStatus::Processing || self.progress == 0 {
            return None;
        }
        let elapsed = (now - self.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        let estimated_total = elapsed / (f64::from(self.progress) / 100.0);
        Some((estimated_total - elapsed).max(0.0))
    }
}

/// Partial job update written by the worker. `None` fields stay untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Processing,
            progress: Some(progress),
            message: Some(message.into()),
            result: None,
            error: None,
        }
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: JobStatus::Completed,
            progress: Some(100),
            message: Some("Video processing completed".to_string()),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: JobStatus::Failed,
            progress: None,
            message: Some(format!("Error: {error}")),
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> Job {
        Job::new(Uuid::new_v4(), JobType::VideoClassification, serde_json::json!({}))
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        job.apply(&JobUpdate::processing(50, "halfway"));
        job.apply(&JobUpdate::processing(10, "late report"));
        assert_eq!(job.progress, 50);
        assert_eq!(job.message.as_deref(), Some("late report"));
    }

    #[test]
    fn test_completed_sets_completed_at_and_result_only() {
        let mut job = job();
        job.apply(&JobUpdate::processing(80, "saving"));
        assert!(job.completed_at.is_none());

        job.apply(&JobUpdate::completed(serde_json::json!({"ok": true})));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert!(job.result.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_failed_sets_error_only() {
        let mut job = job();
        job.apply(&JobUpdate::processing(50, "annotating"));
        job.apply(&JobUpdate::failed("decoder crashed"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 50);
        assert_eq!(job.error.as_deref(), Some("decoder crashed"));
        assert_eq!(job.message.as_deref(), Some("Error: decoder crashed"));
        assert!(job.result.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_estimated_time_remaining() {
        let mut job = job();
        let now = job.created_at + Duration::seconds(20);
        assert_eq!(job.estimated_time_remaining(now), None);

        job.apply(&JobUpdate::processing(50, "halfway"));
        let remaining = job.estimated_time_remaining(now).unwrap();
        assert!((remaining - 20.0).abs() < 1e-9);

        job.apply(&JobUpdate::completed(serde_json::json!({})));
        assert_eq!(job.estimated_time_remaining(now), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!("processing".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert_eq!(
            serde_json::to_value(JobType::VideoClassification).unwrap(),
            "video_classification"
        );
    }
}
