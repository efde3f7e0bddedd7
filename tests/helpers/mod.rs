//! Test helper utilities for E2E testing

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from GET /health
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// Response from POST /api/classify
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub id: Uuid,
    pub image_path: String,
    pub flowers: Vec<serde_json::Value>,
    pub flower_count: u64,
    pub stage_summary: BTreeMap<String, u64>,
}

/// Response from POST /api/classify-video-async
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSubmittedResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: u8,
    pub message: String,
}

/// Response from GET /api/jobs/{job_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: u8,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

fn file_part(path: &Path, mime: &str) -> Result<multipart::Part, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(multipart::Part::bytes(bytes).file_name(filename).mime_str(mime)?)
}

/// Upload an image to the classify endpoint
pub async fn classify_image(
    client: &reqwest::Client,
    base_url: &str,
    image_path: &Path,
    location: Option<(f64, f64)>,
) -> Result<ClassificationResponse, Box<dyn std::error::Error>> {
    let mime = match image_path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    let mut form = multipart::Form::new().part("file", file_part(image_path, mime)?);
    if let Some((latitude, longitude)) = location {
        form = form
            .text("latitude", latitude.to_string())
            .text("longitude", longitude.to_string());
    }

    let response = client
        .post(format!("{}/api/classify", base_url))
        .multipart(form)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await?;
        return Err(format!("Classify failed with status {}: {}", status, body).into());
    }

    Ok(response.json().await?)
}

/// Submit a video to the async endpoint
pub async fn submit_video_job(
    client: &reqwest::Client,
    base_url: &str,
    video_path: &Path,
) -> Result<JobSubmittedResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part("file", file_part(video_path, "video/mp4")?);

    let response = client
        .post(format!("{}/api/classify-video-async", base_url))
        .multipart(form)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, body).into());
    }

    Ok(response.json().await?)
}

/// Poll job status until it completes, fails or times out
pub async fn poll_job_until_complete(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout: Duration,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let start = std::time::Instant::now();
    let mut last_progress = 0;

    loop {
        if start.elapsed() > timeout {
            return Err(format!("Job {} timed out after {:?}", job_id, timeout).into());
        }

        let job: JobStatusResponse = client
            .get(format!("{}/api/jobs/{}", base_url, job_id))
            .send()
            .await?
            .json()
            .await?;

        if job.progress < last_progress {
            return Err(format!(
                "Job {} progress went backwards: {} -> {}",
                job_id, last_progress, job.progress
            )
            .into());
        }
        last_progress = job.progress;

        match job.status.as_str() {
            "completed" | "failed" => return Ok(job),
            _ => {
                println!("  … {}% {}", job.progress, job.message.as_deref().unwrap_or(""));
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
