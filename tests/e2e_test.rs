//! End-to-end tests against a running deployment
//!
//! These tests require:
//! 1. PostgreSQL and S3-compatible storage configured for the server
//! 2. API server running, with the flower-worker binary beside it
//! 3. ffmpeg/ffprobe on the server PATH and model weights available
//! 4. TEST_IMAGE and TEST_VIDEO pointing at local sample files
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:7860)

mod helpers;

use helpers::*;
use std::path::PathBuf;
use std::time::Duration;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:7860".to_string())
}

fn sample(var: &str) -> PathBuf {
    let path = PathBuf::from(std::env::var(var).unwrap_or_else(|_| panic!("{var} must be set")));
    assert!(path.exists(), "Sample not found: {}", path.display());
    path
}

#[tokio::test]
#[ignore] // Requires running API server and all infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let health: HealthResponse = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed")
        .json()
        .await
        .expect("Invalid health response");

    assert_eq!(health.status, "healthy");
    assert_eq!(health.database, "connected");
    println!("✓ Health check passed");
}

#[tokio::test]
#[ignore] // Requires running API server and all infrastructure
async fn test_e2e_image_classification() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let result = classify_image(&client, &base_url, &sample("TEST_IMAGE"), Some((38.5, -121.7)))
        .await
        .expect("Classification failed");

    println!(
        "✓ Classified {} flowers: {:?}",
        result.flower_count, result.stage_summary
    );
    assert_eq!(result.flowers.len() as u64, result.flower_count);
    assert_eq!(
        result.stage_summary.values().sum::<u64>(),
        result.flower_count
    );

    let image = client
        .get(format!("{}{}", base_url, result.image_path))
        .send()
        .await
        .expect("Image fetch failed");
    assert!(image.status().is_success());

    let deleted = client
        .delete(format!("{}/api/classifications/{}", base_url, result.id))
        .send()
        .await
        .expect("Delete failed");
    assert!(deleted.status().is_success());
}

#[tokio::test]
#[ignore] // Requires running API server, worker binary and all infrastructure
async fn test_e2e_async_video_job() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let submitted = submit_video_job(&client, &base_url, &sample("TEST_VIDEO"))
        .await
        .expect("Failed to submit video job");
    assert_eq!(submitted.status, "queued");
    println!("✓ Job submitted: {}", submitted.job_id);

    let job = poll_job_until_complete(
        &client,
        &base_url,
        submitted.job_id,
        Duration::from_secs(600),
    )
    .await
    .expect("Job did not finish");

    assert_eq!(job.status, "completed", "job error: {:?}", job.error);
    let result = job.result.expect("Completed job has no result");
    assert_eq!(
        result["video_path"],
        format!("/api/videos/{}", submitted.job_id)
    );
    println!("✓ Job completed: {}", result);

    let video = client
        .get(format!("{}/api/videos/{}", base_url, submitted.job_id))
        .header(reqwest::header::RANGE, "bytes=0-1023")
        .send()
        .await
        .expect("Video fetch failed");
    assert_eq!(video.status(), reqwest::StatusCode::PARTIAL_CONTENT);

    let deleted = client
        .delete(format!(
            "{}/api/video-classifications/{}",
            base_url, submitted.job_id
        ))
        .send()
        .await
        .expect("Delete failed");
    assert!(deleted.status().is_success());
}
