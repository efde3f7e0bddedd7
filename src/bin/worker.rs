//! Video job worker.
//!
//! Started by the API server, one process per worker pool slot. Opens its own
//! database and object storage clients and loads the detection model once,
//! then reads one JSON job envelope per line from stdin, runs each job to a
//! terminal state and answers with one JSON reply line on stdout. Exits when
//! stdin closes. Logs go to stderr so stdout carries only replies.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use tomato_flower_api::{
    app_state::{detection_adapter, postgres_stores},
    config::AppConfig,
    db,
    models::job::JobStatus,
    services::video_job::{self, VideoJobContext, VideoJobSpec, WorkerReply},
};

const WORKER_DB_CONNECTIONS: u32 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Workers never share the server's pool
    let pool = db::init_pool(
        config.database_url().expect("DATABASE_URL is required"),
        config.database_name.as_deref(),
        WORKER_DB_CONNECTIONS,
    )
    .await
    .expect("Failed to connect to database");

    let (records, jobs) =
        postgres_stores(&config, pool.clone()).expect("Failed to initialize storage");
    let detection = detection_adapter(&config).expect("Failed to initialize detector");
    if let Err(e) = detection.session().await {
        tracing::error!(error = %e, "Failed to load detection model");
        return ExitCode::FAILURE;
    }

    let ctx = VideoJobContext {
        jobs: Arc::clone(&jobs),
        records,
        detection,
    };

    tracing::info!(pid = std::process::id(), "Video worker ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let code = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read job envelope");
                break ExitCode::FAILURE;
            }
        };
        let spec: VideoJobSpec = match serde_json::from_str(&line) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::error!(error = %e, "Invalid job envelope");
                break ExitCode::FAILURE;
            }
        };

        let status = match video_job::execute(&ctx, &spec).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(job_id = %spec.job_id, error = %e, "Failed to record video job outcome");
                JobStatus::Failed
            }
        };

        let reply = WorkerReply {
            job_id: spec.job_id,
            status,
        };
        let mut out = match serde_json::to_vec(&reply) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(job_id = %spec.job_id, error = %e, "Failed to encode reply");
                break ExitCode::FAILURE;
            }
        };
        out.push(b'\n');
        if let Err(e) = async {
            stdout.write_all(&out).await?;
            stdout.flush().await
        }
        .await
        {
            tracing::error!(job_id = %spec.job_id, error = %e, "Failed to send reply");
            break ExitCode::FAILURE;
        }
    };

    pool.close().await;
    tracing::info!(pid = std::process::id(), "Video worker stopped");
    code
}
