use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{AppConfig, ConfigError, StorageBackend};
use crate::db::{
    self, JobStore, MemoryImageRecordRepo, MemoryJobStore, MemoryVideoRecordRepo,
    PgImageRecordRepo, PgJobStore, PgVideoRecordRepo,
};
use crate::services::annotate::Annotator;
use crate::services::coordinator::{JobCoordinator, WorkerLauncher};
use crate::services::detector::{DetectionAdapter, ModelError, ModelHandle};
use crate::services::media::FfmpegBackend;
use crate::services::records::RecordStore;
use crate::services::storage::{MemoryBlobStore, S3BlobStore, StorageError};
use crate::services::video_job::VideoJobContext;
use crate::services::yolo::{YoloLoader, YoloSettings};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub records: RecordStore,
    pub jobs: Arc<dyn JobStore>,
    pub coordinator: JobCoordinator,
    pub detection: DetectionAdapter,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        records: RecordStore,
        jobs: Arc<dyn JobStore>,
        coordinator: JobCoordinator,
        detection: DetectionAdapter,
    ) -> Self {
        Self {
            config: Arc::new(config),
            records,
            jobs,
            coordinator,
            detection,
        }
    }

    /// Build every component for the configured storage backend.
    pub async fn from_config(config: AppConfig) -> Result<Self, StartupError> {
        let detection = detection_adapter(&config)?;

        match config.storage_backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory storage; video jobs run in-process");
                Ok(Self::in_memory(config, detection))
            }
            StorageBackend::Postgres => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(
                    config.database_url()?,
                    config.database_name.as_deref(),
                    config.db_max_connections,
                )
                .await?;

                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;

                let (records, jobs) = postgres_stores(&config, pool)?;
                let coordinator = JobCoordinator::new(
                    jobs.clone(),
                    WorkerLauncher::Process {
                        program: config.worker_program(),
                    },
                    config.worker_pool_size,
                    config.upload_dir.clone(),
                );
                Ok(Self::new(config, records, jobs, coordinator, detection))
            }
        }
    }

    /// Single-process state: memory stores and in-process workers.
    pub fn in_memory(config: AppConfig, detection: DetectionAdapter) -> Self {
        let records = RecordStore::new(
            Arc::new(MemoryImageRecordRepo::new()),
            Arc::new(MemoryVideoRecordRepo::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let context = VideoJobContext {
            jobs: jobs.clone(),
            records: records.clone(),
            detection: detection.clone(),
        };
        let coordinator = JobCoordinator::new(
            jobs.clone(),
            WorkerLauncher::InProcess(Arc::new(context)),
            config.worker_pool_size,
            config.upload_dir.clone(),
        );
        Self::new(config, records, jobs, coordinator, detection)
    }
}

/// Detection adapter with the lazily downloaded YOLO model and ffmpeg I/O.
pub fn detection_adapter(config: &AppConfig) -> Result<DetectionAdapter, ModelError> {
    let loader = YoloLoader::new(
        config.model_url.clone(),
        config.model_path.clone(),
        YoloSettings {
            input_size: config.model_input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        },
    );
    let annotator = Annotator::from_font_path(config.label_font_path.as_deref())?;
    Ok(DetectionAdapter::new(
        ModelHandle::new(Arc::new(loader)),
        Arc::new(FfmpegBackend::new(&config.ffmpeg_path, &config.ffprobe_path)),
        Arc::new(annotator),
    ))
}

/// Postgres repositories and the S3 bucket, sharing `pool`.
pub fn postgres_stores(
    config: &AppConfig,
    pool: PgPool,
) -> Result<(RecordStore, Arc<dyn JobStore>), StartupError> {
    let s3 = config.s3_settings()?;
    let blobs = S3BlobStore::new(
        &s3.bucket,
        &s3.region,
        &s3.endpoint,
        &s3.access_key,
        &s3.secret_key,
    )?;

    let records = RecordStore::new(
        Arc::new(PgImageRecordRepo::new(pool.clone())),
        Arc::new(PgVideoRecordRepo::new(pool.clone())),
        Arc::new(blobs),
    );
    Ok((records, Arc::new(PgJobStore::new(pool))))
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Model(#[from] ModelError),
}
