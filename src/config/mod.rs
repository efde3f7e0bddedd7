use std::path::PathBuf;

use garde::Validate;
use serde::Deserialize;

/// Where records and jobs are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Postgres metadata + S3 blobs, jobs run in worker processes.
    Postgres,
    /// Process-local stores, jobs run inside the server.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    #[garde(length(min = 1))]
    pub host: String,

    #[serde(default = "default_port")]
    #[garde(skip)]
    pub port: u16,

    /// Comma-separated allowed origins, `*` for any.
    #[serde(default = "default_cors_origins")]
    #[garde(skip)]
    pub cors_origins: String,

    #[serde(default = "default_storage_backend")]
    #[garde(skip)]
    pub storage_backend: StorageBackend,

    /// PostgreSQL connection string
    #[garde(skip)]
    pub database_url: Option<String>,

    /// Overrides the database named in `database_url`.
    #[garde(skip)]
    pub database_name: Option<String>,

    #[serde(default = "default_db_max_connections")]
    #[garde(range(min = 1))]
    pub db_max_connections: u32,

    /// Bucket holding annotated videos (S3-compatible)
    #[garde(skip)]
    pub s3_bucket: Option<String>,

    #[garde(skip)]
    pub s3_endpoint: Option<String>,

    #[serde(default = "default_s3_region")]
    #[garde(skip)]
    pub s3_region: String,

    #[garde(skip)]
    pub s3_access_key: Option<String>,

    #[garde(skip)]
    pub s3_secret_key: Option<String>,

    /// Scratch directory for uploads and annotated outputs
    #[serde(default = "default_upload_dir")]
    #[garde(skip)]
    pub upload_dir: PathBuf,

    /// Concurrent video jobs
    #[serde(default = "default_worker_pool_size")]
    #[garde(range(min = 1, max = 64))]
    pub worker_pool_size: u32,

    #[garde(skip)]
    pub worker_binary: Option<PathBuf>,

    /// Remote ONNX weights, fetched when `model_path` does not exist
    #[garde(skip)]
    pub model_url: Option<String>,

    #[serde(default = "default_model_path")]
    #[garde(skip)]
    pub model_path: PathBuf,

    #[serde(default = "default_model_input_size")]
    #[garde(range(min = 32, max = 4096))]
    pub model_input_size: u32,

    #[serde(default = "default_confidence_threshold")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: f32,

    #[serde(default = "default_iou_threshold")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub iou_threshold: f32,

    #[garde(skip)]
    pub label_font_path: Option<PathBuf>,

    #[serde(default = "default_ffmpeg_path")]
    #[garde(skip)]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe_path")]
    #[garde(skip)]
    pub ffprobe_path: String,

    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: usize,

    #[serde(default = "default_demo_delay_ms")]
    #[garde(skip)]
    pub demo_delay_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_cors_origins() -> String {
    "*".to_string()
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Postgres
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_worker_pool_size() -> u32 {
    4
}

fn default_model_path() -> PathBuf {
    PathBuf::from("./models/flower_yolo.onnx")
}

fn default_model_input_size() -> u32 {
    640
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024
}

fn default_demo_delay_ms() -> u64 {
    3000
}

/// Connection settings for the blob bucket.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::checked(envy::from_env()?)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::checked(envy::from_iter(vars)?)
    }

    fn checked(config: Self) -> Result<Self, ConfigError> {
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Explicit origins, or `None` when any origin is allowed.
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            None
        } else {
            Some(origins)
        }
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn s3_settings(&self) -> Result<S3Settings, ConfigError> {
        fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
            value.clone().ok_or(ConfigError::Missing(name))
        }

        Ok(S3Settings {
            bucket: required(&self.s3_bucket, "S3_BUCKET")?,
            endpoint: required(&self.s3_endpoint, "S3_ENDPOINT")?,
            region: self.s3_region.clone(),
            access_key: required(&self.s3_access_key, "S3_ACCESS_KEY")?,
            secret_key: required(&self.s3_secret_key, "S3_SECRET_KEY")?,
        })
    }

    /// Worker executable: `WORKER_BINARY`, else `flower-worker` next to the
    /// running executable.
    pub fn worker_program(&self) -> PathBuf {
        if let Some(path) = &self.worker_binary {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("flower-worker")))
            .unwrap_or_else(|| PathBuf::from("flower-worker"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:7860");
        assert_eq!(config.storage_backend, StorageBackend::Postgres);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.max_upload_bytes, 209_715_200);
        assert!(config.cors_origin_list().is_none());
        assert!(matches!(config.database_url(), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_vars(vars(&[
            ("PORT", "8080"),
            ("STORAGE_BACKEND", "memory"),
            ("WORKER_POOL_SIZE", "2"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(
            config.cors_origin_list().unwrap(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_vars(vars(&[("WORKER_POOL_SIZE", "0")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_vars(vars(&[("CONFIDENCE_THRESHOLD", "1.5")])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_s3_settings_require_bucket() {
        let config = AppConfig::from_vars(vars(&[("S3_ENDPOINT", "http://localhost:9000")])).unwrap();
        assert!(matches!(config.s3_settings(), Err(ConfigError::Missing("S3_BUCKET"))));
    }
}
