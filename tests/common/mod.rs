//! In-process test harness: the full router over memory stores, a stub
//! detector and a synthetic video backend. No database, object storage,
//! ffmpeg or model weights are needed.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tomato_flower_api::app_state::AppState;
use tomato_flower_api::config::AppConfig;
use tomato_flower_api::models::detection::{Detection, Stage};
use tomato_flower_api::routes;
use tomato_flower_api::services::annotate::Annotator;
use tomato_flower_api::services::detector::{
    DetectionAdapter, FlowerDetector, ModelError, ModelHandle,
};
use tomato_flower_api::services::media::{
    FrameIter, FrameSink, MediaError, MediaResult, VideoBackend, VideoInfo,
};

const BOUNDARY: &str = "flower-test-boundary";

/// Finds one bud in every frame whose top-left pixel is black.
pub struct StubDetector;

impl FlowerDetector for StubDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        if image.get_pixel(0, 0)[0] == 0 {
            Ok(vec![Detection::new([1.0, 1.0, 3.0, 3.0], Stage::Bud, 0.9)])
        } else {
            Ok(Vec::new())
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Video backend over a text description instead of a real container.
///
/// An input file holds `width height fps frames delay_ms`; frame `i` is
/// filled with pixel value `i`. Encoded output is a short text marker.
pub struct SyntheticVideoBackend;

struct SyntheticClip {
    info: VideoInfo,
    frames: u32,
    delay: Duration,
}

fn read_clip(path: &Path) -> MediaResult<SyntheticClip> {
    let text = std::fs::read_to_string(path)?;
    let fields: Vec<f64> = text
        .split_whitespace()
        .map(|f| f.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| MediaError::InvalidVideo(format!("bad synthetic clip: {e}")))?;
    let [width, height, fps, frames, delay_ms] = fields[..] else {
        return Err(MediaError::InvalidVideo("expected 5 fields".into()));
    };
    Ok(SyntheticClip {
        info: VideoInfo {
            width: width as u32,
            height: height as u32,
            fps,
            duration_seconds: if fps > 0.0 { frames / fps } else { 0.0 },
        },
        frames: frames as u32,
        delay: Duration::from_millis(delay_ms as u64),
    })
}

impl VideoBackend for SyntheticVideoBackend {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        Ok(read_clip(path)?.info)
    }

    fn frames(&self, path: &Path, info: &VideoInfo) -> MediaResult<FrameIter> {
        let clip = read_clip(path)?;
        let (width, height) = (info.width, info.height);
        Ok(Box::new((0..clip.frames).map(move |i| {
            std::thread::sleep(clip.delay);
            let value = i.min(255) as u8;
            Ok(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
        })))
    }

    fn encoder(&self, output: &Path, _info: &VideoInfo) -> MediaResult<Box<dyn FrameSink>> {
        Ok(Box::new(MarkerSink {
            output: output.to_path_buf(),
            frames: 0,
        }))
    }
}

struct MarkerSink {
    output: std::path::PathBuf,
    frames: u32,
}

impl FrameSink for MarkerSink {
    fn push(&mut self, _frame: &RgbImage) -> MediaResult<()> {
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> MediaResult<()> {
        std::fs::write(&self.output, format!("synthetic-mp4 frames={}", self.frames))?;
        Ok(())
    }
}

/// Describe a synthetic clip as an upload body.
pub fn synthetic_clip(frames: u32, delay_ms: u64) -> Vec<u8> {
    format!("8 8 10 {frames} {delay_ms}").into_bytes()
}

/// A small black PNG; the stub detector finds one bud in it.
pub fn black_png() -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode test png");
    bytes.into_inner()
}

pub enum Part<'a> {
    Field(&'a str, &'a str),
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File {
                name,
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub upload_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_pool_size(2)
    }

    pub fn with_pool_size(pool_size: u32) -> Self {
        let upload_dir = tempfile::tempdir().expect("create upload dir");
        let config = AppConfig::from_vars([
            ("STORAGE_BACKEND".to_string(), "memory".to_string()),
            (
                "UPLOAD_DIR".to_string(),
                upload_dir.path().display().to_string(),
            ),
            ("WORKER_POOL_SIZE".to_string(), pool_size.to_string()),
            ("DEMO_DELAY_MS".to_string(), "0".to_string()),
        ])
        .expect("test config");

        let detection = DetectionAdapter::new(
            ModelHandle::preloaded(Arc::new(StubDetector)),
            Arc::new(SyntheticVideoBackend),
            Arc::new(Annotator::default()),
        );
        let state = AppState::in_memory(config, detection);
        let router = routes::router(state.clone(), None);

        Self {
            router,
            state,
            upload_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.get(uri).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn delete_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .send(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn post_multipart(&self, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let response = self.send(request).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Poll a job until it is completed or failed, collecting every
    /// progress value seen.
    pub async fn wait_for_job(&self, job_id: &str) -> (Value, Vec<u64>) {
        let mut progress = Vec::new();
        for _ in 0..400 {
            let (status, job) = self.get_json(&format!("/api/jobs/{job_id}")).await;
            assert_eq!(status, StatusCode::OK, "job poll failed: {job}");
            progress.push(job["progress"].as_u64().unwrap());
            match job["status"].as_str() {
                Some("completed") | Some("failed") => return (job, progress),
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("job {job_id} did not finish");
    }

    pub fn upload_files(&self) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(self.upload_dir.path())
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
