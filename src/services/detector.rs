//! Detection adapter: the boundary between the service and the flower model.
//!
//! The model handle is injected and loaded at most once per process. All
//! [`DetectionSession`] operations are blocking and must run on a blocking
//! thread or inside the worker process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use tokio::sync::OnceCell;

use crate::models::detection::Detection;
use crate::models::record::VideoMetadata;
use crate::services::annotate::Annotator;
use crate::services::media::{MediaError, VideoBackend, VideoInfo};

/// A loaded detection model.
pub trait FlowerDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError>;

    fn name(&self) -> &str;
}

/// Produces the detector on first use.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn FlowerDetector>, ModelError>;
}

/// Lazily initialised, shared model handle.
///
/// Concurrent first calls to [`ModelHandle::get`] wait on a single load. A
/// failed load leaves the handle empty so the next call retries.
#[derive(Clone)]
pub struct ModelHandle {
    cell: Arc<OnceCell<Arc<dyn FlowerDetector>>>,
    loader: Arc<dyn ModelLoader>,
}

struct Preloaded(Arc<dyn FlowerDetector>);

#[async_trait]
impl ModelLoader for Preloaded {
    async fn load(&self) -> Result<Arc<dyn FlowerDetector>, ModelError> {
        Ok(self.0.clone())
    }
}

impl ModelHandle {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            loader,
        }
    }

    pub fn preloaded(detector: Arc<dyn FlowerDetector>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(detector.clone()))),
            loader: Arc::new(Preloaded(detector)),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn FlowerDetector>, ModelError> {
        let detector = self
            .cell
            .get_or_try_init(|| async {
                tracing::info!("Loading flower detection model");
                let detector = self.loader.load().await?;
                tracing::info!(model = detector.name(), "Flower detection model ready");
                Ok::<_, ModelError>(detector)
            })
            .await?;
        Ok(detector.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

/// Frame-ordered detections of a whole video plus its stream properties.
#[derive(Debug, Clone)]
pub struct VideoDetections {
    pub frame_results: Vec<Vec<Detection>>,
    pub metadata: VideoMetadata,
}

#[derive(Clone)]
pub struct DetectionAdapter {
    model: ModelHandle,
    video: Arc<dyn VideoBackend>,
    annotator: Arc<Annotator>,
}

impl DetectionAdapter {
    pub fn new(model: ModelHandle, video: Arc<dyn VideoBackend>, annotator: Arc<Annotator>) -> Self {
        Self {
            model,
            video,
            annotator,
        }
    }

    /// Resolve the model (loading it if needed) and bind it to a session.
    pub async fn session(&self) -> Result<DetectionSession, ModelError> {
        let detector = self.model.get().await?;
        Ok(DetectionSession {
            detector,
            video: self.video.clone(),
            annotator: self.annotator.clone(),
        })
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }
}

#[derive(Clone)]
pub struct DetectionSession {
    detector: Arc<dyn FlowerDetector>,
    video: Arc<dyn VideoBackend>,
    annotator: Arc<Annotator>,
}

impl DetectionSession {
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, ModelError> {
        let rgb = image.to_rgb8();
        self.detector.detect(&rgb)
    }

    /// Run detection on every decoded frame, in order. Any failure aborts the
    /// whole video.
    pub fn detect_video(&self, path: &Path) -> Result<VideoDetections, ModelError> {
        let info = self.video.probe(path)?;
        let mut frame_results = Vec::new();
        for frame in self.video.frames(path, &info)? {
            let frame = frame?;
            frame_results.push(self.detector.detect(&frame)?);
        }

        let total_frames = frame_results.len() as u64;
        tracing::debug!(
            path = %path.display(),
            total_frames,
            fps = info.fps,
            "Video detection finished"
        );

        Ok(VideoDetections {
            frame_results,
            metadata: video_metadata(&info, total_frames),
        })
    }

    /// JPEG bytes of `image` with overlays for `detections`. With no
    /// detections this is the re-encoded original.
    pub fn annotate(&self, image: &DynamicImage, detections: &[Detection]) -> Result<Vec<u8>, ModelError> {
        let rgb = image.to_rgb8();
        if detections.is_empty() {
            return self.annotator.encode_jpeg(&rgb);
        }
        let annotated = self.annotator.annotate(&rgb, detections);
        self.annotator.encode_jpeg(&annotated)
    }

    /// Re-encode `input` to `output` with per-frame overlays, keeping the
    /// source resolution and frame rate.
    pub fn annotate_video(
        &self,
        input: &Path,
        detections_per_frame: &[Vec<Detection>],
        output: &Path,
    ) -> Result<PathBuf, ModelError> {
        let info = self.video.probe(input)?;
        let mut sink = self.video.encoder(output, &info)?;
        for (index, frame) in self.video.frames(input, &info)?.enumerate() {
            let mut frame = frame?;
            if let Some(detections) = detections_per_frame.get(index) {
                self.annotator.draw(&mut frame, detections);
            }
            sink.push(&frame)?;
        }
        sink.finish()?;
        Ok(output.to_path_buf())
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }
}

fn video_metadata(info: &VideoInfo, total_frames: u64) -> VideoMetadata {
    let duration_seconds = if info.fps > 0.0 {
        total_frames as f64 / info.fps
    } else {
        info.duration_seconds
    };
    VideoMetadata {
        total_frames,
        fps: info.fps,
        duration_seconds,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model load failed: {0}")]
    Load(String),

    #[error("Model download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Video processing failed: {0}")]
    Media(#[from] MediaError),

    #[error("Annotation failed: {0}")]
    Annotate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
