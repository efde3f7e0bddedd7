//! YOLOv8 flower detector running on `tract-onnx`, with weights fetched over
//! HTTP on first use.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use reqwest::Client;
use tract_onnx::prelude::*;

use crate::models::detection::{Detection, Stage};
use crate::services::detector::{FlowerDetector, ModelError, ModelLoader};

/// Four box coordinates followed by one score per stage.
const NUM_FEATURES: usize = 4 + Stage::ALL.len();
const LETTERBOX_FILL: u8 = 114;

#[derive(Debug, Clone, Copy)]
pub struct YoloSettings {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for YoloSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

pub struct YoloDetector {
    model: TypedRunnableModel<TypedModel>,
    settings: YoloSettings,
}

impl YoloDetector {
    pub fn from_path(path: &Path, settings: YoloSettings) -> Result<Self, ModelError> {
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| ModelError::Load(format!("failed to read {}: {e}", path.display())))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .map_err(|e| ModelError::Load(format!("failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| ModelError::Load(format!("failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| ModelError::Load(format!("failed to build runnable model: {e}")))?;

        Ok(Self { model, settings })
    }
}

impl FlowerDetector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = letterbox(image, self.settings.input_size);
        let size = self.settings.input_size as usize;
        let tensor = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            input.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
        .into_tensor();

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| ModelError::Inference("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| ModelError::Inference(format!("unexpected output tensor: {e}")))?;

        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        let predictions = Predictions::from_shape(&shape, &data)?;

        let candidates = predictions.decode(&letterbox, self.settings.confidence_threshold);
        Ok(non_max_suppression(candidates, self.settings.iou_threshold))
    }

    fn name(&self) -> &str {
        "yolov8-tract"
    }
}

/// Downloads the ONNX weights when they are not cached locally, then builds
/// the inference plan on a blocking thread.
pub struct YoloLoader {
    http: Client,
    model_url: Option<String>,
    model_path: PathBuf,
    settings: YoloSettings,
}

impl YoloLoader {
    pub fn new(model_url: Option<String>, model_path: PathBuf, settings: YoloSettings) -> Self {
        Self {
            http: Client::new(),
            model_url,
            model_path,
            settings,
        }
    }

    async fn ensure_weights(&self) -> Result<(), ModelError> {
        if tokio::fs::try_exists(&self.model_path).await? {
            return Ok(());
        }

        let url = self.model_url.as_deref().ok_or_else(|| {
            ModelError::Load(format!(
                "model file {} not found and MODEL_URL is not set",
                self.model_path.display()
            ))
        })?;

        tracing::info!(url, path = %self.model_path.display(), "Downloading model weights");
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let target = self.model_path.clone();
        let len = bytes.len();
        tokio::task::spawn_blocking(move || install_weights(&target, &bytes))
            .await
            .map_err(|e| ModelError::Load(format!("weights install task failed: {e}")))??;

        tracing::info!(bytes = len, "Model weights downloaded");
        Ok(())
    }
}

/// Write downloaded weights to a private temporary file beside `target`,
/// then atomically move it into place. Concurrent downloads each persist a
/// complete file; the last rename wins.
fn install_weights(target: &Path, bytes: &[u8]) -> Result<(), ModelError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(target).map_err(|e| ModelError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl ModelLoader for YoloLoader {
    async fn load(&self) -> Result<Arc<dyn FlowerDetector>, ModelError> {
        self.ensure_weights().await?;

        let path = self.model_path.clone();
        let settings = self.settings;
        let detector = tokio::task::spawn_blocking(move || YoloDetector::from_path(&path, settings))
            .await
            .map_err(|e| ModelError::Load(format!("model build task failed: {e}")))??;

        Ok(Arc::new(detector))
    }
}

/// Placement of the source image inside the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    src_width: f32,
    src_height: f32,
}

impl Letterbox {
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = ((x - self.pad_x) / self.scale).clamp(0.0, self.src_width);
        let sy = ((y - self.pad_y) / self.scale).clamp(0.0, self.src_height);
        (sx, sy)
    }
}

fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            src_width: w as f32,
            src_height: h as f32,
        },
    )
}

/// Raw network output as `[feature][anchor]`.
struct Predictions<'a> {
    data: &'a [f32],
    anchors: usize,
    transposed: bool,
}

impl<'a> Predictions<'a> {
    /// Accepts `[1, features, anchors]` and the transposed `[1, anchors, features]`.
    fn from_shape(shape: &[usize], data: &'a [f32]) -> Result<Self, ModelError> {
        let (rows, cols) = match shape {
            [1, rows, cols] | [rows, cols] => (*rows, *cols),
            other => {
                return Err(ModelError::Inference(format!(
                    "unexpected output shape {other:?}"
                )))
            }
        };
        if rows * cols != data.len() {
            return Err(ModelError::Inference("output length does not match shape".into()));
        }

        if rows == NUM_FEATURES {
            Ok(Self {
                data,
                anchors: cols,
                transposed: false,
            })
        } else if cols == NUM_FEATURES {
            Ok(Self {
                data,
                anchors: rows,
                transposed: true,
            })
        } else {
            Err(ModelError::Inference(format!(
                "output shape {shape:?} does not carry {NUM_FEATURES} features"
            )))
        }
    }

    fn get(&self, feature: usize, anchor: usize) -> f32 {
        if self.transposed {
            self.data[anchor * NUM_FEATURES + feature]
        } else {
            self.data[feature * self.anchors + anchor]
        }
    }

    fn decode(&self, letterbox: &Letterbox, threshold: f32) -> Vec<Detection> {
        let mut detections = Vec::new();
        for anchor in 0..self.anchors {
            let (class, score) = (0..Stage::ALL.len())
                .map(|c| (c, self.get(4 + c, anchor)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < threshold {
                continue;
            }
            let Some(stage) = Stage::from_class_index(class) else {
                continue;
            };

            let (cx, cy) = (self.get(0, anchor), self.get(1, anchor));
            let (w, h) = (self.get(2, anchor), self.get(3, anchor));
            let (x0, y0) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
            let (x1, y1) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);
            if x1 <= x0 || y1 <= y0 {
                continue;
            }
            detections.push(Detection::new([x0, y0, x1, y1], stage, score));
        }
        detections
    }
}

/// Greedy per-stage non-maximum suppression, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.stage == candidate.stage && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
