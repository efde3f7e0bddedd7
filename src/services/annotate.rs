use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::models::detection::{Detection, Stage};
use crate::services::detector::ModelError;

const LINE_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 16;
const LABEL_SCALE: f32 = 14.0;
const DEFAULT_JPEG_QUALITY: u8 = 90;

pub fn stage_color(stage: Stage) -> Rgb<u8> {
    match stage {
        Stage::Bud => Rgb([46, 204, 64]),
        Stage::Anthesis => Rgb([255, 220, 0]),
        Stage::PostAnthesis => Rgb([255, 65, 54]),
    }
}

pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.0}%", detection.stage, detection.confidence * 100.0)
}

/// Draws detection overlays: a box per flower and a label bar above it.
///
/// Label text needs a TTF font; without one only the coloured bars are drawn.
pub struct Annotator {
    font: Option<FontVec>,
    jpeg_quality: u8,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            ..Self::default()
        }
    }

    pub fn from_font_path(path: Option<&Path>) -> Result<Self, ModelError> {
        let font = match path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    ModelError::Annotate(format!("failed to read font {}: {e}", path.display()))
                })?;
                let font = FontVec::try_from_vec(bytes).map_err(|e| {
                    ModelError::Annotate(format!("invalid font {}: {e}", path.display()))
                })?;
                Some(font)
            }
            None => None,
        };
        Ok(Self::new(font))
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Draw onto `image` in place.
    pub fn draw(&self, image: &mut RgbImage, detections: &[Detection]) {
        let (img_w, img_h) = image.dimensions();
        if img_w == 0 || img_h == 0 {
            return;
        }
        let scale = PxScale::from(LABEL_SCALE);

        for detection in detections {
            let [x0, y0, x1, y1] = detection.bounding_box;
            let x = (x0.max(0.0) as u32).min(img_w - 1);
            let y = (y0.max(0.0) as u32).min(img_h - 1);
            let w = (x1.max(0.0) as u32).min(img_w).saturating_sub(x);
            let h = (y1.max(0.0) as u32).min(img_h).saturating_sub(y);
            if w == 0 || h == 0 {
                continue;
            }

            let color = stage_color(detection.stage);
            for t in 0..LINE_THICKNESS {
                let inner_w = w.saturating_sub(2 * t);
                let inner_h = h.saturating_sub(2 * t);
                if inner_w > 0 && inner_h > 0 {
                    let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(inner_w, inner_h);
                    draw_hollow_rect_mut(image, rect, color);
                }
            }

            let text = label_text(detection);
            let text_w = match &self.font {
                Some(font) => text_size(scale, font, &text).0 + 4,
                None => text.len() as u32 * 8,
            };
            // Label sits above the box, or inside it at the top edge.
            let label_y = if y >= LABEL_HEIGHT { y - LABEL_HEIGHT } else { y };
            let label_w = text_w.min(img_w - x);
            let label_h = LABEL_HEIGHT.min(img_h - label_y);
            draw_filled_rect_mut(
                image,
                Rect::at(x as i32, label_y as i32).of_size(label_w.max(1), label_h.max(1)),
                color,
            );

            if let Some(font) = &self.font {
                draw_text_mut(
                    image,
                    Rgb([0, 0, 0]),
                    x as i32 + 2,
                    label_y as i32 + 1,
                    scale,
                    font,
                    &text,
                );
            }
        }
    }

    /// Annotated copy of `image`. The source is left untouched.
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut copy = image.clone();
        self.draw(&mut copy, detections);
        copy
    }

    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, ModelError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)
            .encode_image(image)
            .map_err(|e| ModelError::Annotate(format!("JPEG encoding failed: {e}")))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_draws_stage_color_on_box_edge() {
        let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let det = Detection::new([20.0, 30.0, 50.0, 60.0], Stage::Bud, 0.9);

        let annotated = Annotator::default().annotate(&image, &[det]);

        assert_eq!(*annotated.get_pixel(20, 45), stage_color(Stage::Bud));
        // Interior of the box is untouched.
        assert_eq!(*annotated.get_pixel(35, 45), Rgb([0, 0, 0]));
        // Source image is not modified.
        assert_eq!(*image.get_pixel(20, 45), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_without_detections_is_identity() {
        let image = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        assert_eq!(Annotator::default().annotate(&image, &[]), image);
    }

    #[test]
    fn test_out_of_bounds_box_is_clipped() {
        let mut image = RgbImage::new(16, 16);
        let det = Detection::new([-5.0, -5.0, 100.0, 100.0], Stage::PostAnthesis, 0.5);
        Annotator::default().draw(&mut image, &[det]);
        assert_eq!(*image.get_pixel(15, 15), stage_color(Stage::PostAnthesis));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        let bytes = Annotator::default().encode_jpeg(&image).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_label_text() {
        let det = Detection::new([0.0, 0.0, 1.0, 1.0], Stage::PostAnthesis, 0.876);
        assert_eq!(label_text(&det), "post-anthesis 88%");
    }
}
