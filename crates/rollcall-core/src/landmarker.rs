//! Optional 68-point landmark model.
//!
//! Expects a PFLD-style export: 112x112 RGB input scaled to [0, 1], output of
//! 136 floats holding (x, y) pairs normalized to the crop.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::landmarks::{Landmarks, Point};
use crate::types::BoundingBox;

const LANDMARK_INPUT_SIZE: u32 = 112;
const LANDMARK_COUNT: usize = 68;

#[derive(Error, Debug)]
pub enum LandmarkerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pixel rectangle the model saw, for mapping normalized output back.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkerError> {
        if !model_path.exists() {
            return Err(LandmarkerError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded landmark model");
        Ok(Self { session })
    }

    /// Landmarks for one detected face, or `None` if the box misses the frame.
    pub fn predict(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Option<Landmarks>, LandmarkerError> {
        let Some(rect) = crop_rect(frame.width(), frame.height(), face) else {
            return Ok(None);
        };
        let crop = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
        let resized = imageops::resize(&crop, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, FilterType::Triangle);

        let side = LANDMARK_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
            }
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        // PFLD exports the auxiliary pose head first when present; take the last output.
        let last = outputs.len().saturating_sub(1);
        let (_, raw) = outputs[last]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkerError::InferenceFailed(format!("landmarks: {e}")))?;

        if raw.len() < LANDMARK_COUNT * 2 {
            return Err(LandmarkerError::InferenceFailed(format!(
                "expected {} values, got {}",
                LANDMARK_COUNT * 2,
                raw.len()
            )));
        }
        Ok(Landmarks::sixty_eight(unnormalize(raw, rect)))
    }
}

fn crop_rect(width: u32, height: u32, face: &BoundingBox) -> Option<CropRect> {
    let x0 = face.x.max(0.0) as u32;
    let y0 = face.y.max(0.0) as u32;
    let x1 = ((face.x + face.width).max(0.0) as u32).min(width);
    let y1 = ((face.y + face.height).max(0.0) as u32).min(height);
    (x1 > x0 && y1 > y0).then_some(CropRect { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
}

fn unnormalize(raw: &[f32], rect: CropRect) -> Vec<Point> {
    raw.chunks_exact(2)
        .take(LANDMARK_COUNT)
        .map(|p| {
            Point::new(
                rect.x as f32 + p[0] * rect.width as f32,
                rect.y as f32 + p[1] * rect.height as f32,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_rect_clamps() {
        let face = BoundingBox { x: -10.0, y: 20.0, width: 50.0, height: 500.0, confidence: 1.0, keypoints: None };
        let r = crop_rect(100, 100, &face).unwrap();
        assert_eq!(r, CropRect { x: 0, y: 20, width: 40, height: 80 });
    }

    #[test]
    fn test_unnormalize_maps_into_frame() {
        let rect = CropRect { x: 100, y: 50, width: 200, height: 100 };
        let mut raw = vec![0.5f32; LANDMARK_COUNT * 2];
        raw[0] = 0.0;
        raw[1] = 1.0;
        let pts = unnormalize(&raw, rect);
        assert_eq!(pts.len(), LANDMARK_COUNT);
        assert_eq!(pts[0], Point::new(100.0, 150.0));
        assert_eq!(pts[1], Point::new(200.0, 100.0));
    }
}
