//! Face processor: detection, landmarks, pose and descriptor for one frame.
//!
//! Models load lazily and at most once. A failed load leaves the processor
//! not ready, and callers fall back to server-side processing.

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;

use crate::angle::calculate_face_angle;
use crate::detector::{DetectorError, FaceDetector};
use crate::landmarker::{LandmarkModel, LandmarkerError};
use crate::landmarks::Landmarks;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Descriptor, FaceDetection};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("face models are not loaded")]
    NotReady,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmarker(#[from] LandmarkerError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    /// 68-point model; the detector keypoints are used when absent.
    pub landmarks: Option<PathBuf>,
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    landmarks: Option<LandmarkModel>,
}

enum LoadState {
    Pending,
    Ready(Models),
    Failed,
}

pub struct FaceProcessor {
    paths: ModelPaths,
    state: LoadState,
}

impl FaceProcessor {
    pub fn new(paths: ModelPaths) -> Self {
        Self { paths, state: LoadState::Pending }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, LoadState::Ready(_))
    }

    /// Load all models once. Returns readiness; later calls are no-ops.
    pub fn load_models(&mut self) -> bool {
        if !matches!(self.state, LoadState::Pending) {
            return self.is_ready();
        }

        self.state = match self.try_load() {
            Ok(models) => {
                tracing::info!(
                    landmarks = models.landmarks.is_some(),
                    "face models ready"
                );
                LoadState::Ready(models)
            }
            Err(e) => {
                tracing::warn!(error = %e, "face models failed to load; using server processing");
                LoadState::Failed
            }
        };
        self.is_ready()
    }

    fn try_load(&self) -> Result<Models, ProcessorError> {
        let detector = FaceDetector::load(&self.paths.detector)?;
        let recognizer = FaceRecognizer::load(&self.paths.recognizer)?;
        let landmarks = match &self.paths.landmarks {
            Some(path) => match LandmarkModel::load(path) {
                Ok(model) => Some(model),
                Err(e) => {
                    tracing::warn!(error = %e, "landmark model unavailable; using detector keypoints");
                    None
                }
            },
            None => None,
        };
        Ok(Models { detector, recognizer, landmarks })
    }

    /// Best face in the frame, or `None` when nothing clears the threshold.
    pub fn detect_face(&mut self, frame: &RgbImage) -> Result<Option<FaceDetection>, ProcessorError> {
        let LoadState::Ready(models) = &mut self.state else {
            return Err(ProcessorError::NotReady);
        };

        let faces = models.detector.detect(frame)?;
        let Some(bbox) = faces.into_iter().next() else {
            return Ok(None);
        };

        let from_model = match models.landmarks.as_mut() {
            Some(model) => model.predict(frame, &bbox)?,
            None => None,
        };
        let Some(landmarks) = from_model.or_else(|| bbox.keypoints.map(Landmarks::FivePoint)) else {
            tracing::debug!("face without landmarks; skipping");
            return Ok(None);
        };

        let angle = calculate_face_angle(&landmarks);
        let descriptor = models.recognizer.extract(frame, &bbox)?;
        let score = bbox.confidence;

        tracing::debug!(
            score,
            yaw = angle.yaw,
            pitch = angle.pitch,
            roll = angle.roll,
            "face detected"
        );

        Ok(Some(FaceDetection { descriptor, landmarks, angle, bbox, score }))
    }
}

/// `1 - euclidean distance`; higher is more similar.
pub fn compare_descriptors(a: &Descriptor, b: &Descriptor) -> f32 {
    a.compare(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_paths() -> ModelPaths {
        ModelPaths {
            detector: PathBuf::from("/nonexistent/det.onnx"),
            recognizer: PathBuf::from("/nonexistent/rec.onnx"),
            landmarks: None,
        }
    }

    #[test]
    fn test_missing_models_leave_processor_not_ready() {
        let mut p = FaceProcessor::new(missing_paths());
        assert!(!p.is_ready());
        assert!(!p.load_models());
        assert!(!p.is_ready());
    }

    #[test]
    fn test_load_is_attempted_once() {
        let mut p = FaceProcessor::new(missing_paths());
        p.load_models();
        assert!(matches!(p.state, LoadState::Failed));
        // A second call does not retry.
        assert!(!p.load_models());
        assert!(matches!(p.state, LoadState::Failed));
    }

    #[test]
    fn test_detect_before_ready_errors() {
        let mut p = FaceProcessor::new(missing_paths());
        let frame = RgbImage::new(32, 32);
        assert!(matches!(p.detect_face(&frame), Err(ProcessorError::NotReady)));
    }

    #[test]
    fn test_compare_descriptors_identical_is_one() {
        let d = Descriptor { values: vec![0.6, 0.8], model_version: None };
        assert!((compare_descriptors(&d, &d) - 1.0).abs() < 1e-6);
    }
}
