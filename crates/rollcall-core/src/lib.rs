//! rollcall-core: domain types and local face processing for the Rollcall
//! attendance console.
//!
//! Face detection (SCRFD), optional 68-point landmarks and ArcFace
//! descriptors run on CPU via ONNX Runtime. Report rendering and CSV export
//! live here too so every front end formats attendance the same way.

pub mod angle;
pub mod detector;
pub mod landmarker;
pub mod landmarks;
pub mod overlay;
pub mod processor;
pub mod progress;
pub mod recognizer;
pub mod report;
pub mod types;

pub use angle::{calculate_face_angle, is_angle_different, FaceAngle};
pub use landmarks::{Landmarks, Point};
pub use processor::{compare_descriptors, FaceProcessor, ModelPaths, ProcessorError};
pub use progress::CaptureProgress;
pub use types::{BoundingBox, Descriptor, FaceDetection, Role};
