//! rollcall-hw: local camera capture for enrollment.
//!
//! V4L2 capture producing RGB frames, plus the JPEG/base64 encoding the
//! enrollment capture endpoint expects.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
