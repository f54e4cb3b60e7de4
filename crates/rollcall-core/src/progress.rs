//! Enrollment capture progress, normalized across the two capture endpoints.

use serde::{Deserialize, Serialize};

/// Target used until the server reports its own.
pub const DEFAULT_TARGET_COUNT: u32 = 5;

pub const NO_FACE_MESSAGE: &str = "⚠️ No face detected. Please face the camera.";

/// `/enrollment/capture` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameCaptureResponse {
    #[serde(default)]
    pub captured: bool,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub target: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub complete: bool,
    /// Angle the server measured on an uploaded frame, when it reports one.
    #[serde(default)]
    pub angle: Option<f32>,
}

/// `/enrollment/capture_server` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCaptureResponse {
    #[serde(default)]
    pub captured: bool,
    #[serde(default)]
    pub captured_count: u32,
    #[serde(default)]
    pub total_required: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureProgress {
    pub captured: u32,
    pub target: u32,
    pub message: String,
    pub complete: bool,
    /// Whether this particular frame was accepted by the server.
    pub accepted: bool,
}

impl CaptureProgress {
    pub fn idle(target: u32) -> Self {
        Self {
            captured: 0,
            target,
            message: String::new(),
            complete: false,
            accepted: false,
        }
    }

    /// Zero-progress report for a frame with no detectable face.
    pub fn no_face(target: u32) -> Self {
        Self {
            message: NO_FACE_MESSAGE.to_string(),
            ..Self::idle(target)
        }
    }

    /// `captured / target * 100`, clamped to 100.
    pub fn percentage(&self) -> f32 {
        if self.target == 0 {
            return 0.0;
        }
        (self.captured as f32 / self.target as f32 * 100.0).min(100.0)
    }

    pub fn label(&self) -> String {
        format!("{} / {} captured", self.captured, self.target)
    }
}

impl From<FrameCaptureResponse> for CaptureProgress {
    fn from(r: FrameCaptureResponse) -> Self {
        Self {
            captured: r.count,
            target: r.target,
            complete: r.complete || (r.target > 0 && r.count >= r.target),
            message: r.message,
            accepted: r.captured,
        }
    }
}

impl From<ServerCaptureResponse> for CaptureProgress {
    fn from(r: ServerCaptureResponse) -> Self {
        Self {
            captured: r.captured_count,
            target: r.total_required,
            complete: r.complete || (r.total_required > 0 && r.captured_count >= r.total_required),
            message: r.message,
            accepted: r.captured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let p = CaptureProgress { captured: 2, ..CaptureProgress::idle(5) };
        assert!((p.percentage() - 40.0).abs() < 1e-4);
        assert_eq!(p.label(), "2 / 5 captured");
    }

    #[test]
    fn test_percentage_clamped_and_zero_target() {
        let full = CaptureProgress { captured: 7, ..CaptureProgress::idle(5) };
        assert_eq!(full.percentage(), 100.0);
        assert_eq!(CaptureProgress::idle(0).percentage(), 0.0);
    }

    #[test]
    fn test_server_response_completes_on_count() {
        let r = ServerCaptureResponse {
            captured: true,
            captured_count: 5,
            total_required: 5,
            message: "done".into(),
            complete: false,
        };
        let p = CaptureProgress::from(r);
        assert!(p.complete);
        assert_eq!(p.percentage(), 100.0);
    }

    #[test]
    fn test_frame_response_not_complete_below_target() {
        let r: FrameCaptureResponse = serde_json::from_str(
            r#"{"captured":true,"count":3,"target":5,"message":"ok","complete":false}"#,
        )
        .unwrap();
        let p = CaptureProgress::from(r);
        assert!(!p.complete);
        assert!(p.accepted);
        assert_eq!(p.captured, 3);
    }

    #[test]
    fn test_no_face_reports_zero() {
        let p = CaptureProgress::no_face(5);
        assert_eq!(p.captured, 0);
        assert_eq!(p.message, NO_FACE_MESSAGE);
    }
}
