//! Enrollment capture strategies.
//!
//! One tick of the capture loop is one call to
//! [`CaptureStrategy::capture`]. The local camera strategy picks client or
//! server processing per tick from a single capability flag; the server
//! camera strategy only asks the server to grab a frame itself.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rollcall_core::{is_angle_different, CaptureProgress, FaceAngle};
use rollcall_hw::{Frame, FrameError};
use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::engine::{BoxFuture, EngineError, FrameSource};

pub const SIMILAR_ANGLE_MESSAGE: &str = "Turn your head slightly for a new angle.";
pub const ALL_CAPTURED_MESSAGE: &str = "All images captured! You can now complete enrollment.";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),
}

impl CaptureError {
    pub fn is_auth(&self) -> bool {
        matches!(self, CaptureError::Api(e) if e.is_auth())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Descriptors computed on this machine.
    ClientProcessing,
    /// The server detects and encodes faces.
    ServerProcessing,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::ClientProcessing => f.write_str("client processing"),
            CaptureMode::ServerProcessing => f.write_str("server processing"),
        }
    }
}

pub struct CaptureContext<'a> {
    pub api: &'a ApiClient,
    pub session_id: &'a str,
    /// Progress before this tick.
    pub last: &'a CaptureProgress,
}

pub struct CaptureOutcome {
    pub progress: CaptureProgress,
    /// The path this tick actually took.
    pub mode: CaptureMode,
    /// Local frame, with the pose overlay when a face was found.
    pub preview: Option<Frame>,
}

pub trait CaptureStrategy: Send + Sync {
    fn mode(&self) -> CaptureMode;
    fn interval(&self) -> Duration;
    fn capture<'a>(&'a self, ctx: CaptureContext<'a>) -> BoxFuture<'a, Result<CaptureOutcome, CaptureError>>;
    /// Message to announce once the target is reached, if any.
    fn completion_notice(&self) -> Option<&'static str> {
        None
    }
    /// Release local resources when the session ends.
    fn finish(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Drops client samples too close in pose to one already accepted.
#[derive(Debug)]
pub struct AngleGate {
    threshold: f32,
    accepted: Mutex<Vec<FaceAngle>>,
}

impl AngleGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold, accepted: Mutex::new(Vec::new()) }
    }

    pub fn admits(&self, angle: &FaceAngle) -> bool {
        let accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        is_angle_different(angle, &accepted, self.threshold)
    }

    pub fn record(&self, angle: FaceAngle) {
        self.accepted.lock().unwrap_or_else(|e| e.into_inner()).push(angle);
    }
}

pub struct LocalCameraCapture {
    source: Arc<dyn FrameSource>,
    prefer_client: bool,
    gate: Option<AngleGate>,
    interval: Duration,
}

impl LocalCameraCapture {
    pub fn new(source: Arc<dyn FrameSource>, prefer_client: bool, angle_threshold: Option<f32>, interval: Duration) -> Self {
        Self {
            source,
            prefer_client,
            gate: angle_threshold.map(AngleGate::new),
            interval,
        }
    }

    fn use_client_processing(&self) -> bool {
        self.prefer_client && self.source.models_ready()
    }

    async fn tick(&self, ctx: CaptureContext<'_>) -> Result<CaptureOutcome, CaptureError> {
        let client = self.use_client_processing();
        if self.prefer_client && !client {
            tracing::debug!("client processing preferred but models not loaded; using server");
        }
        let analysis = self.source.grab(client).await?;

        if !client {
            let data_url = analysis.frame.to_data_url()?;
            let resp = ctx.api.capture_frame(ctx.session_id, &data_url).await?;
            if let Some(angle) = resp.angle {
                tracing::debug!(angle, "server measured angle");
            }
            return Ok(CaptureOutcome {
                progress: resp.into(),
                mode: CaptureMode::ServerProcessing,
                preview: Some(analysis.frame),
            });
        }

        let Some(face) = analysis.face else {
            return Ok(CaptureOutcome {
                progress: CaptureProgress::no_face(ctx.last.target),
                mode: CaptureMode::ClientProcessing,
                preview: Some(analysis.frame),
            });
        };

        if let Some(gate) = &self.gate {
            if !gate.admits(&face.angle) {
                tracing::debug!(yaw = face.angle.yaw, pitch = face.angle.pitch, "pose too close to an accepted sample");
                return Ok(CaptureOutcome {
                    progress: CaptureProgress {
                        message: SIMILAR_ANGLE_MESSAGE.to_string(),
                        accepted: false,
                        complete: false,
                        ..ctx.last.clone()
                    },
                    mode: CaptureMode::ClientProcessing,
                    preview: Some(analysis.frame),
                });
            }
        }

        let resp = ctx.api.capture_descriptor(ctx.session_id, &face.descriptor, &face.angle).await?;
        if resp.captured {
            if let Some(gate) = &self.gate {
                gate.record(face.angle);
            }
        }
        Ok(CaptureOutcome {
            progress: resp.into(),
            mode: CaptureMode::ClientProcessing,
            preview: Some(analysis.frame),
        })
    }
}

impl CaptureStrategy for LocalCameraCapture {
    fn mode(&self) -> CaptureMode {
        if self.use_client_processing() {
            CaptureMode::ClientProcessing
        } else {
            CaptureMode::ServerProcessing
        }
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn capture<'a>(&'a self, ctx: CaptureContext<'a>) -> BoxFuture<'a, Result<CaptureOutcome, CaptureError>> {
        Box::pin(self.tick(ctx))
    }

    fn finish(&self) -> BoxFuture<'_, ()> {
        self.source.close()
    }
}

/// The server grabs frames from its own camera.
pub struct ServerCameraCapture {
    interval: Duration,
}

impl ServerCameraCapture {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl CaptureStrategy for ServerCameraCapture {
    fn mode(&self) -> CaptureMode {
        CaptureMode::ServerProcessing
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn completion_notice(&self) -> Option<&'static str> {
        Some(ALL_CAPTURED_MESSAGE)
    }

    fn capture<'a>(&'a self, ctx: CaptureContext<'a>) -> BoxFuture<'a, Result<CaptureOutcome, CaptureError>> {
        Box::pin(async move {
            let resp = ctx.api.capture_server(ctx.session_id).await?;
            // Rejected frames carry no usable counts; keep the last progress.
            let progress = if resp.captured {
                resp.into()
            } else {
                CaptureProgress { message: resp.message, accepted: false, ..ctx.last.clone() }
            };
            Ok(CaptureOutcome { progress, mode: CaptureMode::ServerProcessing, preview: None })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_util::{client, serve, FakeFrames};

    fn capture_router(log: Arc<Mutex<Vec<Value>>>) -> Router {
        Router::new().route(
            "/api/enrollment/capture",
            post(move |Json(body): Json<Value>| {
                let log = log.clone();
                async move {
                    let mut log = log.lock().unwrap();
                    log.push(body);
                    let n = log.len() as u32;
                    Json(json!({ "captured": true, "count": n, "target": 5, "message": "ok", "complete": n >= 5 }))
                }
            }),
        )
    }

    fn ctx<'a>(api: &'a ApiClient, last: &'a CaptureProgress) -> CaptureContext<'a> {
        CaptureContext { api, session_id: "s1", last }
    }

    #[tokio::test]
    async fn test_client_processing_posts_descriptor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let t = client(&serve(capture_router(log.clone())).await, Some("tok"));
        let frames = Arc::new(FakeFrames::with_face(true));
        let strategy = LocalCameraCapture::new(frames, true, None, Duration::from_millis(500));
        assert_eq!(strategy.mode(), CaptureMode::ClientProcessing);

        let last = CaptureProgress::idle(5);
        let out = strategy.capture(ctx(&t.api, &last)).await.unwrap();
        assert_eq!(out.mode, CaptureMode::ClientProcessing);
        assert_eq!(out.progress.captured, 1);
        assert!(out.preview.is_some());

        let body = log.lock().unwrap()[0].clone();
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["use_client_processing"], true);
        assert!(body["descriptor"].as_array().is_some_and(|d| !d.is_empty()));
        assert!(body.get("frame").is_none());
    }

    #[tokio::test]
    async fn test_no_face_reports_zero_progress_without_request() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let t = client(&serve(capture_router(log.clone())).await, Some("tok"));
        let strategy = LocalCameraCapture::new(Arc::new(FakeFrames::with_face(false)), true, None, Duration::from_millis(500));

        let last = CaptureProgress { captured: 3, ..CaptureProgress::idle(5) };
        let out = strategy.capture(ctx(&t.api, &last)).await.unwrap();
        assert_eq!(out.progress, CaptureProgress::no_face(5));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_models_missing_falls_back_to_frame_upload() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let t = client(&serve(capture_router(log.clone())).await, Some("tok"));
        let strategy =
            LocalCameraCapture::new(Arc::new(FakeFrames::without_models()), true, None, Duration::from_millis(500));
        assert_eq!(strategy.mode(), CaptureMode::ServerProcessing);

        let last = CaptureProgress::idle(5);
        let out = strategy.capture(ctx(&t.api, &last)).await.unwrap();
        assert_eq!(out.mode, CaptureMode::ServerProcessing);

        let body = log.lock().unwrap()[0].clone();
        assert_eq!(body["use_client_processing"], false);
        assert!(body["frame"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_angle_gate_skips_repeated_pose() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let t = client(&serve(capture_router(log.clone())).await, Some("tok"));
        let strategy =
            LocalCameraCapture::new(Arc::new(FakeFrames::with_face(true)), true, Some(7.0), Duration::from_millis(500));

        let last = CaptureProgress::idle(5);
        let first = strategy.capture(ctx(&t.api, &last)).await.unwrap();
        let second = strategy.capture(ctx(&t.api, &first.progress)).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(second.progress.captured, 1);
        assert_eq!(second.progress.message, SIMILAR_ANGLE_MESSAGE);
        assert!(!second.progress.accepted);
    }

    #[tokio::test]
    async fn test_server_camera_keeps_progress_on_rejected_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let router = Router::new().route(
            "/api/enrollment/capture_server",
            post(move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Json(json!({ "captured": true, "captured_count": 2, "total_required": 5, "message": "ok" }))
                    } else {
                        Json(json!({ "captured": false, "message": "no face" }))
                    }
                }
            }),
        );
        let t = client(&serve(router).await, Some("tok"));
        let strategy = ServerCameraCapture::new(Duration::from_secs(1));

        let last = CaptureProgress::idle(5);
        let first = strategy.capture(ctx(&t.api, &last)).await.unwrap();
        assert_eq!(first.progress.captured, 2);
        let second = strategy.capture(ctx(&t.api, &first.progress)).await.unwrap();
        assert_eq!(second.progress.captured, 2);
        assert_eq!(second.progress.target, 5);
        assert_eq!(second.progress.message, "no face");
    }

    #[test]
    fn test_gate_threshold() {
        let gate = AngleGate::new(7.0);
        let a = FaceAngle { yaw: 0.0, pitch: 0.0, roll: 0.0 };
        assert!(gate.admits(&a));
        gate.record(a);
        assert!(!gate.admits(&FaceAngle { yaw: 3.0, ..a }));
        assert!(gate.admits(&FaceAngle { yaw: 10.0, ..a }));
    }
}
