use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rollcall_core::overlay::draw_face_axis;
use rollcall_core::{FaceDetection, FaceProcessor, ModelPaths, ProcessorError};
use rollcall_hw::{Camera, CameraError, Frame, FrameError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face processing error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("camera is not open")]
    NoCamera,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One grabbed frame and, when analysis was requested, the face found in it.
pub struct Analysis {
    /// With the pose overlay drawn on it when a face was found.
    pub frame: Frame,
    pub face: Option<FaceDetection>,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    OpenCamera {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    CloseCamera {
        reply: oneshot::Sender<()>,
    },
    Capture {
        analyze: bool,
        reply: oneshot::Sender<Result<Analysis, EngineError>>,
    },
}

/// A local camera with optional on-device face analysis.
pub trait FrameSource: Send + Sync {
    fn models_ready(&self) -> bool;
    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>>;
    fn grab(&self, analyze: bool) -> BoxFuture<'_, Result<Analysis, EngineError>>;
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    models_ready: Arc<AtomicBool>,
}

impl EngineHandle {
    pub async fn open_camera(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::OpenCamera { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Release the device. A no-op when it is not open.
    pub async fn close_camera(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(EngineRequest::CloseCamera { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Grab a frame; with `analyze` and loaded models, run face detection on it.
    pub async fn capture(&self, analyze: bool) -> Result<Analysis, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Capture { analyze, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

impl FrameSource for EngineHandle {
    fn models_ready(&self) -> bool {
        self.models_ready.load(Ordering::Acquire)
    }

    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(self.open_camera())
    }

    fn grab(&self, analyze: bool) -> BoxFuture<'_, Result<Analysis, EngineError>> {
        Box::pin(self.capture(analyze))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close_camera())
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models load on the thread before the first request is served; a load
/// failure leaves `models_ready` false and every capture unanalyzed. The
/// camera opens only on request.
pub fn spawn_engine(paths: ModelPaths, device: String) -> Result<EngineHandle, EngineError> {
    let models_ready = Arc::new(AtomicBool::new(false));
    let ready = models_ready.clone();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(device = %device, "engine thread started");
            let mut processor = FaceProcessor::new(paths);
            ready.store(processor.load_models(), Ordering::Release);

            let mut camera: Option<Camera> = None;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::OpenCamera { reply } => {
                        let _ = reply.send(open_camera(&mut camera, &device));
                    }
                    EngineRequest::CloseCamera { reply } => {
                        if camera.take().is_some() {
                            tracing::info!(device = %device, "camera closed");
                        }
                        let _ = reply.send(());
                    }
                    EngineRequest::Capture { analyze, reply } => {
                        let result = match &camera {
                            Some(cam) => run_capture(cam, &mut processor, analyze),
                            None => Err(EngineError::NoCamera),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, models_ready })
}

fn open_camera(slot: &mut Option<Camera>, device: &str) -> Result<(), EngineError> {
    if slot.is_some() {
        return Ok(());
    }
    let camera = Camera::open(device)?;
    tracing::info!(
        device,
        width = camera.width,
        height = camera.height,
        "camera opened"
    );
    *slot = Some(camera);
    Ok(())
}

fn run_capture(camera: &Camera, processor: &mut FaceProcessor, analyze: bool) -> Result<Analysis, EngineError> {
    let mut frame = camera.capture_frame()?;
    if !analyze || !processor.is_ready() {
        return Ok(Analysis { frame, face: None });
    }

    let face = processor.detect_face(&frame.image)?;
    match &face {
        Some(f) => {
            draw_face_axis(&mut frame.image, &f.landmarks, &f.angle, &f.bbox);
            tracing::debug!(sequence = frame.sequence, score = f.score, "face found in frame");
        }
        None => tracing::debug!(sequence = frame.sequence, "no face in frame"),
    }
    Ok(Analysis { frame, face })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn missing_models() -> ModelPaths {
        ModelPaths {
            detector: PathBuf::from("/nonexistent/det.onnx"),
            recognizer: PathBuf::from("/nonexistent/rec.onnx"),
            landmarks: None,
        }
    }

    #[tokio::test]
    async fn test_capture_without_open_camera_fails() {
        let engine = spawn_engine(missing_models(), "/nonexistent/video9".into()).unwrap();
        assert!(matches!(engine.capture(false).await, Err(EngineError::NoCamera)));
        assert!(!engine.models_ready());
    }

    #[tokio::test]
    async fn test_open_missing_device_reports_not_found() {
        let engine = spawn_engine(missing_models(), "/nonexistent/video9".into()).unwrap();
        let err = engine.open().await.unwrap_err();
        assert!(matches!(err, EngineError::Camera(CameraError::DeviceNotFound(_))));
        engine.close().await;
    }
}
