//! Shared fixtures: an in-process mock API, throwaway sessions, scripted
//! dialogs and a fake camera.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use image::RgbImage;
use rollcall_core::{BoundingBox, Descriptor, FaceAngle, FaceDetection, Landmarks, Point};
use rollcall_hw::{CameraError, Frame};
use tempfile::TempDir;

use crate::api::ApiClient;
use crate::dialog::{DialogPresenter, DialogRequest, Dialogs};
use crate::engine::{Analysis, BoxFuture, EngineError, FrameSource};
use crate::navigation::{Navigator, Route};
use crate::token::TokenStore;

pub type DialogLog = Arc<Mutex<Vec<DialogRequest>>>;

/// Serve `router` on an ephemeral loopback port; returns the `/api` base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/api")
}

pub struct TestClient {
    pub api: ApiClient,
    _dir: TempDir,
}

/// A client whose session file lives in a temp dir, optionally logged in.
pub fn client(base: &str, token: Option<&str>) -> TestClient {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::open(dir.path().join("session.json"));
    if let Some(token) = token {
        store.set(token).unwrap();
    }
    let api = ApiClient::new(base, Arc::new(store), Navigator::new(Route::Dashboard), Duration::from_secs(5)).unwrap();
    TestClient { api, _dir: dir }
}

/// Answers dialogs from a script, then `true` once it runs out.
pub struct ScriptedPresenter {
    answers: VecDeque<bool>,
    log: DialogLog,
}

impl ScriptedPresenter {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> (Self, DialogLog) {
        let log = DialogLog::default();
        let presenter = Self { answers: answers.into_iter().collect(), log: log.clone() };
        (presenter, log)
    }
}

impl DialogPresenter for ScriptedPresenter {
    fn present(&mut self, request: &DialogRequest) -> bool {
        self.log.lock().unwrap().push(request.clone());
        self.answers.pop_front().unwrap_or(true)
    }
}

pub fn dialogs(answers: &[bool]) -> (Dialogs, DialogLog) {
    let (presenter, log) = ScriptedPresenter::new(answers.iter().copied());
    (Dialogs::spawn(presenter).unwrap(), log)
}

pub fn messages(log: &DialogLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|r| r.message.clone()).collect()
}

/// In-memory camera. Each grab returns a small grey frame and, when asked
/// to analyze, a face whose yaw is fixed.
pub struct FakeFrames {
    models: bool,
    face: bool,
    openable: bool,
    sequence: AtomicU32,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeFrames {
    pub fn with_face(face: bool) -> Self {
        Self {
            models: true,
            face,
            openable: true,
            sequence: AtomicU32::new(0),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn without_models() -> Self {
        Self { models: false, ..Self::with_face(true) }
    }

    pub fn unavailable() -> Self {
        Self { openable: false, ..Self::with_face(true) }
    }
}

pub fn fake_face() -> FaceDetection {
    let keypoints = [
        Point { x: 40.0, y: 40.0 },
        Point { x: 80.0, y: 40.0 },
        Point { x: 60.0, y: 60.0 },
        Point { x: 45.0, y: 80.0 },
        Point { x: 75.0, y: 80.0 },
    ];
    FaceDetection {
        descriptor: Descriptor { values: vec![0.05; 512], model_version: Some("test".into()) },
        landmarks: Landmarks::FivePoint(keypoints),
        angle: FaceAngle { yaw: 0.0, pitch: 2.0, roll: 0.0 },
        bbox: BoundingBox {
            x: 20.0,
            y: 20.0,
            width: 80.0,
            height: 90.0,
            confidence: 0.9,
            keypoints: Some(keypoints),
        },
        score: 0.9,
    }
}

impl FrameSource for FakeFrames {
    fn models_ready(&self) -> bool {
        self.models
    }

    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.openable {
                Ok(())
            } else {
                Err(EngineError::Camera(CameraError::DeviceNotFound("/dev/video9".into())))
            }
        })
    }

    fn grab(&self, analyze: bool) -> BoxFuture<'_, Result<Analysis, EngineError>> {
        Box::pin(async move {
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
            let frame = Frame::new(RgbImage::from_pixel(32, 24, image::Rgb([90, 90, 90])), seq);
            let face = (analyze && self.models && self.face).then(fake_face);
            Ok(Analysis { frame, face })
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}
