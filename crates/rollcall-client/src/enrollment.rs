//! Enrollment session state machine.
//!
//! ```text
//! Idle → Starting → Capturing(mode) → ReadyToComplete
//!   ↑                    │                  │
//!   └──── cancel ────────┴──── complete ────┘
//! ```
//!
//! State changes only through [`EnrollmentController`] methods and is
//! published on a `watch` channel. While capturing, a periodic task fires
//! the active [`CaptureStrategy`]; at most one capture request is in flight
//! and ticks that arrive while one is outstanding are dropped.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rollcall_core::progress::DEFAULT_TARGET_COUNT;
use rollcall_core::report::Table;
use rollcall_core::types::{EnrolledList, EnrolledPerson};
use rollcall_core::{CaptureProgress, Role};
use rollcall_hw::Frame;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ApiError};
use crate::capture::{CaptureContext, CaptureMode, CaptureOutcome, CaptureStrategy, LocalCameraCapture, ServerCameraCapture};
use crate::config::Config;
use crate::dialog::Dialogs;
use crate::engine::FrameSource;
use crate::poller::PeriodicTask;

pub const START_FAILED_MESSAGE: &str = "Failed to start enrollment";
pub const COMPLETE_FAILED_MESSAGE: &str = "Failed to complete enrollment";
pub const COMPLETED_MESSAGE: &str = "Enrollment completed successfully!";
pub const DELETE_FAILED_MESSAGE: &str = "Failed to delete";
pub const DELETED_MESSAGE: &str = "Deleted successfully";
pub const CAMERA_FALLBACK_PROMPT: &str =
    "Local camera not available. Would you like to use server-side camera capture instead?";
pub const SERVER_CAMERA_NOTICE: &str = "Using server-side camera. Please position yourself in front of the camera.";
pub const EMPTY_ENROLLED_MESSAGE: &str = "No enrolled persons found. Start enrollment to add faces.";

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("Please fill in ID and Name fields")]
    MissingIdentity,
    #[error("Please select Course and Semester")]
    MissingCourse,
    #[error("Please select Department")]
    MissingDepartment,
    #[error("an enrollment session is already active")]
    SessionActive,
    #[error("no enrollment session is active")]
    NoSession,
    #[error("Camera access required for enrollment. Please connect a camera or use server-side capture.")]
    CameraDeclined,
    #[error("enrollment was canceled")]
    Canceled,
    #[error("capture is not finished yet")]
    NotReady,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Details of the person being enrolled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollmentForm {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub course: Option<String>,
    pub sem: Option<String>,
    pub dep: Option<String>,
}

fn filled(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl EnrollmentForm {
    pub fn validate(&self) -> Result<(), EnrollmentError> {
        if self.id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(EnrollmentError::MissingIdentity);
        }
        match self.role {
            Role::Student if !filled(&self.course) || !filled(&self.sem) => Err(EnrollmentError::MissingCourse),
            Role::Staff if !filled(&self.dep) => Err(EnrollmentError::MissingDepartment),
            _ => Ok(()),
        }
    }

    /// `/enrollment/start` body. Only the role's own grouping fields are sent.
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "id": self.id.trim(),
            "name": self.name.trim(),
            "role": self.role,
        });
        match self.role {
            Role::Student => {
                body["course"] = json!(self.course.as_deref().map(str::trim));
                body["sem"] = json!(self.sem.as_deref().map(str::trim));
            }
            Role::Staff => body["dep"] = json!(self.dep.as_deref().map(str::trim)),
        }
        body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Capturing(CaptureMode),
    ReadyToComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentState {
    pub phase: Phase,
    pub session_id: Option<String>,
    pub progress: CaptureProgress,
}

impl Default for EnrollmentState {
    fn default() -> Self {
        Self { phase: Phase::Idle, session_id: None, progress: CaptureProgress::idle(DEFAULT_TARGET_COUNT) }
    }
}

impl EnrollmentState {
    pub fn can_complete(&self) -> bool {
        self.phase == Phase::ReadyToComplete
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrolledFilter {
    #[default]
    All,
    Student,
    Staff,
}

impl EnrolledFilter {
    /// Students first, then staff.
    pub fn apply(&self, list: &EnrolledList) -> Vec<EnrolledPerson> {
        let mut out = Vec::new();
        if matches!(self, EnrolledFilter::All | EnrolledFilter::Student) {
            out.extend(list.students.iter().cloned());
        }
        if matches!(self, EnrolledFilter::All | EnrolledFilter::Staff) {
            out.extend(list.staff.iter().cloned());
        }
        out
    }
}

impl FromStr for EnrolledFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "student" | "students" => Ok(Self::Student),
            "staff" => Ok(Self::Staff),
            other => Err(format!("unknown filter: {other}")),
        }
    }
}

impl fmt::Display for EnrolledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnrolledFilter::All => "all",
            EnrolledFilter::Student => "student",
            EnrolledFilter::Staff => "staff",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrolledView {
    pub filter: EnrolledFilter,
    pub persons: Vec<EnrolledPerson>,
}

impl EnrolledView {
    pub fn table(&self) -> Table {
        Table {
            headers: ["ID", "Name", "Course/Department", "Role"].map(String::from).to_vec(),
            rows: self
                .persons
                .iter()
                .map(|p| vec![p.id.clone(), p.name.clone(), p.group(), p.role.to_string()])
                .collect(),
            empty_message: self.persons.is_empty().then_some(EMPTY_ENROLLED_MESSAGE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub prefer_client_processing: bool,
    /// Minimum pose change between client samples; `None` sends every face.
    pub angle_threshold: Option<f32>,
    pub local_interval: Duration,
    pub remote_interval: Duration,
}

impl EnrollmentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prefer_client_processing: config.prefer_client_processing,
            angle_threshold: config.angle_gate_threshold(),
            local_interval: Duration::from_millis(config.local_capture_interval_ms),
            remote_interval: Duration::from_millis(config.remote_capture_interval_ms),
        }
    }
}

struct ActiveCapture {
    task: PeriodicTask,
    strategy: Arc<dyn CaptureStrategy>,
}

/// Clears the in-flight flag when the capture request ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EnrollmentController {
    api: ApiClient,
    dialogs: Dialogs,
    frames: Option<Arc<dyn FrameSource>>,
    settings: EnrollmentSettings,
    state: watch::Sender<EnrollmentState>,
    preview: watch::Sender<Option<Arc<Frame>>>,
    enrolled: watch::Sender<EnrolledView>,
    active: Mutex<Option<ActiveCapture>>,
    /// Bumped whenever the state is reset; a start attempt owns the
    /// session only while the value it entered with is current.
    epoch: AtomicU64,
}

impl EnrollmentController {
    /// `frames` is the local camera, if this machine has one.
    pub fn new(
        api: ApiClient,
        dialogs: Dialogs,
        frames: Option<Arc<dyn FrameSource>>,
        settings: EnrollmentSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            dialogs,
            frames,
            settings,
            state: watch::channel(EnrollmentState::default()).0,
            preview: watch::channel(None).0,
            enrolled: watch::channel(EnrolledView::default()).0,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> EnrollmentState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EnrollmentState> {
        self.state.subscribe()
    }

    /// Latest local camera frame.
    pub fn subscribe_preview(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.preview.subscribe()
    }

    pub fn enrolled(&self) -> EnrolledView {
        self.enrolled.borrow().clone()
    }

    /// Open a session and start capturing. Returns the initial capture mode.
    pub async fn start(self: &Arc<Self>, form: &EnrollmentForm) -> Result<CaptureMode, EnrollmentError> {
        if let Err(e) = form.validate() {
            self.dialogs.warning(e.to_string()).await;
            return Err(e);
        }

        let mut epoch = 0;
        let entered = self.state.send_if_modified(|s| {
            if s.phase != Phase::Idle {
                return false;
            }
            s.phase = Phase::Starting;
            epoch = self.epoch.load(Ordering::SeqCst);
            true
        });
        if !entered {
            return Err(EnrollmentError::SessionActive);
        }

        let started = match self.api.start_enrollment(form).await {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!(id = %form.id, error = %e, "enrollment start failed");
                self.abandon_attempt(epoch);
                if !e.is_auth() {
                    self.dialogs.error(e.user_message(START_FAILED_MESSAGE)).await;
                }
                return Err(e.into());
            }
        };

        let target = started.target_count.filter(|t| *t > 0).unwrap_or(DEFAULT_TARGET_COUNT);
        let session_id = started.session_id;
        tracing::info!(id = %form.id, role = %form.role, session_id = %session_id, target, "enrollment session opened");
        let opened = self.state.send_if_modified(|s| {
            if !self.owns_attempt(epoch, s) {
                return false;
            }
            s.session_id = Some(session_id.clone());
            s.progress = CaptureProgress::idle(target);
            true
        });
        if !opened {
            // Canceled while the server was opening the session; nobody else
            // knows its id.
            tracing::info!(session_id = %session_id, "enrollment canceled while starting");
            self.cancel_on_server(&session_id).await;
            return Err(EnrollmentError::Canceled);
        }

        let Some(strategy) = self.choose_strategy().await else {
            self.dialogs.error(EnrollmentError::CameraDeclined.to_string()).await;
            if let Some(id) = self.abandon_attempt(epoch) {
                self.cancel_on_server(&id).await;
            }
            return Err(EnrollmentError::CameraDeclined);
        };

        let mode = strategy.mode();
        let capturing = self.state.send_if_modified(|s| {
            if !self.owns_attempt(epoch, s) || s.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
            s.phase = Phase::Capturing(mode);
            true
        });
        if !capturing {
            // `cancel` already took the session and told the server.
            strategy.finish().await;
            return Err(EnrollmentError::Canceled);
        }

        self.spawn_capture_loop(session_id, strategy);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.stop_capture().await;
            return Err(EnrollmentError::Canceled);
        }
        tracing::info!(%mode, "enrollment capture started");
        Ok(mode)
    }

    fn owns_attempt(&self, epoch: u64, s: &EnrollmentState) -> bool {
        s.phase == Phase::Starting && self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Reset to idle if attempt `epoch` is still current. Returns the
    /// session it had published, if any.
    fn abandon_attempt(&self, epoch: u64) -> Option<String> {
        let mut previous = None;
        self.state.send_if_modified(|s| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            previous = std::mem::take(s).session_id;
            true
        });
        previous
    }

    async fn cancel_on_server(&self, session_id: &str) {
        if let Err(e) = self.api.cancel_enrollment(session_id).await {
            tracing::debug!(session_id, error = %e, "cancel request failed");
        }
    }

    /// Local camera when it opens; otherwise the server camera if the
    /// operator agrees. `None` when they decline.
    async fn choose_strategy(&self) -> Option<Arc<dyn CaptureStrategy>> {
        if let Some(frames) = &self.frames {
            match frames.open().await {
                Ok(()) => {
                    return Some(Arc::new(LocalCameraCapture::new(
                        Arc::clone(frames),
                        self.settings.prefer_client_processing,
                        self.settings.angle_threshold,
                        self.settings.local_interval,
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "local camera unavailable");
                    if !self.dialogs.confirm(CAMERA_FALLBACK_PROMPT).await {
                        return None;
                    }
                }
            }
        }
        self.dialogs.info(SERVER_CAMERA_NOTICE).await;
        Some(Arc::new(ServerCameraCapture::new(self.settings.remote_interval)))
    }

    fn spawn_capture_loop(self: &Arc<Self>, session_id: String, strategy: Arc<dyn CaptureStrategy>) {
        let cancel = CancellationToken::new();
        let busy = Arc::new(AtomicBool::new(false));
        let this: Weak<Self> = Arc::downgrade(self);
        let token = cancel.clone();
        let tick_strategy = Arc::clone(&strategy);

        let task = PeriodicTask::spawn_with_token("enrollment-capture", strategy.interval(), cancel, move || {
            if busy.swap(true, Ordering::AcqRel) {
                tracing::trace!("capture in flight; tick skipped");
            } else if let Some(this) = this.upgrade() {
                let guard = BusyGuard(Arc::clone(&busy));
                let strategy = Arc::clone(&tick_strategy);
                let token = token.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    this.run_tick(&session_id, strategy.as_ref(), &token).await;
                });
            } else {
                busy.store(false, Ordering::Release);
                token.cancel();
            }
            std::future::ready(())
        });

        let previous = self.lock_active().replace(ActiveCapture { task, strategy });
        if let Some(previous) = previous {
            previous.task.cancel();
        }
    }

    async fn run_tick(&self, session_id: &str, strategy: &dyn CaptureStrategy, token: &CancellationToken) {
        let last = self.state.borrow().progress.clone();
        let ctx = CaptureContext { api: &self.api, session_id, last: &last };
        match strategy.capture(ctx).await {
            Ok(outcome) => self.apply_outcome(session_id, outcome, strategy, token).await,
            Err(e) if e.is_auth() => {
                tracing::warn!(error = %e, "capture unauthorized; stopping");
                token.cancel();
                self.reset().await;
            }
            Err(e) => tracing::warn!(error = %e, "capture failed; retrying next tick"),
        }
    }

    async fn apply_outcome(
        &self,
        session_id: &str,
        outcome: CaptureOutcome,
        strategy: &dyn CaptureStrategy,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }
        let CaptureOutcome { progress, mode, preview } = outcome;
        if let Some(frame) = preview {
            self.preview.send_replace(Some(Arc::new(frame)));
        }

        let complete = progress.complete;
        if progress.accepted {
            tracing::info!(captured = progress.captured, target = progress.target, "sample captured");
        }
        let applied = self.state.send_if_modified(|s| {
            if s.session_id.as_deref() != Some(session_id) || !matches!(s.phase, Phase::Capturing(_)) {
                return false;
            }
            s.progress = progress;
            s.phase = if complete { Phase::ReadyToComplete } else { Phase::Capturing(mode) };
            true
        });

        if applied && complete {
            token.cancel();
            self.stop_capture().await;
            tracing::info!(session_id, "all samples captured");
            if let Some(notice) = strategy.completion_notice() {
                self.dialogs.success(notice).await;
            }
        }
    }

    /// Finalize the session. On failure the session stays open for a retry.
    pub async fn complete(&self) -> Result<Outcome, EnrollmentError> {
        let state = self.state();
        let session_id = state.session_id.clone().ok_or(EnrollmentError::NoSession)?;
        if !state.can_complete() {
            return Err(EnrollmentError::NotReady);
        }
        match self.api.complete_enrollment(&session_id).await {
            Ok(()) => {
                tracing::info!(session_id = %session_id, "enrollment completed");
                self.dialogs.success(COMPLETED_MESSAGE).await;
                self.reset().await;
                if let Err(e) = self.reload_enrolled().await {
                    tracing::warn!(error = %e, "enrolled list reload failed");
                }
                Ok(Outcome::Completed)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "enrollment completion failed");
                if !e.is_auth() {
                    self.dialogs.error(e.user_message(COMPLETE_FAILED_MESSAGE)).await;
                }
                Err(e.into())
            }
        }
    }

    /// Abandon the session. The server is told best-effort; local state
    /// always resets.
    pub async fn cancel(&self) -> Outcome {
        if let Some(id) = self.reset().await {
            self.cancel_on_server(&id).await;
            tracing::info!(session_id = %id, "enrollment canceled");
        }
        Outcome::Canceled
    }

    async fn stop_capture(&self) {
        let active = self.lock_active().take();
        if let Some(ActiveCapture { task, strategy }) = active {
            task.stop().await;
            strategy.finish().await;
        }
    }

    /// Back to idle. Returns the session that was open, if any.
    async fn reset(&self) -> Option<String> {
        let mut previous = None;
        self.state.send_modify(|s| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            previous = std::mem::take(s).session_id;
        });
        self.stop_capture().await;
        self.preview.send_replace(None);
        previous
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveCapture>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn load_enrolled(&self, filter: EnrolledFilter) -> Result<EnrolledView, ApiError> {
        let list = self.api.enrolled_list().await?;
        let view = EnrolledView { filter, persons: filter.apply(&list) };
        tracing::debug!(%filter, count = view.persons.len(), "enrolled list loaded");
        self.enrolled.send_replace(view.clone());
        Ok(view)
    }

    /// Reload with the last filter used.
    pub async fn reload_enrolled(&self) -> Result<EnrolledView, ApiError> {
        let filter = self.enrolled.borrow().filter;
        self.load_enrolled(filter).await
    }

    /// Ask, then delete. `Ok(false)` when the operator declines.
    pub async fn delete_person(&self, id: &str, role: Role) -> Result<bool, EnrollmentError> {
        if !self.dialogs.confirm(format!("Are you sure you want to delete {id}?")).await {
            return Ok(false);
        }
        match self.api.delete_enrolled(id, role).await {
            Ok(()) => {
                tracing::info!(id, %role, "enrolled person deleted");
                self.dialogs.success(DELETED_MESSAGE).await;
                if let Err(e) = self.reload_enrolled().await {
                    tracing::warn!(error = %e, "enrolled list reload failed");
                }
                Ok(true)
            }
            Err(e) => {
                if !e.is_auth() {
                    self.dialogs.error(e.user_message(DELETE_FAILED_MESSAGE)).await;
                }
                Err(e.into())
            }
        }
    }
}
