//! Remote recognition process control.
//!
//! The server owns the truth about whether monitoring runs; local state is
//! only what the last status poll said, plus the `is_processing` flag held
//! while a start/stop request is outstanding.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rollcall_core::types::MonitoringStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::dialog::Dialogs;
use crate::poller::PeriodicTask;

pub const START_FAILED_MESSAGE: &str = "Failed to start monitoring";
pub const STOP_FAILED_MESSAGE: &str = "Failed to stop monitoring";

#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("an operation is already in progress")]
    Busy,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Camera the server should monitor: a device index or a stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraSource {
    Index(u32),
    Url(String),
}

impl CameraSource {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        s.parse().map(CameraSource::Index).unwrap_or_else(|_| CameraSource::Url(s.to_string()))
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Index(i) => write!(f, "{i}"),
            CameraSource::Url(u) => f.write_str(u),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub camera_source: CameraSource,
    /// Pause after a stop so the server can release the camera.
    pub settle: Duration,
    pub stream_ready_timeout: Duration,
    pub stream_ready_poll: Duration,
}

impl MonitoringSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_source: config.camera_source.clone(),
            settle: Duration::from_millis(config.stop_settle_ms),
            stream_ready_timeout: Duration::from_millis(config.stream_ready_timeout_ms),
            stream_ready_poll: Duration::from_millis(config.stream_ready_poll_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleButton {
    pub label: &'static str,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitoringState {
    pub is_monitoring: bool,
    pub is_processing: bool,
    pub is_busy: bool,
    pub known_faces_count: u32,
    pub monitoring_since: Option<String>,
    pub stream_url: Option<String>,
    pub stream_ready: bool,
}

impl MonitoringState {
    pub fn toggle_button(&self) -> ToggleButton {
        if self.is_processing || self.is_busy {
            ToggleButton { label: "Please wait...", enabled: false }
        } else if self.is_monitoring {
            ToggleButton { label: "Stop Monitoring", enabled: true }
        } else {
            ToggleButton { label: "Start Monitoring", enabled: true }
        }
    }

    pub fn status_text(&self) -> &'static str {
        if self.is_busy {
            "Initializing…"
        } else if self.is_monitoring {
            "Running"
        } else {
            "Stopped"
        }
    }

    pub fn stream_badge(&self) -> &'static str {
        match (self.is_monitoring, self.is_busy) {
            (true, true) => "Initializing",
            (true, false) => "Live",
            (false, _) => "Not Running",
        }
    }

    /// Text covering the video area, if any.
    pub fn overlay_text(&self) -> Option<&'static str> {
        if !self.is_monitoring {
            Some("Click \"Start Monitoring\" to begin")
        } else if self.is_busy {
            Some("Initializing camera…")
        } else {
            None
        }
    }

    /// Take the server's word for the run state. The stream URL changes only
    /// on entering the running state.
    fn apply_status(&mut self, status: &MonitoringStatus, fresh_stream_url: impl FnOnce() -> String) {
        let entering = status.is_running && (!self.is_monitoring || self.stream_url.is_none());
        self.is_monitoring = status.is_running;
        self.is_busy = status.is_busy;
        self.known_faces_count = status.known_faces_count;

        if status.is_running {
            if entering {
                self.stream_url = Some(fresh_stream_url());
            }
            if status.monitoring_since.is_some() {
                self.monitoring_since = status.monitoring_since.clone();
            }
        } else {
            self.stream_url = None;
            self.stream_ready = false;
            self.monitoring_since = None;
        }
    }
}

/// Holds `is_processing` for the duration of a toggle.
struct ProcessingGuard<'a> {
    state: &'a watch::Sender<MonitoringState>,
}

impl<'a> ProcessingGuard<'a> {
    /// `None` while another operation runs or the server reports busy.
    fn acquire(state: &'a watch::Sender<MonitoringState>) -> Option<Self> {
        let acquired = state.send_if_modified(|s| {
            if s.is_processing || s.is_busy {
                return false;
            }
            s.is_processing = true;
            true
        });
        acquired.then_some(Self { state })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.is_processing = false);
    }
}

pub struct MonitoringController {
    api: ApiClient,
    dashboard: Arc<Dashboard>,
    dialogs: Dialogs,
    settings: MonitoringSettings,
    state: watch::Sender<MonitoringState>,
}

impl MonitoringController {
    pub fn new(api: ApiClient, dashboard: Arc<Dashboard>, dialogs: Dialogs, settings: MonitoringSettings) -> Self {
        let (state, _) = watch::channel(MonitoringState::default());
        Self { api, dashboard, dialogs, settings, state }
    }

    pub fn state(&self) -> MonitoringState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitoringState> {
        self.state.subscribe()
    }

    pub async fn refresh_status(&self) -> Result<MonitoringStatus, ApiError> {
        let status = self.api.status().await?;
        let api = &self.api;
        self.state.send_modify(|s| s.apply_status(&status, || api.stream_url(now_millis())));
        tracing::debug!(
            running = status.is_running,
            busy = status.is_busy,
            faces = status.known_faces_count,
            "monitoring status"
        );
        Ok(status)
    }

    /// Start when stopped, stop when running. Refused while a previous
    /// toggle is in flight or the server reports busy.
    pub async fn toggle(&self) -> Result<(), MonitoringError> {
        let Some(guard) = ProcessingGuard::acquire(&self.state) else {
            tracing::info!("toggle ignored; operation already in progress");
            return Err(MonitoringError::Busy);
        };

        let was_running = self.state.borrow().is_monitoring;
        let result = if was_running { self.stop().await } else { self.start().await };
        drop(guard);

        if let Err(e) = self.refresh_status().await {
            tracing::warn!(error = %e, "status refresh after toggle failed");
        }

        if let Err(e) = &result {
            tracing::warn!(error = %e, was_running, "monitoring toggle failed");
            if !e.is_auth() {
                let fallback = if was_running { STOP_FAILED_MESSAGE } else { START_FAILED_MESSAGE };
                self.dialogs.error(e.user_message(fallback)).await;
            }
        }
        result.map_err(MonitoringError::from)
    }

    pub async fn start(&self) -> Result<(), ApiError> {
        let source = self.detect_camera_source();
        tracing::info!(%source, "starting monitoring");
        self.api.start_monitoring(&source).await?;

        let url = self.api.stream_url(now_millis());
        let since = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.state.send_modify(|s| {
            s.is_monitoring = true;
            s.monitoring_since = Some(since);
            s.stream_url = Some(url.clone());
            s.stream_ready = false;
        });

        let ready = self.wait_for_stream(&url).await;
        self.state.send_modify(|s| s.stream_ready = ready);
        tracing::info!(stream_ready = ready, "monitoring started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ApiError> {
        tracing::info!("stopping monitoring");
        self.api.stop_monitoring().await?;
        self.state.send_modify(|s| {
            s.is_monitoring = false;
            s.stream_url = None;
            s.stream_ready = false;
            s.monitoring_since = None;
        });

        if let Err(e) = self.dashboard.invalidate_dashboard_cache().await {
            tracing::warn!(error = %e, "dashboard reload after stop failed");
        }
        tokio::time::sleep(self.settings.settle).await;
        Ok(())
    }

    pub fn detect_camera_source(&self) -> CameraSource {
        self.settings.camera_source.clone()
    }

    /// Poll the stream until it answers or the timeout passes.
    async fn wait_for_stream(&self, url: &str) -> bool {
        let deadline = Instant::now() + self.settings.stream_ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!("stream not ready before timeout");
                return false;
            }
            if let Ok(true) = tokio::time::timeout(remaining, self.api.stream_ready(url)).await {
                return true;
            }
            tokio::time::sleep(self.settings.stream_ready_poll.min(remaining)).await;
        }
    }

    /// Refresh status every `period` until the task is dropped.
    pub fn spawn_status_poll(self: &Arc<Self>, period: Duration) -> PeriodicTask {
        let this = Arc::clone(self);
        PeriodicTask::spawn("monitoring-status", period, move || {
            let this = Arc::clone(&this);
            async move {
                if let Err(e) = this.refresh_status().await {
                    tracing::debug!(error = %e, "status poll failed");
                }
            }
        })
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
