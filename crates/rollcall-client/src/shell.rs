//! Tabbed console shell: owns the controllers and the background refresh.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use rollcall_core::report::ReportFilter;
use rollcall_core::Role;
use tokio::sync::watch;

use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::dialog::Dialogs;
use crate::engine::FrameSource;
use crate::enrollment::{EnrollmentController, EnrollmentSettings, Phase};
use crate::monitoring::{MonitoringController, MonitoringSettings};
use crate::navigation::Route;
use crate::poller::PeriodicTask;
use crate::reports::ReportsController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Monitoring,
    Enrollment,
    Reports,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Monitoring, Tab::Enrollment, Tab::Reports];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tab::Monitoring => "monitoring",
            Tab::Enrollment => "enrollment",
            Tab::Reports => "reports",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tab::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown tab: {s}"))
    }
}

#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub dashboard_refresh: Duration,
    pub status_poll: Duration,
}

impl ShellSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dashboard_refresh: Duration::from_secs(config.dashboard_refresh_secs),
            status_poll: Duration::from_secs(config.status_poll_secs),
        }
    }
}

pub struct Shell {
    api: ApiClient,
    pub dashboard: Arc<Dashboard>,
    pub monitoring: Arc<MonitoringController>,
    pub enrollment: Arc<EnrollmentController>,
    pub reports: Arc<ReportsController>,
    settings: ShellSettings,
    tab: watch::Sender<Tab>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl Shell {
    /// Wire every controller from `config`. `frames` is the local camera.
    pub fn new(config: &Config, api: ApiClient, dialogs: Dialogs, frames: Option<Arc<dyn FrameSource>>) -> Self {
        let dashboard = Arc::new(Dashboard::new(api.clone(), config.cache_ttl()));
        let monitoring = Arc::new(MonitoringController::new(
            api.clone(),
            Arc::clone(&dashboard),
            dialogs.clone(),
            MonitoringSettings::from_config(config),
        ));
        let enrollment =
            EnrollmentController::new(api.clone(), dialogs.clone(), frames, EnrollmentSettings::from_config(config));
        let filter = ReportFilter::last_week(Role::Student, Local::now().date_naive());
        let reports = Arc::new(ReportsController::new(api.clone(), dialogs, filter));

        Self {
            api,
            dashboard,
            monitoring,
            enrollment,
            reports,
            settings: ShellSettings::from_config(config),
            tab: watch::channel(Tab::default()).0,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_settings(mut self, settings: ShellSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn current_tab(&self) -> Tab {
        *self.tab.borrow()
    }

    pub fn subscribe_tab(&self) -> watch::Receiver<Tab> {
        self.tab.subscribe()
    }

    /// Start the dashboard refresh and status poll. Idempotent.
    pub fn start_background(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let dashboard = Arc::clone(&self.dashboard);
        tasks.push(PeriodicTask::spawn("dashboard-refresh", self.settings.dashboard_refresh, move || {
            let dashboard = Arc::clone(&dashboard);
            async move {
                if let Err(e) = dashboard.load_dashboard_data().await {
                    tracing::debug!(error = %e, "dashboard refresh failed");
                }
            }
        }));
        tasks.push(self.monitoring.spawn_status_poll(self.settings.status_poll));
        tracing::info!(
            dashboard_secs = self.settings.dashboard_refresh.as_secs(),
            status_secs = self.settings.status_poll.as_secs(),
            "background refresh started"
        );
    }

    /// Show `tab` and reload the data it displays.
    pub async fn switch_tab(&self, tab: Tab) -> Result<(), ApiError> {
        self.tab.send_replace(tab);
        tracing::debug!(%tab, "tab switched");
        match tab {
            Tab::Monitoring => self.monitoring.refresh_status().await.map(drop),
            Tab::Enrollment => self.enrollment.reload_enrolled().await.map(drop),
            Tab::Reports => self.reports.load_active().await.map(drop),
        }
    }

    /// Resolves once the session ends, whether by logout or a 401.
    pub async fn logged_out(&self) {
        let mut rx = self.api.navigator().subscribe();
        let _ = rx.wait_for(|r| *r == Route::Login).await;
    }

    /// Cancel background work and abandon any enrollment in progress.
    pub async fn shutdown(&self) {
        let tasks: Vec<PeriodicTask> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.stop().await;
        }
        if self.enrollment.state().phase != Phase::Idle {
            self.enrollment.cancel().await;
        }
        tracing::debug!("shell shut down");
    }

    pub async fn logout(&self) {
        self.shutdown().await;
        self.api.logout().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::test_util::{client, dialogs, serve};

    #[derive(Default, Clone)]
    struct Hits {
        summary: Arc<AtomicUsize>,
        status: Arc<AtomicUsize>,
        list: Arc<AtomicUsize>,
        report: Arc<AtomicUsize>,
    }

    fn counted(hits: &Arc<AtomicUsize>, body: serde_json::Value) -> axum::routing::MethodRouter {
        let hits = hits.clone();
        get(move || {
            hits.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            async move { Json(body) }
        })
    }

    fn router(h: &Hits) -> Router {
        Router::new()
            .route("/api/attendance/today-summary", counted(&h.summary, json!({ "students_present": 1 })))
            .route("/api/attendance/status", counted(&h.status, json!({ "is_running": false })))
            .route("/api/enrollment/list", counted(&h.list, json!({ "students": [], "staff": [] })))
            .route("/api/reports/attendance", counted(&h.report, json!({ "role": "student", "data": [] })))
            .route("/api/auth/logout", post(|| async { Json(json!({})) }))
    }

    fn fast() -> ShellSettings {
        ShellSettings { dashboard_refresh: Duration::from_millis(20), status_poll: Duration::from_millis(20) }
    }

    #[tokio::test]
    async fn test_tab_switch_reloads_tab_data() {
        let hits = Hits::default();
        let t = client(&serve(router(&hits)).await, Some("tok"));
        let (d, _log) = dialogs(&[]);
        let shell = Shell::new(&Config::default(), t.api.clone(), d, None);

        shell.switch_tab(Tab::Enrollment).await.unwrap();
        assert_eq!(hits.list.load(Ordering::SeqCst), 1);
        shell.switch_tab(Tab::Reports).await.unwrap();
        assert_eq!(hits.report.load(Ordering::SeqCst), 1);
        assert_eq!(shell.current_tab(), Tab::Reports);
    }

    #[tokio::test]
    async fn test_background_refresh_stops_on_logout() {
        let hits = Hits::default();
        let t = client(&serve(router(&hits)).await, Some("tok"));
        let (d, _log) = dialogs(&[]);
        let shell = Shell::new(&Config::default(), t.api.clone(), d, None).with_settings(fast());

        shell.start_background();
        shell.start_background();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(hits.summary.load(Ordering::SeqCst) >= 1);
        assert!(hits.status.load(Ordering::SeqCst) >= 2);

        shell.logout().await;
        shell.logged_out().await;
        assert_eq!(t.api.tokens().get(), None);

        let (summary, status) = (hits.summary.load(Ordering::SeqCst), hits.status.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.summary.load(Ordering::SeqCst), summary);
        assert_eq!(hits.status.load(Ordering::SeqCst), status);
    }

    #[test]
    fn test_tab_parse() {
        assert_eq!("Reports".parse::<Tab>(), Ok(Tab::Reports));
        assert!("settings".parse::<Tab>().is_err());
    }
}
