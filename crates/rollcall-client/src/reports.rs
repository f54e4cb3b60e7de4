//! Attendance reports: list and sheet views, view toggle and CSV export.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use rollcall_core::report::{
    csv_filename, render_report, render_sheet, report_to_csv, sheet_to_csv, ReportFilter, Table, ViewMode,
};
use rollcall_core::types::{AttendanceReport, AttendanceSheet};
use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::dialog::Dialogs;

pub const REPORT_FAILED_MESSAGE: &str = "Failed to load report";
pub const SHEET_FAILED_MESSAGE: &str = "Failed to load attendance sheet";
pub const NO_REPORT_DATA_MESSAGE: &str = "No data to export. Please load a report first.";
pub const NO_SHEET_DATA_MESSAGE: &str = "No data to export. Please load attendance sheet first.";

#[derive(Error, Debug)]
pub enum ReportsError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct ReportsState {
    mode: ViewMode,
    filter: ReportFilter,
    report: Option<AttendanceReport>,
    sheet: Option<AttendanceSheet>,
}

pub struct ReportsController {
    api: ApiClient,
    dialogs: Dialogs,
    state: Mutex<ReportsState>,
}

impl ReportsController {
    pub fn new(api: ApiClient, dialogs: Dialogs, filter: ReportFilter) -> Self {
        Self {
            api,
            dialogs,
            state: Mutex::new(ReportsState { mode: ViewMode::List, filter, report: None, sheet: None }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ReportsState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn mode(&self) -> ViewMode {
        self.with_state(|s| s.mode)
    }

    pub fn filter(&self) -> ReportFilter {
        self.with_state(|s| s.filter.clone())
    }

    pub fn set_filter(&self, filter: ReportFilter) {
        self.with_state(|s| s.filter = filter);
    }

    /// The active view as last loaded, without refetching.
    pub fn table(&self) -> Option<Table> {
        self.with_state(|s| match s.mode {
            ViewMode::List => s.report.as_ref().map(render_report),
            ViewMode::Sheet => s.sheet.as_ref().map(render_sheet),
        })
    }

    pub async fn load_report(&self) -> Result<Table, ApiError> {
        let filter = self.filter();
        match self.api.attendance_report(&filter).await {
            Ok(report) => {
                tracing::debug!(role = %report.role, count = report.data.len(), "report loaded");
                let table = render_report(&report);
                self.with_state(|s| s.report = Some(report));
                Ok(table)
            }
            Err(e) => {
                self.report_failure(&e, REPORT_FAILED_MESSAGE).await;
                Err(e)
            }
        }
    }

    pub async fn load_attendance_sheet(&self) -> Result<Table, ApiError> {
        let filter = self.filter();
        match self.api.attendance_sheet(&filter).await {
            Ok(sheet) => {
                tracing::debug!(
                    role = %sheet.role,
                    persons = sheet.persons.len(),
                    dates = sheet.dates.len(),
                    "attendance sheet loaded"
                );
                let table = render_sheet(&sheet);
                self.with_state(|s| s.sheet = Some(sheet));
                Ok(table)
            }
            Err(e) => {
                self.report_failure(&e, SHEET_FAILED_MESSAGE).await;
                Err(e)
            }
        }
    }

    /// Reload whichever view is showing.
    pub async fn load_active(&self) -> Result<Table, ApiError> {
        match self.mode() {
            ViewMode::List => self.load_report().await,
            ViewMode::Sheet => self.load_attendance_sheet().await,
        }
    }

    /// Flip between list and sheet and fetch the new view.
    pub async fn toggle_view(&self) -> Result<Table, ApiError> {
        let mode = self.with_state(|s| {
            s.mode = s.mode.toggled();
            s.mode
        });
        tracing::debug!(?mode, "report view toggled");
        self.load_active().await
    }

    /// Write the active view as CSV into `dir`. `Ok(None)` when nothing has
    /// been loaded yet; the operator is warned instead.
    pub async fn export_csv(&self, dir: &Path, today: NaiveDate) -> Result<Option<PathBuf>, ReportsError> {
        let (mode, csv) = self.with_state(|s| {
            let csv = match s.mode {
                ViewMode::List => s.report.as_ref().and_then(|r| report_to_csv(r.role, &r.data)),
                ViewMode::Sheet => s.sheet.as_ref().and_then(sheet_to_csv),
            };
            (s.mode, csv)
        });

        let Some(csv) = csv else {
            let message = match mode {
                ViewMode::List => NO_REPORT_DATA_MESSAGE,
                ViewMode::Sheet => NO_SHEET_DATA_MESSAGE,
            };
            self.dialogs.warning(message).await;
            return Ok(None);
        };

        let path = dir.join(csv_filename(mode, today));
        std::fs::write(&path, csv).map_err(|source| ReportsError::Write { path: path.clone(), source })?;
        tracing::info!(path = %path.display(), ?mode, "csv exported");
        Ok(Some(path))
    }

    async fn report_failure(&self, e: &ApiError, fallback: &str) {
        tracing::warn!(error = %e, "report request failed");
        if !e.is_auth() {
            self.dialogs.error(e.user_message(fallback)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use rollcall_core::report::EMPTY_REPORT_MESSAGE;
    use rollcall_core::Role;
    use serde_json::json;

    use super::*;
    use crate::test_util::{client, dialogs, messages, serve};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/api/reports/attendance",
                get(|| async {
                    Json(json!({
                        "role": "student",
                        "data": [{ "id": "S1", "name": "Ada, L.", "course": "BCA", "sem": 3,
                                   "date": "2026-10-16", "check_in": "09:01:00" }],
                        "count": 1
                    }))
                }),
            )
            .route(
                "/api/reports/attendance-sheet",
                get(|| async {
                    Json(json!({
                        "role": "staff",
                        "persons": [{ "id": "E1", "name": "Grace", "dep": "CS" }],
                        "dates": ["2026-10-15", "2026-10-16"],
                        "attendance": { "E1_2026-10-16": { "check_in": "08:55:00" } }
                    }))
                }),
            )
    }

    fn filter() -> ReportFilter {
        ReportFilter::last_week(Role::Student, today())
    }

    #[tokio::test]
    async fn test_export_before_load_warns() {
        let t = client(&serve(router()).await, Some("tok"));
        let (d, log) = dialogs(&[]);
        let reports = ReportsController::new(t.api.clone(), d, filter());
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(reports.export_csv(dir.path(), today()).await.unwrap(), None);
        assert_eq!(messages(&log), vec![NO_REPORT_DATA_MESSAGE]);
    }

    #[tokio::test]
    async fn test_list_export_writes_dated_file() {
        let t = client(&serve(router()).await, Some("tok"));
        let (d, _log) = dialogs(&[]);
        let reports = ReportsController::new(t.api.clone(), d, filter());
        let dir = tempfile::tempdir().unwrap();

        let table = reports.load_report().await.unwrap();
        assert_eq!(table.rows[0][2], "BCA - Sem 3");

        let path = reports.export_csv(dir.path(), today()).await.unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "attendance_list_2026-10-16.csv");
        let csv = std::fs::read_to_string(path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("ID,Name,Course,Semester,Date,Check In"));
        assert_eq!(lines.next(), Some("S1,\"Ada, L.\",BCA,3,2026-10-16,09:01:00"));
    }

    #[tokio::test]
    async fn test_toggle_loads_sheet_and_exports_it() {
        let t = client(&serve(router()).await, Some("tok"));
        let (d, log) = dialogs(&[]);
        let reports = ReportsController::new(t.api.clone(), d, filter());
        let dir = tempfile::tempdir().unwrap();

        let table = reports.toggle_view().await.unwrap();
        assert_eq!(reports.mode(), ViewMode::Sheet);
        assert_eq!(table.rows[0].last().map(String::as_str), Some("1/2"));

        let path = reports.export_csv(dir.path(), today()).await.unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "attendance_sheet_2026-10-16.csv");
        let csv = std::fs::read_to_string(path).unwrap();
        assert!(csv.starts_with("ID,Name,Department,2026-10-15,2026-10-16,Total Present\n"));
        assert!(csv.contains("E1,Grace,CS,Absent,08:55:00,1\n"));
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(reports.table(), Some(table));

        // Toggling back fetches the list view.
        reports.toggle_view().await.unwrap();
        assert_eq!(reports.mode(), ViewMode::List);
        assert!(reports.table().is_some());
    }

    #[tokio::test]
    async fn test_load_failure_shows_fallback() {
        let router = Router::new().route("/api/reports/attendance", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let t = client(&serve(router).await, Some("tok"));
        let (d, log) = dialogs(&[]);
        let reports = ReportsController::new(t.api.clone(), d, filter());

        assert!(reports.load_report().await.is_err());
        assert_eq!(messages(&log), vec![REPORT_FAILED_MESSAGE]);
    }

    #[tokio::test]
    async fn test_empty_report_renders_message_and_blocks_export() {
        let router = Router::new().route(
            "/api/reports/attendance",
            get(|| async { Json(json!({ "role": "staff", "data": [], "count": 0 })) }),
        );
        let t = client(&serve(router).await, Some("tok"));
        let (d, log) = dialogs(&[]);
        let reports = ReportsController::new(t.api.clone(), d, filter());
        let dir = tempfile::tempdir().unwrap();

        let table = reports.load_report().await.unwrap();
        assert_eq!(table.empty_message, Some(EMPTY_REPORT_MESSAGE));
        assert_eq!(reports.export_csv(dir.path(), today()).await.unwrap(), None);
        assert_eq!(messages(&log), vec![NO_REPORT_DATA_MESSAGE]);
    }
}
