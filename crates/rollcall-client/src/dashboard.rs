//! Today's attendance summary behind a short-lived cache, plus the live run status.

use std::sync::Mutex;
use std::time::Duration;

use rollcall_core::types::{MonitoringStatus, TodaySummary};
use tokio::sync::watch;

use crate::api::{ApiClient, ApiError};
use crate::cache::DashboardCache;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub summary: TodaySummary,
    pub status: MonitoringStatus,
    /// Whether `summary` came from the cache.
    pub cached: bool,
}

impl DashboardView {
    pub fn badge(&self) -> &'static str {
        if self.status.is_running { "Running" } else { "Stopped" }
    }
}

pub struct Dashboard {
    api: ApiClient,
    cache: Mutex<DashboardCache<TodaySummary>>,
    view: watch::Sender<Option<DashboardView>>,
}

impl Dashboard {
    pub fn new(api: ApiClient, ttl: Duration) -> Self {
        let (view, _) = watch::channel(None);
        Self { api, cache: Mutex::new(DashboardCache::new(ttl)), view }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardView>> {
        self.view.subscribe()
    }

    /// Summary from cache when fresh, else from the server; status always live.
    pub async fn load_dashboard_data(&self) -> Result<DashboardView, ApiError> {
        let cached = self.with_cache(|c| c.get());
        let (summary, from_cache) = match cached {
            Some(summary) => (summary, true),
            None => {
                let summary = self.api.today_summary().await?;
                self.with_cache(|c| c.store(summary.clone()));
                tracing::debug!(
                    students = summary.students_present,
                    staff = summary.staff_present,
                    "dashboard summary fetched"
                );
                (summary, false)
            }
        };
        let status = self.api.status().await?;

        let view = DashboardView { summary, status, cached: from_cache };
        self.view.send_replace(Some(view.clone()));
        Ok(view)
    }

    /// Drop the cached summary and reload immediately.
    pub async fn invalidate_dashboard_cache(&self) -> Result<DashboardView, ApiError> {
        self.with_cache(|c| c.invalidate());
        self.load_dashboard_data().await
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut DashboardCache<TodaySummary>) -> R) -> R {
        let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}
