//! Single-slot TTL cache for the dashboard summary.

use std::time::{Duration, Instant};

/// Single-slot cache with a fixed time-to-live.
///
/// Invalidation resets the timestamp; the stale value is kept but never
/// served again until it is replaced.
#[derive(Debug)]
pub struct DashboardCache<T> {
    data: Option<T>,
    stored_at: Option<Instant>,
    ttl: Duration,
}

impl<T: Clone> DashboardCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { data: None, stored_at: None, ttl }
    }

    /// The cached value if it is younger than the TTL at `now`.
    pub fn get_at(&self, now: Instant) -> Option<T> {
        let stored_at = self.stored_at?;
        let fresh = now.saturating_duration_since(stored_at) < self.ttl;
        if fresh { self.data.clone() } else { None }
    }

    pub fn get(&self) -> Option<T> {
        self.get_at(Instant::now())
    }

    pub fn store_at(&mut self, data: T, now: Instant) {
        self.data = Some(data);
        self.stored_at = Some(now);
    }

    pub fn store(&mut self, data: T) {
        self.store_at(data, Instant::now());
    }

    pub fn invalidate(&mut self) {
        self.stored_at = None;
    }
}
