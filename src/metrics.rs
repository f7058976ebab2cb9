// Reload metrics module
//
// Provides lightweight counters for the reconfiguration coordinator

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Reconfiguration metrics
///
/// Uses atomic operations so any thread can record without taking a lock.
/// Counters only grow; [`ReloadMetrics::snapshot`] gives a consistent-enough
/// copy for status pages and tests.
#[derive(Debug)]
pub struct ReloadMetrics {
    /// Change notifications accepted by the coordinator
    pub notifications: AtomicU64,

    /// Notifications that arrived while a reload was already pending
    pub coalesced: AtomicU64,

    /// Notifications ignored because coordination had not started or was stopped
    pub ignored: AtomicU64,

    /// Reloads executed (including the synchronous one at start)
    pub reloads: AtomicU64,

    /// Reloads whose rebuild failed
    pub failures: AtomicU64,

    /// Failures recovered by restoring the safe model
    pub safe_model_restores: AtomicU64,

    /// Total reload time in milliseconds
    pub total_reload_time_ms: AtomicU64,

    start_time: Instant,
}

/// Plain copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub notifications: u64,
    pub coalesced: u64,
    pub ignored: u64,
    pub reloads: u64,
    pub failures: u64,
    pub safe_model_restores: u64,
}

impl ReloadMetrics {
    pub fn new() -> Self {
        Self {
            notifications: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            safe_model_restores: AtomicU64::new(0),
            total_reload_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished reload and how long it took
    pub fn record_reload(&self, duration: Duration) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
        self.total_reload_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, restored_safe_model: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if restored_safe_model {
            self.safe_model_restores.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average reload time in milliseconds
    pub fn avg_reload_time_ms(&self) -> f64 {
        let total = self.total_reload_time_ms.load(Ordering::Relaxed);
        let count = self.reloads.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            safe_model_restores: self.safe_model_restores.load(Ordering::Relaxed),
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            uptime_secs = self.uptime().as_secs_f64(),
            notifications = snapshot.notifications,
            coalesced = snapshot.coalesced,
            ignored = snapshot.ignored,
            "Reconfiguration notifications"
        );
        tracing::info!(
            reloads = snapshot.reloads,
            failures = snapshot.failures,
            safe_model_restores = snapshot.safe_model_restores,
            avg_reload_ms = self.avg_reload_time_ms(),
            "Reconfiguration reloads"
        );
    }
}

impl Default for ReloadMetrics {
    fn default() -> Self {
        Self::new()
    }
}
