// src/stats.rs
//! Run statistics shared across platform scans

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counters for one scanner instance
#[derive(Clone)]
pub struct RunStats {
    programs_seen: Arc<AtomicU64>,
    scans_completed: Arc<AtomicU64>,
    scans_failed: Arc<AtomicU64>,
    scans_skipped: Arc<AtomicU64>,
    secondary_assets: Arc<AtomicU64>,
    programs_deactivated: Arc<AtomicU64>,
    start_time: Instant,
}

/// Snapshot of statistics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub programs_seen: u64,
    pub scans_completed: u64,
    pub scans_failed: u64,
    /// Completed scans that skipped discovery because scope was unchanged
    pub scans_skipped: u64,
    pub secondary_assets: u64,
    pub programs_deactivated: u64,
    pub uptime_secs: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            programs_seen: Arc::new(AtomicU64::new(0)),
            scans_completed: Arc::new(AtomicU64::new(0)),
            scans_failed: Arc::new(AtomicU64::new(0)),
            scans_skipped: Arc::new(AtomicU64::new(0)),
            secondary_assets: Arc::new(AtomicU64::new(0)),
            programs_deactivated: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_program(&self) {
        self.programs_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.scans_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_secondary_assets(&self, count: u64) {
        self.secondary_assets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_deactivated(&self) {
        self.programs_deactivated.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            programs_seen: self.programs_seen.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            scans_skipped: self.scans_skipped.load(Ordering::Relaxed),
            secondary_assets: self.secondary_assets.load(Ordering::Relaxed),
            programs_deactivated: self.programs_deactivated.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// One-line summary for the end-of-run log
    pub fn format_stats(&self) -> String {
        let s = self.snapshot();
        format!(
            "{} programs | {} completed ({} unchanged) | {} failed | {} new assets | {} deactivated | uptime: {}",
            s.programs_seen,
            s.scans_completed,
            s.scans_skipped,
            s.scans_failed,
            s.secondary_assets,
            s.programs_deactivated,
            Self::format_uptime(s.uptime_secs)
        )
    }

    /// Format uptime duration
    pub fn format_uptime(secs: u64) -> String {
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
