//! # Sync Metrics
//!
//! Counters accumulated across sync passes, for diagnostics and the daemon's
//! shutdown summary.

use std::time::Duration;

use crate::sync::PassReport;

/// Totals over every pass since the manager was created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncMetrics {
    /// Passes that ran (skipped calls excluded)
    pub total_passes: u64,
    /// Passes in which every mutation was applied
    pub clean_passes: u64,
    /// Passes with at least one failed mutation or a storage error
    pub failed_passes: u64,
    /// `sync()` calls skipped because offline or already syncing
    pub skipped_passes: u64,
    /// Mutations applied remotely, by replay or direct submit
    pub mutations_applied: u64,
    /// Mutations dropped after a permanent rejection
    pub mutations_rejected: u64,
    /// Transient failures left pending for a later pass
    pub mutations_deferred: u64,
    /// Mutations queued through `submit` instead of applied directly
    pub mutations_queued: u64,
    /// Rolling average duration of a pass
    pub average_pass_duration: Duration,
    /// Duration of the most recent pass
    pub last_pass_duration: Option<Duration>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished pass into the totals
    pub fn record_pass(&mut self, report: &PassReport, duration: Duration) {
        if report.skipped {
            self.skipped_passes += 1;
            return;
        }

        self.total_passes += 1;
        if report.is_clean() {
            self.clean_passes += 1;
        } else {
            self.failed_passes += 1;
        }
        self.mutations_applied += report.applied as u64;
        self.mutations_rejected += report.rejected as u64;
        self.mutations_deferred += report.deferred as u64;

        // Update rolling average
        let runs = u32::try_from(self.total_passes).unwrap_or(u32::MAX);
        let total = self.average_pass_duration * (runs - 1) + duration;
        self.average_pass_duration = total / runs;
        self.last_pass_duration = Some(duration);
    }

    /// Count a write that reached the backend without queueing
    pub fn record_direct_write(&mut self) {
        self.mutations_applied += 1;
    }

    /// Count a write that fell back to the offline queue
    pub fn record_queued_write(&mut self) {
        self.mutations_queued += 1;
    }

    /// Fraction of passes that finished clean
    pub fn success_rate(&self) -> f64 {
        if self.total_passes == 0 {
            0.0
        } else {
            self.clean_passes as f64 / self.total_passes as f64
        }
    }
}
