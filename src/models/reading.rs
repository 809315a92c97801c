// src/models/reading.rs

//! Fetch results and sweep summaries.

use serde::Serialize;

/// Outcome of one fetch of a subject's schedule page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityReading {
    /// Number of open slots on the page
    Count(u32),
    /// The subject no longer exists upstream
    NotFound,
    /// Network failure, timeout, or unexpected HTTP status
    TransientError(String),
}

impl AvailabilityReading {
    /// `NotFound` and `TransientError` are both fetch failures.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Count(_))
    }
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Subjects in the snapshot taken at sweep start
    pub total: usize,
    /// Fetches that returned a count
    pub succeeded: usize,
    /// Availability notifications sent (delivered or not)
    pub notified: usize,
    /// Fetches that reported the subject gone
    pub not_found: usize,
    /// Fetches that failed transiently
    pub failed: usize,
    /// Notifications the channel refused
    pub delivery_failures: usize,
    /// Store writes that failed
    pub persist_failures: usize,
    /// Subjects purged by retention before the sweep
    pub expired: usize,
    /// The sweep skipped fetching because upstream looked down
    pub skipped: bool,
    /// Upstream was judged down at the end of this sweep
    pub degraded: bool,
}

impl SweepReport {
    /// Every fetch in this sweep failed.
    ///
    /// An empty or skipped sweep is not a failed one.
    pub fn all_failed(&self) -> bool {
        !self.skipped && self.total > 0 && self.succeeded == 0
    }
}
