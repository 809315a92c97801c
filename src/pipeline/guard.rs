//! Bulk failure guard.
//!
//! Tells "upstream is down" apart from "one subject's page broke" by counting
//! consecutive sweeps in which every fetch failed.
//!
//! > After **5** consecutive sweeps where no subject could be fetched, the
//! > upstream is treated as down: per-subject failures stop being logged as
//! > warnings and the next sweep(s) are skipped. Polling is never disabled.

/// Guard configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Consecutive all-failed sweeps before upstream is considered down
    pub threshold: u32,
    /// Sweeps to skip each time the threshold is reached or exceeded
    pub cooldown_sweeps: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_sweeps: 1,
        }
    }
}

/// Health as seen at the end of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    /// At least one fetch succeeded recently
    Healthy,
    /// Every fetch failed, but not for long enough to call it an outage
    Failing { consecutive: u32 },
    /// Upstream is likely down
    Degraded { consecutive: u32 },
}

impl GuardStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Process-wide failure tracker, owned by the poll cycle.
#[derive(Debug, Clone)]
pub struct BulkFailureGuard {
    config: GuardConfig,
    consecutive_all_failed_sweeps: u32,
    cooldown_remaining: u32,
    sweep_attempts: usize,
    sweep_successes: usize,
}

impl BulkFailureGuard {
    /// Create a guard with default configuration.
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    /// Create a guard with custom configuration.
    pub fn with_config(config: GuardConfig) -> Self {
        Self {
            config,
            consecutive_all_failed_sweeps: 0,
            cooldown_remaining: 0,
            sweep_attempts: 0,
            sweep_successes: 0,
        }
    }

    pub fn consecutive_all_failed_sweeps(&self) -> u32 {
        self.consecutive_all_failed_sweeps
    }

    pub fn status(&self) -> GuardStatus {
        let consecutive = self.consecutive_all_failed_sweeps;
        if consecutive == 0 {
            GuardStatus::Healthy
        } else if consecutive >= self.config.threshold {
            GuardStatus::Degraded { consecutive }
        } else {
            GuardStatus::Failing { consecutive }
        }
    }

    /// Whether per-subject failures should be logged quietly.
    pub fn is_degraded(&self) -> bool {
        self.status().is_degraded()
    }

    /// Called before a sweep. Returns true if the sweep should skip fetching.
    pub fn take_cooldown(&mut self) -> bool {
        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Start a sweep, dropping tallies left by one that never finished.
    pub fn begin_sweep(&mut self) {
        self.sweep_attempts = 0;
        self.sweep_successes = 0;
    }

    /// Record one subject's fetch outcome in the current sweep.
    pub fn record(&mut self, succeeded: bool) {
        self.sweep_attempts += 1;
        if succeeded {
            self.sweep_successes += 1;
        }
    }

    /// Close the current sweep and return the resulting status.
    ///
    /// A sweep with no recorded fetches leaves the counter where it was.
    pub fn record_sweep_end(&mut self, all_failed: bool) -> GuardStatus {
        let attempts = std::mem::take(&mut self.sweep_attempts);
        let successes = std::mem::take(&mut self.sweep_successes);
        let was_degraded = self.is_degraded();

        if all_failed {
            self.consecutive_all_failed_sweeps += 1;
            let consecutive = self.consecutive_all_failed_sweeps;
            if consecutive >= self.config.threshold {
                self.cooldown_remaining = self.config.cooldown_sweeps;
                if !was_degraded {
                    log::error!(
                        "Bulk failure guard: TRIPPED after {} sweeps with no successful fetch; upstream likely down",
                        consecutive
                    );
                }
            } else {
                log::warn!(
                    "Bulk failure guard: every fetch failed ({} of {} sweeps)",
                    consecutive,
                    self.config.threshold
                );
            }
        } else if successes > 0 {
            if was_degraded {
                log::info!(
                    "Bulk failure guard: RECOVERED ({} of {} fetches succeeded)",
                    successes,
                    attempts
                );
            }
            self.consecutive_all_failed_sweeps = 0;
            self.cooldown_remaining = 0;
        }

        self.status()
    }
}

impl Default for BulkFailureGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_sweep(guard: &mut BulkFailureGuard, subjects: usize) -> GuardStatus {
        for _ in 0..subjects {
            guard.record(false);
        }
        guard.record_sweep_end(true)
    }

    #[test]
    fn test_degraded_on_threshold_not_before() {
        let mut guard = BulkFailureGuard::new();
        for i in 1..5 {
            assert_eq!(
                failed_sweep(&mut guard, 3),
                GuardStatus::Failing { consecutive: i }
            );
        }
        assert_eq!(
            failed_sweep(&mut guard, 3),
            GuardStatus::Degraded { consecutive: 5 }
        );
    }

    #[test]
    fn test_any_success_resets() {
        let mut guard = BulkFailureGuard::new();
        failed_sweep(&mut guard, 2);
        failed_sweep(&mut guard, 2);

        guard.record(false);
        guard.record(true);
        assert_eq!(guard.record_sweep_end(false), GuardStatus::Healthy);
        assert_eq!(guard.consecutive_all_failed_sweeps(), 0);
    }

    #[test]
    fn test_empty_sweep_keeps_counter() {
        let mut guard = BulkFailureGuard::new();
        failed_sweep(&mut guard, 1);
        assert_eq!(
            guard.record_sweep_end(false),
            GuardStatus::Failing { consecutive: 1 }
        );
    }

    #[test]
    fn test_unfinished_sweep_does_not_leak() {
        let mut guard = BulkFailureGuard::new();
        failed_sweep(&mut guard, 1);
        failed_sweep(&mut guard, 1);

        // A sweep that records a success and then dies before its end.
        guard.begin_sweep();
        guard.record(true);

        guard.begin_sweep();
        assert_eq!(
            guard.record_sweep_end(false),
            GuardStatus::Failing { consecutive: 2 }
        );
    }

    #[test]
    fn test_cooldown_after_trip() {
        let mut guard = BulkFailureGuard::with_config(GuardConfig {
            threshold: 2,
            cooldown_sweeps: 2,
        });
        assert!(!guard.take_cooldown());
        failed_sweep(&mut guard, 1);
        assert!(!guard.take_cooldown());
        failed_sweep(&mut guard, 1);

        assert!(guard.take_cooldown());
        assert!(guard.take_cooldown());
        assert!(!guard.take_cooldown());
        // Still degraded; another failed sweep re-arms the cooldown.
        assert!(guard.is_degraded());
        assert!(failed_sweep(&mut guard, 1).is_degraded());
        assert!(guard.take_cooldown());
    }

    #[test]
    fn test_recovery_clears_cooldown() {
        let mut guard = BulkFailureGuard::with_config(GuardConfig {
            threshold: 1,
            cooldown_sweeps: 3,
        });
        failed_sweep(&mut guard, 1);
        guard.record(true);
        guard.record_sweep_end(false);
        assert!(!guard.take_cooldown());
        assert!(!guard.is_degraded());
    }
}
