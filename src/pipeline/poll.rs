// src/pipeline/poll.rs

//! One sweep over every tracked subject: fetch, compare, notify, persist.
//!
//! Failures never leave a sweep. Fetch errors become report counters, failed
//! pushes are logged and not retried, and store errors skip only the subject
//! they hit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::models::{
    AvailabilityReading, Config, NotFoundPolicy, SubjectKey, SweepReport, TrackedSubject,
};
use crate::pipeline::guard::{BulkFailureGuard, GuardConfig};
use crate::pipeline::retention::purge_unseen;
use crate::services::{AvailabilitySource, Notifier};
use crate::storage::{StateStore, SubjectUpdate};

/// Sweep behavior knobs, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Hard bound on one subject fetch
    pub fetch_timeout: Duration,
    pub not_found_policy: NotFoundPolicy,
    pub available_template: String,
    pub gone_template: String,
    /// Purge subjects unseen for this long before each sweep
    pub retention: Option<chrono::Duration>,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_timeout: config.watcher.fetch_timeout(),
            not_found_policy: config.watcher.not_found_policy,
            available_template: config.notify.available_template.clone(),
            gone_template: config.notify.gone_template.clone(),
            retention: config.retention.max_age(),
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The availability polling loop body.
pub struct PollCycle {
    store: Arc<dyn StateStore>,
    source: Arc<dyn AvailabilitySource>,
    notifier: Arc<dyn Notifier>,
    guard: BulkFailureGuard,
    settings: CycleSettings,
}

impl PollCycle {
    /// Create a cycle configured from `config`.
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn AvailabilitySource>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        let guard = BulkFailureGuard::with_config(GuardConfig {
            threshold: config.watcher.bulk_failure_threshold,
            cooldown_sweeps: config.watcher.cooldown_sweeps,
        });
        Self::with_parts(store, source, notifier, guard, CycleSettings::from_config(config))
    }

    pub fn with_parts(
        store: Arc<dyn StateStore>,
        source: Arc<dyn AvailabilitySource>,
        notifier: Arc<dyn Notifier>,
        guard: BulkFailureGuard,
        settings: CycleSettings,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            guard,
            settings,
        }
    }

    pub fn guard(&self) -> &BulkFailureGuard {
        &self.guard
    }

    /// Run one sweep over a snapshot of the store.
    ///
    /// Subjects registered after the snapshot is taken wait for the next sweep.
    pub async fn run_once(&mut self) -> SweepReport {
        let mut report = SweepReport::default();

        if let Some(max_age) = self.settings.retention {
            match purge_unseen(self.store.as_ref(), max_age, Utc::now()).await {
                Ok(removed) => report.expired = removed,
                Err(e) => log::error!("Retention purge failed: {}", e),
            }
        }

        if self.guard.take_cooldown() {
            report.skipped = true;
            report.degraded = self.guard.is_degraded();
            log::warn!(
                "Skipping sweep: upstream down for {} consecutive sweeps",
                self.guard.consecutive_all_failed_sweeps()
            );
            return report;
        }

        let subjects = match self.store.list_all().await {
            Ok(subjects) => subjects,
            Err(e) => {
                log::error!("Sweep aborted, could not list subjects: {}", e);
                return report;
            }
        };
        report.total = subjects.len();

        self.guard.begin_sweep();
        for subject in subjects {
            self.process(subject, &mut report).await;
        }

        let status = self.guard.record_sweep_end(report.all_failed());
        report.degraded = status.is_degraded();

        log::info!(
            "Sweep complete: {} subjects, {} fetched, {} notified, {} not found, {} failed",
            report.total,
            report.succeeded,
            report.notified,
            report.not_found,
            report.failed
        );
        report
    }

    async fn process(&mut self, subject: TrackedSubject, report: &mut SweepReport) {
        let reading = self.fetch(&subject.subject_id).await;
        let quiet = self.guard.is_degraded();
        self.guard.record(!reading.is_failure());

        match reading {
            AvailabilityReading::Count(count) => {
                report.succeeded += 1;
                self.handle_count(subject, count, report).await;
            }
            AvailabilityReading::NotFound => {
                report.not_found += 1;
                self.handle_not_found(subject, report).await;
            }
            AvailabilityReading::TransientError(reason) => {
                report.failed += 1;
                if quiet {
                    log::debug!("Fetch failed for {}: {}", subject.key(), reason);
                } else {
                    log::warn!("Fetch failed for {}: {}", subject.key(), reason);
                }
            }
        }
    }

    async fn fetch(&self, subject_id: &str) -> AvailabilityReading {
        let timeout = self.settings.fetch_timeout;
        match tokio::time::timeout(timeout, self.source.fetch_state(subject_id)).await {
            Ok(reading) => reading,
            Err(_) => AvailabilityReading::TransientError(format!(
                "fetch timed out after {}s",
                timeout.as_secs_f32()
            )),
        }
    }

    async fn handle_count(&self, subject: TrackedSubject, count: u32, report: &mut SweepReport) {
        let previous = subject.last_observed_count;
        if count > previous {
            log::info!("{}: {} -> {} open slots", subject.key(), previous, count);
            report.notified += 1;
            let message = subject.format(&self.settings.available_template, count);
            self.deliver(&subject, &message, report).await;
        } else if count != previous {
            log::debug!("{}: {} -> {} open slots", subject.key(), previous, count);
        }

        if subject.is_missing() {
            log::info!("{} is back upstream", subject.key());
        }

        // Always record the new baseline, including decreases.
        self.persist(
            &subject.key(),
            Box::new(move |stored| {
                stored.last_observed_count = count;
                stored.missing_since = None;
            }),
            report,
        )
        .await;
    }

    async fn handle_not_found(&self, subject: TrackedSubject, report: &mut SweepReport) {
        if subject.is_missing() {
            log::debug!("{} is still missing upstream", subject.key());
            return;
        }

        log::warn!("{} no longer exists upstream", subject.key());
        let message = subject.format(&self.settings.gone_template, subject.last_observed_count);
        self.deliver(&subject, &message, report).await;

        let key = subject.key();
        match self.settings.not_found_policy {
            NotFoundPolicy::Flag => {
                let now = Utc::now();
                self.persist(
                    &key,
                    Box::new(move |stored| stored.missing_since = Some(now)),
                    report,
                )
                .await;
            }
            NotFoundPolicy::Remove => match self.store.delete(&key).await {
                Ok(_) => log::info!("Removed {} after it disappeared upstream", key),
                Err(e) => {
                    report.persist_failures += 1;
                    log::error!("Failed to remove {}: {}", key, e);
                }
            },
        }
    }

    async fn deliver(&self, subject: &TrackedSubject, message: &str, report: &mut SweepReport) {
        match self
            .notifier
            .notify(&subject.notify_target, &subject.subject_id, message)
            .await
        {
            Ok(_) => log::info!("Notified {} about {}", subject.notify_target, subject.key()),
            Err(e) => {
                report.delivery_failures += 1;
                log::warn!(
                    "Notification to {} about {} failed: {}",
                    subject.notify_target,
                    subject.key(),
                    e
                );
            }
        }
    }

    async fn persist(&self, key: &SubjectKey, apply: SubjectUpdate, report: &mut SweepReport) {
        match self.store.update(key, apply).await {
            Ok(Some(_)) => {}
            Ok(None) => log::debug!("{} was removed during the sweep", key),
            Err(e) => {
                report.persist_failures += 1;
                log::error!("Failed to persist {}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::NotifyTarget;
    use crate::pipeline::fakes::{RecordingNotifier, ScriptedSource};
    use crate::storage::MemoryStore;

    use AvailabilityReading::{Count, NotFound, TransientError};

    fn transient() -> AvailabilityReading {
        TransientError("503".into())
    }

    fn subject(id: &str, count: u32) -> TrackedSubject {
        let mut subject =
            TrackedSubject::new(id, NotifyTarget::new(format!("tok-{id}")), None, Utc::now());
        subject.display_name = Some(format!("Teacher {id}"));
        subject.last_observed_count = count;
        subject
    }

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<ScriptedSource>,
        notifier: Arc<RecordingNotifier>,
        cycle: PollCycle,
    }

    fn harness(subjects: Vec<TrackedSubject>, settings: CycleSettings) -> Harness {
        harness_with(subjects, settings, RecordingNotifier::new())
    }

    fn harness_with(
        subjects: Vec<TrackedSubject>,
        settings: CycleSettings,
        notifier: RecordingNotifier,
    ) -> Harness {
        let store = Arc::new(MemoryStore::with_subjects(subjects));
        let source = Arc::new(ScriptedSource::new());
        let notifier = Arc::new(notifier);
        let cycle = PollCycle::with_parts(
            store.clone(),
            source.clone(),
            notifier.clone(),
            BulkFailureGuard::new(),
            settings,
        );
        Harness {
            store,
            source,
            notifier,
            cycle,
        }
    }

    async fn stored(h: &Harness, id: &str) -> TrackedSubject {
        h.store
            .get(&SubjectKey::new(None, id))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_count_sequence() {
        let mut h = harness(vec![subject("S", 2)], CycleSettings::default());
        h.source
            .push("S", [Count(2), Count(5), transient(), Count(3), Count(4)]);

        let expected = [(0, 2), (1, 5), (1, 5), (1, 3), (2, 4)];
        for (sent, count) in expected {
            h.cycle.run_once().await;
            assert_eq!(h.notifier.sent().len(), sent);
            assert_eq!(stored(&h, "S").await.last_observed_count, count);
        }

        let sent = h.notifier.sent();
        assert_eq!(sent[0].subject_id, "S");
        assert_eq!(sent[0].target, "tok-S");
        assert_eq!(sent[0].message, "Teacher S has open slots (5 available)");
        assert_eq!(sent[1].message, "Teacher S has open slots (4 available)");
    }

    #[tokio::test]
    async fn test_transient_error_changes_nothing() {
        let mut h = harness(vec![subject("S", 7)], CycleSettings::default());
        h.source.push("S", [transient()]);
        let before = stored(&h, "S").await;

        let report = h.cycle.run_once().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 0);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(stored(&h, "S").await, before);
    }

    #[tokio::test]
    async fn test_not_found_notifies_once_per_transition() {
        let mut h = harness(vec![subject("S", 3)], CycleSettings::default());
        h.source
            .push("S", [NotFound, NotFound, Count(1), NotFound]);

        let report = h.cycle.run_once().await;
        assert_eq!(report.not_found, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(h.notifier.sent().len(), 1);
        let gone = stored(&h, "S").await;
        assert!(gone.is_missing());
        assert_eq!(gone.last_observed_count, 3);

        h.cycle.run_once().await;
        assert_eq!(h.notifier.sent().len(), 1);

        // Reappearing clears the flag without an availability push (1 < 3).
        h.cycle.run_once().await;
        let back = stored(&h, "S").await;
        assert!(!back.is_missing());
        assert_eq!(back.last_observed_count, 1);
        assert_eq!(h.notifier.sent().len(), 1);

        // A new transition into NotFound notifies again.
        h.cycle.run_once().await;
        assert_eq!(h.notifier.sent().len(), 2);
        assert!(h.notifier.sent()[1].message.contains("no longer exists"));
    }

    #[tokio::test]
    async fn test_not_found_remove_policy_deletes() {
        let settings = CycleSettings {
            not_found_policy: NotFoundPolicy::Remove,
            ..CycleSettings::default()
        };
        let mut h = harness(vec![subject("S", 3), subject("T", 0)], settings);
        h.source.push("S", [NotFound]);
        h.source.push("T", [Count(0)]);

        let report = h.cycle.run_once().await;

        assert_eq!(report.not_found, 1);
        assert_eq!(h.notifier.sent().len(), 1);
        let remaining = h.store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].subject_id, "T");
    }

    #[tokio::test]
    async fn test_degraded_on_fifth_all_failed_sweep() {
        let subjects = vec![subject("A", 0), subject("B", 0), subject("C", 0)];
        let mut h = harness(subjects, CycleSettings::default());

        for sweep in 1..=5 {
            let report = h.cycle.run_once().await;
            assert_eq!(report.failed, 3);
            assert_eq!(report.degraded, sweep == 5, "sweep {sweep}");
        }
        assert_eq!(h.cycle.guard().consecutive_all_failed_sweeps(), 5);

        // The next sweep is skipped to give upstream room.
        let calls = h.source.calls();
        let report = h.cycle.run_once().await;
        assert!(report.skipped);
        assert!(report.degraded);
        assert_eq!(h.source.calls(), calls);

        // Polling resumes afterwards, and one success resets the guard.
        h.source.push("B", [Count(0)]);
        let report = h.cycle.run_once().await;
        assert!(!report.skipped);
        assert!(!report.degraded);
        assert_eq!(h.cycle.guard().consecutive_all_failed_sweeps(), 0);
    }

    #[tokio::test]
    async fn test_mixed_not_found_and_transient_counts_as_all_failed() {
        let mut h = harness(vec![subject("A", 0), subject("B", 0)], CycleSettings::default());
        h.source.push("A", [NotFound]);

        let report = h.cycle.run_once().await;

        assert!(report.all_failed());
        assert_eq!(h.cycle.guard().consecutive_all_failed_sweeps(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_records_count() {
        let mut h = harness_with(
            vec![subject("S", 0)],
            CycleSettings::default(),
            RecordingNotifier::refusing(),
        );
        h.source.push("S", [Count(2), Count(2)]);

        let report = h.cycle.run_once().await;
        assert_eq!(report.notified, 1);
        assert_eq!(report.delivery_failures, 1);
        assert_eq!(stored(&h, "S").await.last_observed_count, 2);

        // Not retried on the next sweep.
        h.cycle.run_once().await;
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let store = Arc::new(MemoryStore::with_subjects([subject("S", 1)]));
        let source = Arc::new(ScriptedSource::slow(Duration::from_secs(30)));
        source.push("S", [Count(9)]);
        let notifier = Arc::new(RecordingNotifier::new());
        let mut cycle = PollCycle::with_parts(
            store.clone(),
            source,
            notifier.clone(),
            BulkFailureGuard::new(),
            CycleSettings::default(),
        );

        let report = cycle.run_once().await;

        assert_eq!(report.failed, 1);
        assert!(notifier.sent().is_empty());
        let kept = store.get(&SubjectKey::new(None, "S")).await.unwrap().unwrap();
        assert_eq!(kept.last_observed_count, 1);
    }

    #[tokio::test]
    async fn test_empty_store_is_not_a_failure() {
        let mut h = harness(Vec::new(), CycleSettings::default());
        let report = h.cycle.run_once().await;
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.cycle.guard().consecutive_all_failed_sweeps(), 0);
    }

    /// Counts one slot everywhere except `panics_on`.
    struct PanicsOn(&'static str);

    #[async_trait]
    impl AvailabilitySource for PanicsOn {
        async fn fetch_state(&self, subject_id: &str) -> AvailabilityReading {
            if subject_id == self.0 {
                panic!("parser bug on {subject_id}");
            }
            Count(1)
        }
    }

    #[tokio::test]
    async fn test_crashed_sweep_does_not_count_toward_next() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let mut guard = BulkFailureGuard::new();
        guard.record(false);
        guard.record_sweep_end(true);

        let store = Arc::new(MemoryStore::with_subjects([subject("A", 0), subject("B", 0)]));
        let mut cycle = PollCycle::with_parts(
            store.clone(),
            Arc::new(PanicsOn("B")),
            Arc::new(RecordingNotifier::new()),
            guard,
            CycleSettings::default(),
        );

        // "A" succeeds, then the sweep dies on "B".
        let crashed = AssertUnwindSafe(cycle.run_once()).catch_unwind().await;
        assert!(crashed.is_err());

        store.delete(&SubjectKey::new(None, "A")).await.unwrap();
        store.delete(&SubjectKey::new(None, "B")).await.unwrap();
        cycle.run_once().await;
        assert_eq!(cycle.guard().consecutive_all_failed_sweeps(), 1);
    }

    #[tokio::test]
    async fn test_retention_runs_before_sweep() {
        let mut stale = subject("old", 0);
        stale.last_seen_at = Utc::now() - chrono::Duration::days(45);
        let mut h = harness(vec![stale, subject("new", 0)], CycleSettings::default());
        h.source.push("new", [Count(0)]);

        let report = h.cycle.run_once().await;

        assert_eq!(report.expired, 1);
        assert_eq!(report.total, 1);
        assert_eq!(report.succeeded, 1);
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl StateStore for ReadOnlyStore {
        async fn list_all(&self) -> Result<Vec<TrackedSubject>> {
            self.0.list_all().await
        }
        async fn get(&self, key: &SubjectKey) -> Result<Option<TrackedSubject>> {
            self.0.get(key).await
        }
        async fn put(&self, _subject: TrackedSubject) -> Result<()> {
            Err(AppError::storage("read-only"))
        }
        async fn delete(&self, _key: &SubjectKey) -> Result<bool> {
            Err(AppError::storage("read-only"))
        }
        async fn update(
            &self,
            _key: &SubjectKey,
            _apply: SubjectUpdate,
        ) -> Result<Option<TrackedSubject>> {
            Err(AppError::storage("read-only"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_abort_sweep() {
        let store = Arc::new(ReadOnlyStore(MemoryStore::with_subjects([
            subject("A", 0),
            subject("B", 0),
        ])));
        let source = Arc::new(ScriptedSource::new());
        source.push("A", [Count(1)]);
        source.push("B", [Count(2)]);
        let notifier = Arc::new(RecordingNotifier::new());
        let mut cycle = PollCycle::with_parts(
            store,
            source,
            notifier.clone(),
            BulkFailureGuard::new(),
            CycleSettings::default(),
        );

        let report = cycle.run_once().await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.persist_failures, 2);
        assert_eq!(notifier.sent().len(), 2);
    }
}
