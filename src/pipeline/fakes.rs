//! Scripted collaborators for sweep and scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::models::{AvailabilityReading, NotifyTarget};
use crate::services::{AvailabilitySource, Delivered, NameResolver, Notifier};

/// Returns queued readings per subject; unscripted fetches fail transiently.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<AvailabilityReading>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` first.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, subject_id: &str, readings: impl IntoIterator<Item = AvailabilityReading>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(subject_id.to_string())
            .or_default()
            .extend(readings);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilitySource for ScriptedSource {
    async fn fetch_state(&self, subject_id: &str) -> AvailabilityReading {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(subject_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| AvailabilityReading::TransientError("unscripted".into()))
    }
}

/// Panics on every fetch.
pub struct PanickingSource;

#[async_trait]
impl AvailabilitySource for PanickingSource {
    async fn fetch_state(&self, subject_id: &str) -> AvailabilityReading {
        panic!("scraper blew up on {subject_id}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotice {
    pub target: String,
    pub subject_id: String,
    pub message: String,
}

/// Records every notification; optionally refuses them all.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotice>>,
    refuse: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentNotice> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        target: &NotifyTarget,
        subject_id: &str,
        message: &str,
    ) -> Result<Delivered, DeliveryError> {
        self.sent.lock().unwrap().push(SentNotice {
            target: target.expose().to_string(),
            subject_id: subject_id.to_string(),
            message: message.to_string(),
        });
        if self.refuse {
            Err(DeliveryError::Inactive)
        } else {
            Ok(Delivered::default())
        }
    }
}

/// Resolves only the names it was given.
#[derive(Default)]
pub struct StaticResolver {
    names: HashMap<String, String>,
}

impl StaticResolver {
    pub fn with(names: &[(&str, &str)]) -> Self {
        Self {
            names: names
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve_name(&self, subject_id: &str) -> Option<String> {
        self.names.get(subject_id).cloned()
    }
}
