//! In-memory storage, lost on restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{SubjectKey, TrackedSubject};
use crate::storage::{StateStore, SubjectUpdate};

/// Map-backed store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    subjects: Mutex<BTreeMap<SubjectKey, TrackedSubject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records.
    pub fn with_subjects(subjects: impl IntoIterator<Item = TrackedSubject>) -> Self {
        Self {
            subjects: Mutex::new(subjects.into_iter().map(|s| (s.key(), s)).collect()),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<TrackedSubject>> {
        Ok(self.subjects.lock().await.values().cloned().collect())
    }

    async fn get(&self, key: &SubjectKey) -> Result<Option<TrackedSubject>> {
        Ok(self.subjects.lock().await.get(key).cloned())
    }

    async fn put(&self, subject: TrackedSubject) -> Result<()> {
        self.subjects.lock().await.insert(subject.key(), subject);
        Ok(())
    }

    async fn delete(&self, key: &SubjectKey) -> Result<bool> {
        Ok(self.subjects.lock().await.remove(key).is_some())
    }

    async fn update(
        &self,
        key: &SubjectKey,
        apply: SubjectUpdate,
    ) -> Result<Option<TrackedSubject>> {
        let mut subjects = self.subjects.lock().await;
        let Some(existing) = subjects.get_mut(key) else {
            return Ok(None);
        };

        let mut updated = existing.clone();
        apply(&mut updated);
        if updated.key() != *key {
            return Err(AppError::storage(format!(
                "update may not change the key of {key}"
            )));
        }
        *existing = updated.clone();
        Ok(Some(updated))
    }
}
