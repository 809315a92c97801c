// src/pipeline/registration.rs

//! Register, list and remove tracked subjects.
//!
//! This is the path a front end calls. Its errors are the only ones meant to
//! be shown to an end user.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{RegistrationError, Result};
use crate::models::{NotifyTarget, RegistrationConfig, SubjectKey, TrackedSubject};
use crate::services::NameResolver;
use crate::storage::StateStore;
use crate::utils::normalize_subject_id;

/// Registration front door over the shared store.
pub struct Registry {
    store: Arc<dyn StateStore>,
    resolver: Arc<dyn NameResolver>,
    limits: RegistrationConfig,
    // Serializes the final check-then-insert so concurrent registrations
    // cannot overshoot a cap. Never held across a name lookup.
    insert_lock: Mutex<()>,
}

impl Registry {
    pub fn new(
        store: Arc<dyn StateStore>,
        resolver: Arc<dyn NameResolver>,
        limits: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            limits,
            insert_lock: Mutex::new(()),
        }
    }

    /// Start tracking `subject_id` for `owner`.
    ///
    /// `subject_id` may also be a pasted profile URL. The subject must be
    /// resolvable upstream; its display name is stored with the record.
    pub async fn register(
        &self,
        subject_id: &str,
        notify_target: &str,
        owner: Option<&str>,
    ) -> Result<TrackedSubject> {
        let subject_id = normalize_subject_id(subject_id);
        if subject_id.is_empty() {
            return Err(RegistrationError::MissingField("subject_id").into());
        }
        let target = NotifyTarget::new(notify_target.trim());
        if target.is_blank() {
            return Err(RegistrationError::MissingField("notify_target").into());
        }
        let owner = owner.map(str::trim).filter(|o| !o.is_empty());
        let key = SubjectKey::new(owner, subject_id.as_str());

        // Fail fast before the lookup, then again once the lock is held.
        self.check_insertable(&key, owner).await?;
        let name = self
            .resolver
            .resolve_name(&subject_id)
            .await
            .ok_or_else(|| RegistrationError::ResolutionFailed(subject_id.clone()))?;

        let _serial = self.insert_lock.lock().await;
        self.check_insertable(&key, owner).await?;

        let mut subject =
            TrackedSubject::new(subject_id, target, owner.map(str::to_string), Utc::now());
        subject.display_name = Some(name);
        self.store.put(subject.clone()).await?;

        log::info!(
            "Registered {} ({}) for {}",
            subject.key(),
            subject.label(),
            subject.notify_target
        );
        Ok(subject)
    }

    async fn check_insertable(&self, key: &SubjectKey, owner: Option<&str>) -> Result<()> {
        if self.store.get(key).await?.is_some() {
            return Err(RegistrationError::DuplicateSubject(key.subject_id.clone()).into());
        }
        let owned = self.store.list_owned(owner).await?.len();
        if owned >= self.limits.max_per_owner {
            return Err(RegistrationError::QuotaExceeded {
                limit: self.limits.max_per_owner,
            }
            .into());
        }
        if let Some(limit) = self.limits.max_global {
            if self.store.list_all().await?.len() >= limit {
                return Err(RegistrationError::QuotaExceeded { limit }.into());
            }
        }
        Ok(())
    }

    /// Stop tracking a subject. Returns whether it was tracked.
    pub async fn remove(&self, subject_id: &str, owner: Option<&str>) -> Result<bool> {
        let key = SubjectKey::new(owner, normalize_subject_id(subject_id));
        let removed = self.store.delete(&key).await?;
        if removed {
            log::info!("Removed {}", key);
        }
        Ok(removed)
    }

    /// The owner's subjects. Counts as owner activity for retention.
    pub async fn list(&self, owner: Option<&str>) -> Result<Vec<TrackedSubject>> {
        let now = Utc::now();
        let mut subjects = Vec::new();
        for subject in self.store.list_owned(owner).await? {
            let touched = self
                .store
                .update(&subject.key(), Box::new(move |s| s.last_seen_at = now))
                .await?;
            subjects.extend(touched);
        }
        subjects.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        Ok(subjects)
    }
}
