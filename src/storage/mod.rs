//! Storage abstractions for tracked subjects.
//!
//! The store is the only state shared between the registration path and the
//! background sweep. Both go through [`StateStore::update`] for
//! read-modify-write so neither clobbers the other's changes.

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SubjectKey, TrackedSubject};

// Re-export for convenience
pub use local::JsonFileStore;
pub use memory::MemoryStore;

/// In-place mutation applied under the store's lock.
pub type SubjectUpdate = Box<dyn FnOnce(&mut TrackedSubject) + Send>;

/// Trait for tracked-subject storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Snapshot of every tracked subject.
    async fn list_all(&self) -> Result<Vec<TrackedSubject>>;

    async fn get(&self, key: &SubjectKey) -> Result<Option<TrackedSubject>>;

    /// Insert or replace a subject.
    async fn put(&self, subject: TrackedSubject) -> Result<()>;

    /// Remove a subject. Returns whether it existed.
    async fn delete(&self, key: &SubjectKey) -> Result<bool>;

    /// Atomically apply `apply` to the stored subject.
    ///
    /// Returns the updated record, or `None` if the key is absent (nothing
    /// is created).
    async fn update(&self, key: &SubjectKey, apply: SubjectUpdate)
    -> Result<Option<TrackedSubject>>;

    /// Subjects belonging to one owner.
    async fn list_owned(&self, owner: Option<&str>) -> Result<Vec<TrackedSubject>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|s| s.owner.as_deref() == owner)
            .collect())
    }
}
