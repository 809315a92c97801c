//! Local filesystem storage implementation.
//!
//! All subjects live in one JSON document that is rewritten atomically
//! (temp file, then rename) after every mutation, so a crash mid-sweep keeps
//! every update persisted before it.
//!
//! The file is the only copy of the state. Every call reads it again, and
//! every mutation runs read-modify-write while holding a `<file>.lock` file,
//! so a watcher and separate CLI invocations can share one store without
//! losing each other's writes.
//!
//! ## File Layout
//!
//! ```text
//! {
//!   "updated_at": "2026-10-19T08:00:00Z",
//!   "count": 2,
//!   "subjects": [ { "subject_id": "...", ... }, ... ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{SubjectKey, TrackedSubject};
use crate::storage::{StateStore, SubjectUpdate};

type SubjectMap = BTreeMap<SubjectKey, TrackedSubject>;

/// Give up on a contended lock after this long.
const LOCK_WAIT: Duration = Duration::from_secs(10);
/// A lock file older than this was left behind by a dead process.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);
const LOCK_RETRY: Duration = Duration::from_millis(25);

/// On-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    /// ISO 8601 timestamp of last write
    pub updated_at: DateTime<Utc>,
    /// Total subject count
    pub count: usize,
    pub subjects: Vec<TrackedSubject>,
}

impl StoreFile {
    pub fn new(subjects: Vec<TrackedSubject>) -> Self {
        Self {
            updated_at: Utc::now(),
            count: subjects.len(),
            subjects,
        }
    }
}

/// Removes the lock file when the mutation is done.
struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// JSON-file-backed store, safe to share between processes.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    // Writers in this process queue here instead of polling the lock file.
    writer: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match Self::read_file(&path).await? {
            Some(file) => log::info!(
                "Loaded {} tracked subjects from {}",
                file.subjects.len(),
                path.display()
            ),
            None => log::warn!("No store found at {}, starting empty", path.display()),
        }

        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        Ok(Self {
            lock_path: path.with_file_name(lock_name),
            path,
            writer: Mutex::new(()),
        })
    }

    /// Read the document, returning None if the file doesn't exist.
    async fn read_file(path: &Path) -> Result<Option<StoreFile>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn load(&self) -> Result<SubjectMap> {
        Ok(Self::read_file(&self.path)
            .await?
            .map(|file| file.subjects.into_iter().map(|s| (s.key(), s)).collect())
            .unwrap_or_default())
    }

    /// Take the cross-process lock, clearing one left by a crashed process.
    async fn lock(&self) -> Result<StoreLock> {
        if let Some(parent) = self.lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let deadline = Instant::now() + LOCK_WAIT;
        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
                .await;
            match created {
                Ok(_) => {
                    return Ok(StoreLock {
                        path: self.lock_path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(AppError::Io(e)),
            }

            if self.lock_is_stale().await {
                log::warn!("Removing stale lock {}", self.lock_path.display());
                let _ = tokio::fs::remove_file(&self.lock_path).await;
                continue;
            }
            if Instant::now() >= deadline {
                return Err(AppError::storage(format!(
                    "timed out waiting for {}",
                    self.lock_path.display()
                )));
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    async fn lock_is_stale(&self) -> bool {
        tokio::fs::metadata(&self.lock_path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > LOCK_STALE_AFTER)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read the current document under the lock, let `change` edit it, and
    /// write it back if `change` says it changed something.
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut SubjectMap) -> Result<(T, bool)> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let _lock = self.lock().await?;

        let mut subjects = self.load().await?;
        let (value, changed) = change(&mut subjects)?;
        if changed {
            let file = StoreFile::new(subjects.into_values().collect());
            let bytes = serde_json::to_vec_pretty(&file)?;
            self.write_bytes(&bytes).await?;
        }
        Ok(value)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn list_all(&self) -> Result<Vec<TrackedSubject>> {
        Ok(self.load().await?.into_values().collect())
    }

    async fn get(&self, key: &SubjectKey) -> Result<Option<TrackedSubject>> {
        Ok(self.load().await?.remove(key))
    }

    async fn put(&self, subject: TrackedSubject) -> Result<()> {
        self.mutate(move |subjects| {
            subjects.insert(subject.key(), subject);
            Ok(((), true))
        })
        .await
    }

    async fn delete(&self, key: &SubjectKey) -> Result<bool> {
        self.mutate(|subjects| {
            let removed = subjects.remove(key).is_some();
            Ok((removed, removed))
        })
        .await
    }

    async fn update(
        &self,
        key: &SubjectKey,
        apply: SubjectUpdate,
    ) -> Result<Option<TrackedSubject>> {
        self.mutate(move |subjects| {
            let Some(existing) = subjects.get_mut(key) else {
                return Ok((None, false));
            };

            let mut updated = existing.clone();
            apply(&mut updated);
            if updated.key() != *key {
                return Err(AppError::storage(format!(
                    "update may not change the key of {key}"
                )));
            }
            *existing = updated.clone();
            Ok((Some(updated), true))
        })
        .await
    }
}
