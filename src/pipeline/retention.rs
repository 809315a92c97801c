// src/pipeline/retention.rs

//! Purge of abandoned registrations.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::storage::StateStore;

/// Delete subjects whose owner has not been seen for longer than `max_age`.
///
/// Returns how many were removed.
pub async fn purge_unseen(
    store: &dyn StateStore,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<usize> {
    let cutoff = now - max_age;
    let mut removed = 0;

    for subject in store.list_all().await? {
        if subject.last_seen_at < cutoff && store.delete(&subject.key()).await? {
            log::info!(
                "Retention: removed {} (last seen {})",
                subject.key(),
                subject.last_seen_at.format("%Y-%m-%d")
            );
            removed += 1;
        }
    }

    Ok(removed)
}
