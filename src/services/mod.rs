//! Service layer: the watcher's outbound collaborators.
//!
//! This module contains:
//! - Schedule page scraping (`PageScraper`), the pluggable fetch strategy
//! - Push delivery (`PushbulletNotifier`, `LogNotifier`)
//!
//! The sweep only sees the traits below, so a markup change upstream means
//! swapping one `AvailabilitySource`, not touching the sweep.

mod notifier;
mod page;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::models::{AvailabilityReading, NotifyTarget};

pub use self::notifier::{LogNotifier, PushbulletNotifier};
pub use self::page::PageScraper;

/// Reads the current availability of a subject.
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    async fn fetch_state(&self, subject_id: &str) -> AvailabilityReading;
}

/// Best-effort display-name lookup used at registration.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve_name(&self, subject_id: &str) -> Option<String>;
}

/// Acknowledgement from the push channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivered {
    /// Channel-side identifier of the push, when it reports one
    pub push_id: Option<String>,
}

/// Outbound push channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        target: &NotifyTarget,
        subject_id: &str,
        message: &str,
    ) -> Result<Delivered, DeliveryError>;
}
