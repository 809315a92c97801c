// src/models/mod.rs

//! Domain models for the watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod reading;
mod subject;

// Re-export all public types
pub use config::{
    Config, HttpConfig, LoggingConfig, NotFoundPolicy, NotifyConfig, RegistrationConfig,
    RetentionConfig, ScrapeConfig, StorageConfig, WatcherConfig,
};
pub use reading::{AvailabilityReading, SweepReport};
pub use subject::{NotifyTarget, SubjectKey, TrackedSubject};
