//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sweep timing and failure handling
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// How schedule pages are read
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Push notification settings
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Registration caps
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Cleanup of abandoned registrations
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Where subjects are persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `SLOTWATCH_*` environment overrides. Unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("SLOTWATCH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.watcher.interval_secs = secs;
        }
        if let Some(secs) = lookup("SLOTWATCH_FETCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.watcher.fetch_timeout_secs = secs;
        }
        if let Some(path) = lookup("SLOTWATCH_STORE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("SLOTWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.watcher.interval_secs == 0 {
            return Err(AppError::validation("watcher.interval_secs must be > 0"));
        }
        if self.watcher.fetch_timeout_secs == 0 {
            return Err(AppError::validation(
                "watcher.fetch_timeout_secs must be > 0",
            ));
        }
        if self.watcher.bulk_failure_threshold == 0 {
            return Err(AppError::validation(
                "watcher.bulk_failure_threshold must be > 0",
            ));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if !self.scrape.subject_url_template.contains("{id}") {
            return Err(AppError::validation(
                "scrape.subject_url_template must contain {id}",
            ));
        }
        if let Some(pattern) = &self.scrape.marker_text_pattern {
            Regex::new(pattern).map_err(|e| {
                AppError::validation(format!("scrape.marker_text_pattern: {e}"))
            })?;
        }
        if self.registration.max_per_owner == 0 {
            return Err(AppError::validation(
                "registration.max_per_owner must be > 0",
            ));
        }
        Ok(())
    }
}

/// What happens to a subject once its page disappears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotFoundPolicy {
    /// Keep the record, mark it missing, notify once
    #[default]
    Flag,
    /// Notify once, then delete the record
    Remove,
}

/// Sweep timing and failure handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds between sweeps
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Upper bound for a single subject fetch
    #[serde(default = "defaults::fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Consecutive all-failed sweeps before upstream is considered down
    #[serde(default = "defaults::bulk_failure_threshold")]
    pub bulk_failure_threshold: u32,

    /// Sweeps to skip after upstream is considered down
    #[serde(default = "defaults::cooldown_sweeps")]
    pub cooldown_sweeps: u32,

    #[serde(default)]
    pub not_found_policy: NotFoundPolicy,
}

impl WatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            fetch_timeout_secs: defaults::fetch_timeout(),
            bulk_failure_threshold: defaults::bulk_failure_threshold(),
            cooldown_sweeps: defaults::cooldown_sweeps(),
            not_found_policy: NotFoundPolicy::default(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds for name lookups and pushes
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Schedule page scraping rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Subject page URL; `{id}` is replaced with the subject ID
    #[serde(default = "defaults::subject_url_template")]
    pub subject_url_template: String,

    /// CSS selector matching one element per open slot
    #[serde(default = "defaults::marker_selector")]
    pub marker_selector: String,

    /// Only count markers whose text matches this regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_text_pattern: Option<String>,

    /// CSS selector for the subject's display name
    #[serde(default = "defaults::name_selector")]
    pub name_selector: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            subject_url_template: defaults::subject_url_template(),
            marker_selector: defaults::marker_selector(),
            marker_text_pattern: None,
            name_selector: defaults::name_selector(),
        }
    }
}

/// Push notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Pushbullet API root
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Push title
    #[serde(default = "defaults::title")]
    pub title: String,

    /// Body when slots open up (`{id}`, `{name}`, `{count}`)
    #[serde(default = "defaults::available_template")]
    pub available_template: String,

    /// Body when the subject disappears (`{id}`, `{name}`)
    #[serde(default = "defaults::gone_template")]
    pub gone_template: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            title: defaults::title(),
            available_template: defaults::available_template(),
            gone_template: defaults::gone_template(),
        }
    }
}

/// Registration caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Subjects one owner may track
    #[serde(default = "defaults::max_per_owner")]
    pub max_per_owner: usize,

    /// Subjects the whole deployment may track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_global: Option<usize>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_per_owner: defaults::max_per_owner(),
            max_global: None,
        }
    }
}

/// Cleanup of abandoned registrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days without owner activity before a subject is purged; 0 disables
    #[serde(default = "defaults::unseen_days")]
    pub unseen_days: u32,
}

impl RetentionConfig {
    pub fn max_age(&self) -> Option<chrono::Duration> {
        (self.unseen_days > 0).then(|| chrono::Duration::days(i64::from(self.unseen_days)))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            unseen_days: defaults::unseen_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding tracked subjects
    #[serde(default = "defaults::store_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: defaults::store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Watcher defaults
    pub fn interval() -> u64 {
        600
    }
    pub fn fetch_timeout() -> u64 {
        5
    }
    pub fn bulk_failure_threshold() -> u32 {
        5
    }
    pub fn cooldown_sweeps() -> u32 {
        1
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; slotwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        10
    }

    // Scrape defaults
    pub fn subject_url_template() -> String {
        "https://eikaiwa.dmm.com/teacher/index/{id}/".into()
    }
    pub fn marker_selector() -> String {
        "a.bt-open".into()
    }
    pub fn name_selector() -> String {
        "h1".into()
    }

    // Notify defaults
    pub fn api_base() -> String {
        "https://api.pushbullet.com".into()
    }
    pub fn title() -> String {
        "Lesson slots available".into()
    }
    pub fn available_template() -> String {
        "{name} has open slots ({count} available)".into()
    }
    pub fn gone_template() -> String {
        "{name} ({id}) no longer exists upstream".into()
    }

    // Registration and retention defaults
    pub fn max_per_owner() -> usize {
        10
    }
    pub fn unseen_days() -> u32 {
        30
    }

    pub fn store_path() -> PathBuf {
        PathBuf::from("data/subjects.json")
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
