// src/models/subject.rs

//! Tracked subject records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::fingerprint;

/// Store key: a subject is unique per owner.
///
/// Single-tenant deployments use `owner: None` for every record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub owner: Option<String>,
    pub subject_id: String,
}

impl SubjectKey {
    pub fn new(owner: Option<&str>, subject_id: impl Into<String>) -> Self {
        Self {
            owner: owner.map(str::to_string),
            subject_id: subject_id.into(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}/{}", owner, self.subject_id),
            None => f.write_str(&self.subject_id),
        }
    }
}

/// Opaque push credential.
///
/// `Debug` and `Display` print a fingerprint so the token never reaches logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotifyTarget(String);

impl NotifyTarget {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the notification transport only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotifyTarget({})", fingerprint(&self.0))
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fingerprint(&self.0))
    }
}

/// A registration: one person watching one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSubject {
    /// External identifier of the subject
    pub subject_id: String,

    /// Human-readable name resolved at registration
    #[serde(default)]
    pub display_name: Option<String>,

    /// Where notifications are delivered
    pub notify_target: NotifyTarget,

    /// Slot count seen on the last successful fetch
    #[serde(default)]
    pub last_observed_count: u32,

    /// Tenant owning this registration
    #[serde(default)]
    pub owner: Option<String>,

    /// Last time the owner showed activity; drives retention
    pub last_seen_at: DateTime<Utc>,

    /// Set while the subject is gone upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_since: Option<DateTime<Utc>>,
}

impl TrackedSubject {
    pub fn new(
        subject_id: impl Into<String>,
        notify_target: NotifyTarget,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: None,
            notify_target,
            last_observed_count: 0,
            owner,
            last_seen_at: now,
            missing_since: None,
        }
    }

    pub fn key(&self) -> SubjectKey {
        SubjectKey {
            owner: self.owner.clone(),
            subject_id: self.subject_id.clone(),
        }
    }

    /// Display name, falling back to the raw ID.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.subject_id)
    }

    pub fn is_missing(&self) -> bool {
        self.missing_since.is_some()
    }

    /// Render a message template.
    ///
    /// Supported placeholders: `{id}`, `{name}`, `{count}`. Substituted
    /// text is never scanned again, so a name containing `{count}` stays
    /// literal.
    pub fn format(&self, template: &str, count: u32) -> String {
        let count = count.to_string();
        let placeholders = [
            ("{id}", self.subject_id.as_str()),
            ("{name}", self.label()),
            ("{count}", count.as_str()),
        ];

        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            rest = &rest[start..];
            match placeholders.iter().find(|(token, _)| rest.starts_with(token)) {
                Some((token, value)) => {
                    rendered.push_str(value);
                    rest = &rest[token.len()..];
                }
                None => {
                    rendered.push('{');
                    rest = &rest[1..];
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}
