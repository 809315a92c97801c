// src/error.rs

//! Unified error handling for the watcher.
//!
//! `AppError` covers infrastructure failures (I/O, HTTP, parsing, storage).
//! `RegistrationError` and `DeliveryError` are domain errors: the former is
//! shown to the person registering a subject, the latter is logged and
//! counted by the sweep.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// State store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Registration was refused
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }
}

/// Reasons a subject registration is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A required form field was empty
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The owner already tracks this subject
    #[error("subject {0} is already registered")]
    DuplicateSubject(String),

    /// The owner (or the whole deployment) is at its registration cap
    #[error("registration limit of {limit} subjects reached")]
    QuotaExceeded { limit: usize },

    /// The subject could not be confirmed to exist upstream
    #[error("could not resolve subject {0}")]
    ResolutionFailed(String),
}

/// Failure to deliver a push notification.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The request never got a response
    #[error("transport failure: {0}")]
    Transport(String),

    /// The push service answered with a non-success status
    #[error("push service rejected the request with status {status}")]
    Rejected { status: u16 },

    /// The push service accepted the request but the push is not active
    #[error("push was not activated by the service")]
    Inactive,

    /// The response body could not be understood
    #[error("malformed push response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::Rejected {
                status: status.as_u16(),
            },
            None if error.is_decode() => Self::Malformed(error.to_string()),
            None => Self::Transport(error.to_string()),
        }
    }
}
