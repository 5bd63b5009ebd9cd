// src/error.rs

//! Unified error handling for the digester.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for digester operations.
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

    /// Store unavailable or constraint violation
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Provider signalled throttling (HTTP 429)
    #[error("Rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Provider returned a 5xx response
    #[error("Provider unavailable: HTTP {status}")]
    ProviderUnavailable { status: u16 },

    /// Bounded rate-limit retries were used up for a source
    #[error("Rate limit retries exhausted for {source_name} after {attempts} attempts")]
    RateLimitExhausted { source_name: String, attempts: u32 },

    /// Provider returned an unexpected, non-retryable response
    #[error("Provider error (HTTP {status}): {message}")]
    Provider { status: u16, message: String },

    /// Provider rejected our credentials
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    /// Malformed schedule input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown schedule
    #[error("Not found: {0}")]
    NotFound(String),

    /// Notification sink failed
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    /// Trigger service failed
    #[error("Trigger service error: {0}")]
    Trigger(String),

    /// Store and trigger service disagree after a lifecycle operation
    #[error("Store and trigger service out of sync: {0}")]
    DualWrite(String),

    /// A wall-clock budget was exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Shutdown was requested before the run committed
    #[error("Run cancelled before commit")]
    Cancelled,

    /// Another run for the same schedule has not finished
    #[error("A run for schedule {0} is already in progress")]
    RunInProgress(Uuid),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A fan-out run failed because one or more sources failed
    #[error("Run failed for {failed} of {total} sources: {first}")]
    SourcesFailed {
        failed: usize,
        total: usize,
        first: Box<AppError>,
    },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a notification error.
    pub fn notification(message: impl fmt::Display) -> Self {
        Self::Notification(message.to_string())
    }

    /// Create a trigger service error.
    pub fn trigger(message: impl fmt::Display) -> Self {
        Self::Trigger(message.to_string())
    }

    /// Create a dual-write inconsistency error.
    pub fn dual_write(message: impl Into<String>) -> Self {
        Self::DualWrite(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a provider error.
    pub fn provider(status: u16, message: impl fmt::Display) -> Self {
        Self::Provider {
            status,
            message: message.to_string(),
        }
    }

    /// Whether the error is a throttling or server-side failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ProviderUnavailable { .. }
        )
    }

    /// Provider-supplied delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
