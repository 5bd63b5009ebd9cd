// src/models/mod.rs

//! Domain models for the digester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod post;
mod schedule;

// Re-export all public types
pub use config::{
    Config, DatabaseConfig, FetchConfig, GmailConfig, MailerConfig, NotifyConfig, RedditConfig,
    ResendConfig, RunConfig, ServerConfig,
};
pub use post::{PERMALINK_BASE, Post, QueuedPost};
pub use schedule::{
    MAX_ENTRIES, Recipient, RecipientInput, RunStatus, Schedule, ScheduleDetails, ScheduleInput,
    ScheduleState, SortOrder, SourceFilter, SourceInput, TriggerDescription,
    normalize_source_name, validate_cron,
};

#[cfg(test)]
pub(crate) use post::tests::sample_post;

/// Per-source outcome of a successful fetch, handed to the commit step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorAdvance {
    pub source_id: uuid::Uuid,
    pub cursor: String,
}
