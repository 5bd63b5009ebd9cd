// src/models/schedule.rs

//! Schedule, source filter, and recipient data structures.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Maximum number of sources or recipients per schedule.
pub const MAX_ENTRIES: usize = 10;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern")
});

static CRON_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z*/,\-?#LW]+$").expect("static cron pattern"));

/// Sort order requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Relevance,
    Hot,
    Top,
    #[default]
    New,
    Comments,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::Hot => "hot",
            SortOrder::Top => "top",
            SortOrder::New => "new",
            SortOrder::Comments => "comments",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "new" => Ok(SortOrder::New),
            "relevance" => Ok(SortOrder::Relevance),
            "hot" => Ok(SortOrder::Hot),
            "top" => Ok(SortOrder::Top),
            "comments" => Ok(SortOrder::Comments),
            other => Err(AppError::validation(format!("unknown sort order '{other}'"))),
        }
    }
}

/// One content origin with its own cursor and fetch options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFilter {
    pub id: Uuid,

    /// Subreddit name without the `r/` prefix
    pub name: String,

    #[serde(default)]
    pub sort: SortOrder,

    #[serde(default)]
    pub include_nsfw: bool,

    #[serde(default)]
    pub restrict_to_source: bool,

    /// Newest post already delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,

    /// Provisional cursor of a fetch that has not been committed yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_cursor: Option<String>,
}

impl SourceFilter {
    /// Cursor the next page request should start after.
    pub fn resume_cursor(&self) -> Option<&str> {
        self.pending_cursor
            .as_deref()
            .or(self.cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// A digest delivery address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub id: Uuid,
    pub address: String,
}

/// Persisted lifecycle state of a schedule row.
///
/// A row is `Pending` between the store write and the trigger registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    Pending,
    Active,
}

impl ScheduleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleState::Pending => "pending",
            ScheduleState::Active => "active",
        }
    }
}

impl FromStr for ScheduleState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ScheduleState::Pending),
            "active" => Ok(ScheduleState::Active),
            other => Err(AppError::config(format!("unknown schedule state '{other}'"))),
        }
    }
}

/// A keyword digest configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub id: Uuid,
    pub keyword: String,

    /// Cron expression driving the trigger
    #[serde(rename = "schedule")]
    pub cron_expression: String,

    pub sources: Vec<SourceFilter>,
    pub recipients: Vec<Recipient>,

    #[serde(skip_serializing)]
    pub state: ScheduleState,

    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Delivery addresses in configuration order.
    pub fn addresses(&self) -> Vec<String> {
        self.recipients.iter().map(|r| r.address.clone()).collect()
    }
}

/// Source entry of a create or update request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInput {
    /// Existing source to update in place
    #[serde(default)]
    pub id: Option<Uuid>,

    #[serde(alias = "subreddit")]
    pub name: String,

    #[serde(default)]
    pub sort: Option<String>,

    #[serde(default)]
    pub include_nsfw: bool,

    #[serde(default, alias = "restrict_subreddit")]
    pub restrict_to_source: bool,
}

/// Recipient entry of a create or update request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub address: String,
}

/// Create or update request for a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub keyword: String,

    #[serde(rename = "schedule")]
    pub cron_expression: String,

    #[serde(alias = "subreddits")]
    pub sources: Vec<SourceInput>,

    pub recipients: Vec<RecipientInput>,
}

impl ScheduleInput {
    /// Check required fields and bounds. Nothing is written when this fails.
    pub fn validate(&self) -> Result<()> {
        if self.keyword.trim().is_empty() {
            return Err(AppError::validation("keyword is required"));
        }
        validate_cron(&self.cron_expression)?;

        if self.sources.is_empty() || self.sources.len() > MAX_ENTRIES {
            return Err(AppError::validation(format!(
                "between 1 and {MAX_ENTRIES} sources are required"
            )));
        }
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AppError::validation("source name is required"));
            }
            source.sort.as_deref().unwrap_or_default().parse::<SortOrder>()?;
        }

        if self.recipients.is_empty() || self.recipients.len() > MAX_ENTRIES {
            return Err(AppError::validation(format!(
                "between 1 and {MAX_ENTRIES} recipients are required"
            )));
        }
        for recipient in &self.recipients {
            if !EMAIL_RE.is_match(recipient.address.trim()) {
                return Err(AppError::validation(format!(
                    "invalid recipient address '{}'",
                    recipient.address
                )));
            }
        }
        Ok(())
    }

    /// Build a new schedule with generated identities.
    pub fn into_schedule(self) -> Result<Schedule> {
        self.validate()?;
        let schedule_id = Uuid::now_v7();
        let mut schedule = self.into_schedule_with_id(schedule_id)?;
        schedule.state = ScheduleState::Pending;
        Ok(schedule)
    }

    /// Build the desired state of an existing schedule.
    ///
    /// Entries without an id get a fresh one; entries with an id keep it.
    pub fn into_schedule_with_id(self, id: Uuid) -> Result<Schedule> {
        let sources = self
            .sources
            .into_iter()
            .map(|s| {
                Ok(SourceFilter {
                    id: s.id.unwrap_or_else(Uuid::now_v7),
                    name: normalize_source_name(&s.name),
                    sort: s.sort.as_deref().unwrap_or_default().parse()?,
                    include_nsfw: s.include_nsfw,
                    restrict_to_source: s.restrict_to_source,
                    cursor: None,
                    pending_cursor: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let recipients = self
            .recipients
            .into_iter()
            .map(|r| Recipient {
                id: r.id.unwrap_or_else(Uuid::now_v7),
                address: r.address.trim().to_string(),
            })
            .collect();

        Ok(Schedule {
            id,
            keyword: self.keyword.trim().to_string(),
            cron_expression: self.cron_expression.trim().to_string(),
            sources,
            recipients,
            state: ScheduleState::Active,
            created_at: Utc::now(),
        })
    }
}

/// Strip a leading `r/` or `/r/` from a subreddit name.
pub fn normalize_source_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_prefix('/').unwrap_or(name);
    name.strip_prefix("r/").unwrap_or(name).to_string()
}

/// Accept standard 5-field or seconds-prefixed 6-field cron expressions.
pub fn validate_cron(expression: &str) -> Result<()> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.is_empty() {
        return Err(AppError::validation("cron expression is required"));
    }
    if !(5..=6).contains(&fields.len()) {
        return Err(AppError::validation(format!(
            "cron expression '{expression}' must have 5 or 6 fields"
        )));
    }
    if let Some(bad) = fields.iter().find(|f| !CRON_FIELD_RE.is_match(f)) {
        return Err(AppError::validation(format!(
            "invalid cron field '{bad}' in '{expression}'"
        )));
    }
    Ok(())
}

/// Classification of the most recent run of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    None,
    Running,
    Completed,
    Failed,
}

/// Live trigger-service view of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerDescription {
    pub paused: bool,
    pub next_fire_times: Vec<DateTime<Utc>>,
    pub last_run_status: RunStatus,
}

/// Persisted configuration merged with live trigger status.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDetails {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub paused: bool,
    pub next_fire_times: Vec<DateTime<Utc>>,
    pub last_run_status: RunStatus,
}
