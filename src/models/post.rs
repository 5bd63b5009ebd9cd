// src/models/post.rs

//! Provider posts and queued post records.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::html::unescape;
use crate::utils::{media_url_target, resolve_url};

/// Base URL for relative permalinks.
pub const PERMALINK_BASE: &str = "https://www.reddit.com";

/// A post as returned by the provider search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    /// Short id (e.g. `abc123`)
    pub id: String,

    /// Fullname (e.g. `t3_abc123`), used as the pagination cursor
    #[serde(default)]
    pub name: String,

    pub title: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub subreddit: String,

    #[serde(default, rename = "over_18")]
    pub nsfw: bool,

    #[serde(default)]
    pub spoiler: bool,

    #[serde(default)]
    pub ups: i64,

    #[serde(default)]
    pub downs: i64,

    /// `self`, `default`, `nsfw` or an image URL
    #[serde(default)]
    pub thumbnail: String,

    /// Seconds since the epoch
    #[serde(default)]
    pub created_utc: f64,

    /// Path relative to the provider site
    #[serde(default)]
    pub permalink: String,
}

impl Post {
    /// Creation time, falling back to the epoch for out-of-range values.
    pub fn created_time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created_utc as i64, 0)
            .single()
            .unwrap_or_default()
    }

    /// Cursor token identifying this post.
    pub fn cursor(&self) -> String {
        if self.name.is_empty() {
            format!("t3_{}", self.id)
        } else {
            self.name.clone()
        }
    }

    /// Thumbnail safe to embed in an email, or `None`.
    pub fn sanitized_thumbnail(&self) -> Option<String> {
        if let Some(target) = media_url_target(&self.thumbnail) {
            return Some(target);
        }

        let mut raw = unescape(&self.thumbnail);
        if let Some(rest) = raw.strip_prefix("http://") {
            raw = format!("https://{rest}");
        }

        let lower = raw.to_lowercase();
        let is_image = [".jpg", ".jpeg", ".png", ".gif"]
            .iter()
            .any(|ext| lower.ends_with(ext))
            || lower.starts_with("https://i.redd.it/");

        is_image.then_some(raw)
    }

    /// Absolute link to the discussion page.
    pub fn absolute_permalink(&self) -> String {
        resolve_url(PERMALINK_BASE, &self.permalink)
    }
}

/// A post held in the durable mailbox until its digest is confirmed sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPost {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub source_id: Option<Uuid>,
    pub post: Post,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedPost {
    pub fn new(schedule_id: Uuid, source_id: Uuid, post: Post) -> Self {
        Self {
            id: Uuid::now_v7(),
            schedule_id,
            source_id: Some(source_id),
            post,
            enqueued_at: Utc::now(),
        }
    }
}
