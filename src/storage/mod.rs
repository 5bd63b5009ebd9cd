//! Storage abstractions for schedule configuration, cursors, and the post queue.
//!
//! The store exclusively owns durable digest state:
//!
//! ```text
//! schedules ─┬─ sources       (committed cursor + pending cursor per source)
//!            ├─ recipients
//!            └─ queued_posts  (durable mailbox, drained only after a send)
//! ```
//!
//! Cursor advancement and queue draining happen in one transaction scoped to
//! a single schedule, so concurrent commits of different schedules never
//! interleave on the same rows. Runs of the same schedule are serialized by a
//! lease column on the schedule row, which also holds across processes.

pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CursorAdvance, QueuedPost, Schedule};

// Re-export for convenience
pub use sqlite::SqliteStore;

/// Trait for relational store backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load keyword, sources with their cursors, and recipients for a run.
    ///
    /// Fails with `NotFound` for unknown or not-yet-active schedules.
    async fn load_configuration_and_cursors(&self, schedule_id: Uuid) -> Result<Schedule>;

    /// Append posts to the schedule's mailbox, ignoring ones already queued.
    ///
    /// Returns the number of newly queued posts.
    async fn enqueue_posts(&self, schedule_id: Uuid, posts: &[QueuedPost]) -> Result<usize>;

    /// Persist the provisional cursor reached after a page was queued.
    async fn record_pending_cursor(&self, source_id: Uuid, cursor: &str) -> Result<()>;

    /// Everything currently queued for a schedule, oldest post first.
    async fn queued_posts(&self, schedule_id: Uuid) -> Result<Vec<QueuedPost>>;

    /// Promote provisional cursors and remove delivered posts in one step.
    async fn advance_cursors_and_drain_queue(
        &self,
        schedule_id: Uuid,
        advances: &[CursorAdvance],
        delivered: &[Uuid],
    ) -> Result<()>;

    /// Take the schedule's run lease for `claim`.
    ///
    /// Returns `false` while another claim holds an unexpired lease. A lease
    /// older than `lease` is considered abandoned and is taken over. Fails
    /// with `NotFound` for unknown or not-yet-active schedules.
    async fn claim_run(&self, schedule_id: Uuid, claim: Uuid, lease: Duration) -> Result<bool>;

    /// Give the lease back if `claim` still holds it.
    async fn release_run(&self, schedule_id: Uuid, claim: Uuid) -> Result<()>;

    /// Insert a schedule with its sources and recipients.
    async fn create_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Flip a pending schedule to active once its trigger is registered.
    async fn mark_active(&self, schedule_id: Uuid) -> Result<()>;

    /// Read one schedule regardless of state.
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule>;

    /// Replace keyword, cron expression, sources, and recipients.
    async fn update_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Remove a schedule and everything it owns.
    async fn delete_schedule(&self, schedule_id: Uuid) -> Result<()>;

    /// All schedules, newest first.
    async fn list_schedules(&self) -> Result<Vec<Schedule>>;
}
