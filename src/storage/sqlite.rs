// src/storage/sqlite.rs

//! SQLite storage implementation.
//!
//! One connection pool is shared by the API handlers and every concurrent
//! run. Reads of configuration go straight to the pool; every multi-row write
//! (schedule create/update, queue append, commit) is its own transaction.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    CursorAdvance, DatabaseConfig, Post, QueuedPost, Recipient, Schedule, ScheduleState,
    SortOrder, SourceFilter,
};
use crate::storage::Store;

const SOURCE_COLUMNS: &str = "id, schedule_id, name, sort, include_nsfw, restrict_to_source, \
                              cursor, pending_cursor";

/// SQLite-backed store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_schedule(&self, schedule_id: Uuid) -> Result<Schedule> {
        let row = sqlx::query(
            "SELECT id, keyword, cron_expression, state, created_at FROM schedules WHERE id = ?",
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("schedule {schedule_id}")))?;

        let mut schedule = schedule_from_row(&row)?;

        let query = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE schedule_id = ? ORDER BY position"
        );
        schedule.sources = sqlx::query(&query)
            .bind(schedule_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(source_from_row)
            .collect::<Result<_>>()?;

        schedule.recipients = sqlx::query(
            "SELECT id, address FROM recipients WHERE schedule_id = ? ORDER BY position",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(recipient_from_row)
        .collect::<Result<_>>()?;

        Ok(schedule)
    }

    async fn insert_source(
        tx: &mut Transaction<'_, Sqlite>,
        schedule_id: Uuid,
        position: usize,
        source: &SourceFilter,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sources \
             (id, schedule_id, position, name, sort, include_nsfw, restrict_to_source, cursor) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(source.id)
        .bind(schedule_id)
        .bind(position as i64)
        .bind(&source.name)
        .bind(source.sort.as_str())
        .bind(source.include_nsfw)
        .bind(source.restrict_to_source)
        .bind(source.cursor.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_recipient(
        tx: &mut Transaction<'_, Sqlite>,
        schedule_id: Uuid,
        position: usize,
        recipient: &Recipient,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO recipients (id, schedule_id, position, address) VALUES (?, ?, ?, ?)",
        )
        .bind(recipient.id)
        .bind(schedule_id)
        .bind(position as i64)
        .bind(&recipient.address)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Update sources in place by id, insert new ones, delete missing ones.
    ///
    /// A renamed source starts over with no cursor.
    async fn sync_sources(
        tx: &mut Transaction<'_, Sqlite>,
        schedule_id: Uuid,
        sources: &[SourceFilter],
    ) -> Result<()> {
        let existing: HashMap<Uuid, String> =
            sqlx::query("SELECT id, name FROM sources WHERE schedule_id = ?")
                .bind(schedule_id)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(|row| Ok((row.try_get("id")?, row.try_get("name")?)))
                .collect::<Result<_>>()?;

        let desired: HashSet<Uuid> = sources.iter().map(|s| s.id).collect();
        for id in existing.keys().filter(|id| !desired.contains(id)) {
            sqlx::query("DELETE FROM sources WHERE id = ?")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }

        for (position, source) in sources.iter().enumerate() {
            match existing.get(&source.id) {
                Some(old_name) => {
                    let renamed = !old_name.eq_ignore_ascii_case(&source.name);
                    sqlx::query(
                        "UPDATE sources SET position = ?, name = ?, sort = ?, include_nsfw = ?, \
                         restrict_to_source = ?, \
                         cursor = CASE WHEN ? THEN NULL ELSE cursor END, \
                         pending_cursor = CASE WHEN ? THEN NULL ELSE pending_cursor END \
                         WHERE id = ?",
                    )
                    .bind(position as i64)
                    .bind(&source.name)
                    .bind(source.sort.as_str())
                    .bind(source.include_nsfw)
                    .bind(source.restrict_to_source)
                    .bind(renamed)
                    .bind(renamed)
                    .bind(source.id)
                    .execute(&mut **tx)
                    .await?;
                }
                None => Self::insert_source(tx, schedule_id, position, source).await?,
            }
        }
        Ok(())
    }

    async fn sync_recipients(
        tx: &mut Transaction<'_, Sqlite>,
        schedule_id: Uuid,
        recipients: &[Recipient],
    ) -> Result<()> {
        let existing: HashSet<Uuid> =
            sqlx::query("SELECT id FROM recipients WHERE schedule_id = ?")
                .bind(schedule_id)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(|row| Ok(row.try_get("id")?))
                .collect::<Result<_>>()?;

        let desired: HashSet<Uuid> = recipients.iter().map(|r| r.id).collect();
        for id in existing.difference(&desired) {
            sqlx::query("DELETE FROM recipients WHERE id = ?")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }

        for (position, recipient) in recipients.iter().enumerate() {
            if existing.contains(&recipient.id) {
                sqlx::query("UPDATE recipients SET position = ?, address = ? WHERE id = ?")
                    .bind(position as i64)
                    .bind(&recipient.address)
                    .bind(recipient.id)
                    .execute(&mut **tx)
                    .await?;
            } else {
                Self::insert_recipient(tx, schedule_id, position, recipient).await?;
            }
        }
        Ok(())
    }
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    let state: String = row.try_get("state")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        keyword: row.try_get("keyword")?,
        cron_expression: row.try_get("cron_expression")?,
        sources: Vec::new(),
        recipients: Vec::new(),
        state: ScheduleState::from_str(&state)?,
        created_at: row.try_get("created_at")?,
    })
}

fn source_from_row(row: &SqliteRow) -> Result<SourceFilter> {
    let sort: String = row.try_get("sort")?;
    Ok(SourceFilter {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        sort: SortOrder::from_str(&sort).unwrap_or_default(),
        include_nsfw: row.try_get("include_nsfw")?,
        restrict_to_source: row.try_get("restrict_to_source")?,
        cursor: row.try_get("cursor")?,
        pending_cursor: row.try_get("pending_cursor")?,
    })
}

fn recipient_from_row(row: &SqliteRow) -> Result<Recipient> {
    Ok(Recipient {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
    })
}

fn queued_post_from_row(row: &SqliteRow) -> Result<QueuedPost> {
    let payload: String = row.try_get("payload")?;
    let post: Post = serde_json::from_str(&payload)?;
    let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
    Ok(QueuedPost {
        id: row.try_get("id")?,
        schedule_id: row.try_get("schedule_id")?,
        source_id: row.try_get("source_id")?,
        post,
        enqueued_at,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_configuration_and_cursors(&self, schedule_id: Uuid) -> Result<Schedule> {
        let schedule = self.fetch_schedule(schedule_id).await?;
        if schedule.state != ScheduleState::Active {
            return Err(AppError::not_found(format!(
                "schedule {schedule_id} is not active"
            )));
        }
        Ok(schedule)
    }

    async fn enqueue_posts(&self, schedule_id: Uuid, posts: &[QueuedPost]) -> Result<usize> {
        if posts.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for item in posts {
            let payload = serde_json::to_string(&item.post)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO queued_posts \
                 (id, schedule_id, source_id, post_id, payload, created_utc, enqueued_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(item.id)
            .bind(schedule_id)
            .bind(item.source_id)
            .bind(&item.post.id)
            .bind(payload)
            .bind(item.post.created_utc as i64)
            .bind(item.enqueued_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_pending_cursor(&self, source_id: Uuid, cursor: &str) -> Result<()> {
        sqlx::query("UPDATE sources SET pending_cursor = ? WHERE id = ?")
            .bind(cursor)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn queued_posts(&self, schedule_id: Uuid) -> Result<Vec<QueuedPost>> {
        sqlx::query(
            "SELECT id, schedule_id, source_id, payload, enqueued_at FROM queued_posts \
             WHERE schedule_id = ? ORDER BY created_utc, enqueued_at",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(queued_post_from_row)
        .collect()
    }

    async fn advance_cursors_and_drain_queue(
        &self,
        schedule_id: Uuid,
        advances: &[CursorAdvance],
        delivered: &[Uuid],
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for advance in advances {
            sqlx::query(
                "UPDATE sources SET cursor = ?, pending_cursor = NULL, cursor_updated_at = ? \
                 WHERE id = ? AND schedule_id = ?",
            )
            .bind(&advance.cursor)
            .bind(now)
            .bind(advance.source_id)
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?;
        }

        for id in delivered {
            sqlx::query("DELETE FROM queued_posts WHERE id = ? AND schedule_id = ?")
                .bind(id)
                .bind(schedule_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO schedules (id, keyword, cron_expression, state, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(schedule.id)
        .bind(&schedule.keyword)
        .bind(&schedule.cron_expression)
        .bind(schedule.state.as_str())
        .bind(schedule.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, source) in schedule.sources.iter().enumerate() {
            Self::insert_source(&mut tx, schedule.id, position, source).await?;
        }
        for (position, recipient) in schedule.recipients.iter().enumerate() {
            Self::insert_recipient(&mut tx, schedule.id, position, recipient).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn claim_run(&self, schedule_id: Uuid, claim: Uuid, lease: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let expired_before = now.saturating_sub(lease_ms);

        let result = sqlx::query(
            "UPDATE schedules SET run_claim = ?, run_started_at = ? \
             WHERE id = ? AND state = ? \
             AND (run_claim IS NULL OR run_started_at IS NULL OR run_started_at <= ?)",
        )
        .bind(claim)
        .bind(now)
        .bind(schedule_id)
        .bind(ScheduleState::Active.as_str())
        .bind(expired_before)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Zero rows: either the lease is held or the schedule cannot run.
        let schedule = self.fetch_schedule(schedule_id).await?;
        if schedule.state != ScheduleState::Active {
            return Err(AppError::not_found(format!(
                "schedule {schedule_id} is not active"
            )));
        }
        Ok(false)
    }

    async fn release_run(&self, schedule_id: Uuid, claim: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE schedules SET run_claim = NULL, run_started_at = NULL \
             WHERE id = ? AND run_claim = ?",
        )
        .bind(schedule_id)
        .bind(claim)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_active(&self, schedule_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE schedules SET state = ? WHERE id = ?")
            .bind(ScheduleState::Active.as_str())
            .bind(schedule_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("schedule {schedule_id}")));
        }
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule> {
        self.fetch_schedule(schedule_id).await
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE schedules SET keyword = ?, cron_expression = ? WHERE id = ?")
                .bind(&schedule.keyword)
                .bind(&schedule.cron_expression)
                .bind(schedule.id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("schedule {}", schedule.id)));
        }

        Self::sync_sources(&mut tx, schedule.id, &schedule.sources).await?;
        Self::sync_recipients(&mut tx, schedule.id, &schedule.recipients).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(schedule_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("schedule {schedule_id}")));
        }
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = sqlx::query(
            "SELECT id, keyword, cron_expression, state, created_at FROM schedules \
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(schedule_from_row)
        .collect::<Result<_>>()?;

        let mut sources: HashMap<Uuid, Vec<SourceFilter>> = HashMap::new();
        let query = format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY position");
        for row in sqlx::query(&query).fetch_all(&self.pool).await? {
            let schedule_id: Uuid = row.try_get("schedule_id")?;
            sources
                .entry(schedule_id)
                .or_default()
                .push(source_from_row(&row)?);
        }

        let mut recipients: HashMap<Uuid, Vec<Recipient>> = HashMap::new();
        for row in sqlx::query("SELECT id, schedule_id, address FROM recipients ORDER BY position")
            .fetch_all(&self.pool)
            .await?
        {
            let schedule_id: Uuid = row.try_get("schedule_id")?;
            recipients
                .entry(schedule_id)
                .or_default()
                .push(recipient_from_row(&row)?);
        }

        for schedule in &mut schedules {
            schedule.sources = sources.remove(&schedule.id).unwrap_or_default();
            schedule.recipients = recipients.remove(&schedule.id).unwrap_or_default();
        }
        Ok(schedules)
    }
}
