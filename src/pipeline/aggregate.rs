// src/pipeline/aggregate.rs

//! Fan-out/fan-in across the sources of one schedule.

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{CursorAdvance, Post, QueuedPost, Schedule};
use crate::pipeline::fetch::{FetchOutcome, Fetcher};

/// Posts and cursor moves to hand to the commit step.
#[derive(Debug, Clone, Default)]
pub struct DigestBatch {
    /// Queue entries in display order (oldest post first)
    pub queued: Vec<QueuedPost>,
    pub advances: Vec<CursorAdvance>,
}

impl DigestBatch {
    /// Combine the current queue with the cursors reached by every source.
    pub fn new(mut queued: Vec<QueuedPost>, outcomes: &[FetchOutcome]) -> Self {
        queued.sort_by(|a, b| {
            a.post
                .created_utc
                .total_cmp(&b.post.created_utc)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
        let advances = outcomes
            .iter()
            .filter(|outcome| outcome.advances())
            .filter_map(|outcome| {
                outcome.cursor.as_ref().map(|cursor| CursorAdvance {
                    source_id: outcome.source_id,
                    cursor: cursor.clone(),
                })
            })
            .collect();
        Self { queued, advances }
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.queued.iter().map(|q| q.post.clone()).collect()
    }

    pub fn queue_ids(&self) -> Vec<uuid::Uuid> {
        self.queued.iter().map(|q| q.id).collect()
    }
}

/// Run one fetcher per source with bounded parallelism and wait for all.
///
/// Any failed source fails the whole run. Cancellation wins over other errors.
pub async fn fetch_all_sources(
    fetcher: &Fetcher,
    schedule: &Schedule,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FetchOutcome>> {
    let total = schedule.sources.len();
    let mut results = stream::iter(schedule.sources.iter().cloned())
        .map(|source| async move {
            let result = fetcher
                .fetch_source(schedule.id, &schedule.keyword, &source, cancel)
                .await;
            (source, result)
        })
        .buffer_unordered(concurrency.max(1));

    let mut outcomes = Vec::with_capacity(total);
    let mut failures = Vec::new();
    while let Some((source, result)) = results.next().await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(error) => {
                log::warn!(
                    "[{}] r/{}: fetch failed: {}",
                    schedule.id,
                    source.name,
                    error
                );
                failures.push(error);
            }
        }
    }

    if failures.iter().any(|e| matches!(e, AppError::Cancelled)) {
        return Err(AppError::Cancelled);
    }
    let failed = failures.len();
    match failures.into_iter().next() {
        None => Ok(outcomes),
        Some(first) => Err(AppError::SourcesFailed {
            failed,
            total,
            first: Box::new(first),
        }),
    }
}
