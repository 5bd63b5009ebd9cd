// src/pipeline/commit.rs

//! Notify-then-commit step of a run.
//!
//! ```text
//! send digest (retried, each attempt time-boxed)
//!     ├─ failed  → run fails, queue and cursors untouched
//!     └─ sent    → drain delivered posts + advance cursors (one transaction, retried)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::Schedule;
use crate::pipeline::aggregate::DigestBatch;
use crate::pipeline::backoff::RetryPolicy;
use crate::services::Mailer;
use crate::services::digest::Digest;
use crate::storage::Store;

/// What a successful commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    pub sent: bool,
    pub drained: usize,
    pub cursors_advanced: usize,
}

/// Orders notification delivery before queue drain and cursor advance.
#[derive(Clone)]
pub struct CommitProtocol {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    send_retry: RetryPolicy,
    send_timeout: Duration,
    commit_retry: RetryPolicy,
}

impl CommitProtocol {
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        send_retry: RetryPolicy,
        send_timeout: Duration,
        commit_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            mailer,
            send_retry,
            send_timeout,
            commit_retry,
        }
    }

    /// Deliver `digest` and, only once it is confirmed sent, commit `batch`.
    ///
    /// Cancellation is honored up to the send. After a successful send the
    /// commit always runs so that delivered posts are not sent again.
    pub async fn commit(
        &self,
        schedule: &Schedule,
        batch: &DigestBatch,
        digest: &Digest,
        cancel: &CancellationToken,
    ) -> Result<CommitReport> {
        if batch.is_empty() {
            return Ok(CommitReport::default());
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let addresses = schedule.addresses();
        let recipients = addresses.as_slice();
        self.send_retry
            .retry("digest delivery", || async move {
                tokio::time::timeout(
                    self.send_timeout,
                    self.mailer.send(recipients, &digest.subject, &digest.html),
                )
                .await
                .map_err(|_| {
                    AppError::timeout(format!("digest send exceeded {:?}", self.send_timeout))
                })?
            })
            .await
            .map_err(|e| match e {
                AppError::Notification(_) | AppError::Timeout(_) => e,
                other => AppError::notification(other),
            })?;

        log::info!(
            "[{}] digest with {} posts sent to {} recipients",
            schedule.id,
            batch.queued.len(),
            recipients.len()
        );

        let delivered = batch.queue_ids();
        let (advances, drained) = (batch.advances.as_slice(), delivered.as_slice());
        self.commit_retry
            .retry("queue drain and cursor advance", || {
                self.store
                    .advance_cursors_and_drain_queue(schedule.id, advances, drained)
            })
            .await
            .inspect_err(|e| {
                log::error!(
                    "[{}] digest was sent but commit failed; posts stay queued: {}",
                    schedule.id,
                    e
                );
            })?;

        Ok(CommitReport {
            sent: true,
            drained: delivered.len(),
            cursors_advanced: batch.advances.len(),
        })
    }
}
