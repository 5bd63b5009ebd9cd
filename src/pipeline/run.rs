// src/pipeline/run.rs

//! One scheduled run: load → fetch all sources → render → notify → commit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::pipeline::aggregate::{DigestBatch, fetch_all_sources};
use crate::pipeline::backoff::{RateLimitPolicy, RetryPolicy};
use crate::pipeline::commit::{CommitProtocol, CommitReport};
use crate::pipeline::fetch::Fetcher;
use crate::services::{Mailer, PostProvider, digest};
use crate::storage::Store;
use crate::trigger::RunHandle;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub schedule_id: Uuid,
    pub sources: usize,
    /// Posts newly queued by this run's fetches
    pub fetched: usize,
    /// Posts included in the digest (may include ones left by failed runs)
    pub digested: usize,
    pub commit: CommitReport,
}

/// Slack on top of the run budget before a lease counts as abandoned.
const LEASE_GRACE: Duration = Duration::from_secs(60);

/// Executes runs for any schedule.
#[derive(Clone)]
pub struct DigestRunner {
    store: Arc<dyn Store>,
    fetcher: Fetcher,
    commit: CommitProtocol,
    concurrency: usize,
    subject_prefix: String,
    run_timeout: Duration,
}

impl DigestRunner {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        provider: Arc<dyn PostProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let fetcher = Fetcher::new(
            provider,
            Arc::clone(&store),
            RateLimitPolicy::from_config(&config.fetch),
            config.fetch.max_pages,
            Duration::from_secs(config.reddit.timeout_secs),
        );
        let commit = CommitProtocol::new(
            Arc::clone(&store),
            mailer,
            RetryPolicy::from_config(&config.notify),
            Duration::from_secs(config.notify.send_timeout_secs),
            RetryPolicy::for_commit(config.run.commit_attempts),
        );
        Self {
            store,
            fetcher,
            commit,
            concurrency: config.fetch.max_concurrent,
            subject_prefix: config.notify.subject_prefix.clone(),
            run_timeout: config.run.timeout(),
        }
    }

    /// Run the full pipeline for one schedule within the run budget.
    ///
    /// The schedule's run lease is held for the whole run, so a second run of
    /// the same schedule from any process fails with `RunInProgress`.
    pub async fn run(&self, schedule_id: Uuid, cancel: &CancellationToken) -> Result<RunReport> {
        log::info!("[{}] run started", schedule_id);
        let result = self.run_leased(schedule_id, cancel).await;

        match &result {
            Ok(report) => log::info!(
                "[{}] run completed: {} fetched, {} in digest, sent={}",
                schedule_id,
                report.fetched,
                report.digested,
                report.commit.sent
            ),
            Err(AppError::Cancelled) => log::warn!("[{}] run cancelled", schedule_id),
            Err(AppError::RunInProgress(_)) => {
                log::warn!("[{}] another run holds the schedule, skipping", schedule_id)
            }
            Err(e) => log::error!("[{}] run failed: {}", schedule_id, e),
        }
        result
    }

    async fn run_leased(&self, schedule_id: Uuid, cancel: &CancellationToken) -> Result<RunReport> {
        let claim = Uuid::now_v7();
        let lease = self.run_timeout.saturating_add(LEASE_GRACE);
        if !self.store.claim_run(schedule_id, claim, lease).await? {
            return Err(AppError::RunInProgress(schedule_id));
        }

        let result = tokio::time::timeout(self.run_timeout, self.execute(schedule_id, cancel))
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "run for schedule {schedule_id} exceeded {:?}",
                    self.run_timeout
                ))
            })
            .and_then(|inner| inner);

        if let Err(e) = self.store.release_run(schedule_id, claim).await {
            log::warn!("[{}] failed to release run lease: {}", schedule_id, e);
        }
        result
    }

    async fn execute(&self, schedule_id: Uuid, cancel: &CancellationToken) -> Result<RunReport> {
        let schedule = self.store.load_configuration_and_cursors(schedule_id).await?;

        let outcomes =
            fetch_all_sources(&self.fetcher, &schedule, self.concurrency, cancel).await?;
        let fetched = outcomes.iter().map(|o| o.queued).sum();

        let queued = self.store.queued_posts(schedule_id).await?;
        let batch = DigestBatch::new(queued, &outcomes);
        if batch.is_empty() {
            log::info!("[{}] nothing new, skipping notification", schedule_id);
            return Ok(RunReport {
                schedule_id,
                sources: outcomes.len(),
                fetched,
                digested: 0,
                commit: CommitReport::default(),
            });
        }

        let digest = digest::render(&self.subject_prefix, &schedule.keyword, &batch.posts());
        let commit = self.commit.commit(&schedule, &batch, &digest, cancel).await?;

        Ok(RunReport {
            schedule_id,
            sources: outcomes.len(),
            fetched,
            digested: batch.queued.len(),
            commit,
        })
    }
}

#[async_trait]
impl RunHandle for DigestRunner {
    async fn fire(&self, schedule_id: Uuid, cancel: &CancellationToken) -> Result<()> {
        self.run(schedule_id, cancel).await.map(|_| ())
    }
}
