// src/trigger/cron.rs

//! In-process cron trigger.
//!
//! Each registered schedule owns one scheduler job. Fires go through the
//! shared `RunRegistry`, so a fire that overlaps a still-running run of the
//! same schedule is skipped instead of started. Every fire is tracked, so
//! shutdown can wait for in-flight runs to finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::TriggerDescription;
use crate::trigger::{RunHandle, RunRegistry, TriggerService, scheduler_expression};

fn scheduler_error(error: JobSchedulerError) -> AppError {
    AppError::trigger(format!("{error:?}"))
}

/// `TriggerService` backed by `tokio-cron-scheduler`.
pub struct CronTrigger {
    scheduler: JobScheduler,
    /// schedule id → scheduler job id
    jobs: Mutex<HashMap<Uuid, Uuid>>,
    handle: Arc<dyn RunHandle>,
    runs: Arc<RunRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl CronTrigger {
    /// Create a stopped trigger; fires call `handle` and observe `shutdown`.
    pub async fn new(
        handle: Arc<dyn RunHandle>,
        runs: Arc<RunRegistry>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        Ok(Self {
            scheduler,
            jobs: Mutex::new(HashMap::new()),
            handle,
            runs,
            shutdown,
            tracker: TaskTracker::new(),
        })
    }

    /// Begin firing registered schedules.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await.map_err(scheduler_error)
    }

    /// Stop firing, then wait up to `grace` for in-flight runs.
    ///
    /// Runs still going when `grace` expires are abandoned with the process;
    /// their posts stay queued and their cursors uncommitted.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await.map_err(scheduler_error)?;

        self.tracker.close();
        if !self.tracker.is_empty() {
            log::info!("Waiting for {} in-flight run(s)", self.tracker.len());
        }
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            log::warn!(
                "{} run(s) still in flight after {:?}, abandoning",
                self.tracker.len(),
                grace
            );
        }
        Ok(())
    }

    fn build_job(&self, schedule_id: Uuid, cron_expression: &str) -> Result<Job> {
        let expression = scheduler_expression(cron_expression);
        let handle = Arc::clone(&self.handle);
        let runs = Arc::clone(&self.runs);
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();

        Job::new_async(expression.as_str(), move |_job_id, _scheduler| {
            let handle = Arc::clone(&handle);
            let runs = Arc::clone(&runs);
            let shutdown = shutdown.clone();
            Box::pin(tracker.track_future(async move {
                if shutdown.is_cancelled() {
                    return;
                }
                let fire = handle.fire(schedule_id, &shutdown);
                match runs.run_exclusive(schedule_id, fire).await {
                    Ok(()) => {}
                    Err(AppError::RunInProgress(_)) => {
                        log::warn!("[{}] previous run still in progress, fire skipped", schedule_id);
                    }
                    Err(e) => log::debug!("[{}] fire ended with error: {}", schedule_id, e),
                }
            }))
        })
        .map_err(|e| {
            AppError::validation(format!(
                "invalid cron expression '{cron_expression}': {e:?}"
            ))
        })
    }

    async fn replace_job(
        &self,
        jobs: &mut HashMap<Uuid, Uuid>,
        schedule_id: Uuid,
        cron_expression: &str,
    ) -> Result<()> {
        let job = self.build_job(schedule_id, cron_expression)?;
        if let Some(old) = jobs.remove(&schedule_id) {
            self.scheduler.remove(&old).await.map_err(scheduler_error)?;
        }
        let job_id = self.scheduler.add(job).await.map_err(scheduler_error)?;
        jobs.insert(schedule_id, job_id);
        Ok(())
    }
}

#[async_trait]
impl TriggerService for CronTrigger {
    async fn register_periodic(&self, schedule_id: Uuid, cron_expression: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        self.replace_job(&mut jobs, schedule_id, cron_expression)
            .await?;
        log::info!(
            "[{}] registered trigger on '{}'",
            schedule_id,
            cron_expression
        );
        Ok(())
    }

    async fn describe(&self, schedule_id: Uuid) -> Result<TriggerDescription> {
        let job_id = self
            .jobs
            .lock()
            .await
            .get(&schedule_id)
            .copied()
            .ok_or_else(|| AppError::not_found(format!("trigger for schedule {schedule_id}")))?;

        let mut scheduler = self.scheduler.clone();
        let next = scheduler
            .next_tick_for_job(job_id)
            .await
            .map_err(scheduler_error)?;

        Ok(TriggerDescription {
            paused: false,
            next_fire_times: next.into_iter().collect(),
            last_run_status: self.runs.status(schedule_id),
        })
    }

    async fn update_cron(&self, schedule_id: Uuid, cron_expression: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains_key(&schedule_id) {
            return Err(AppError::not_found(format!(
                "trigger for schedule {schedule_id}"
            )));
        }
        self.replace_job(&mut jobs, schedule_id, cron_expression)
            .await?;
        log::info!("[{}] trigger now fires on '{}'", schedule_id, cron_expression);
        Ok(())
    }

    async fn unregister(&self, schedule_id: Uuid) -> Result<()> {
        let job_id = self
            .jobs
            .lock()
            .await
            .remove(&schedule_id)
            .ok_or_else(|| AppError::not_found(format!("trigger for schedule {schedule_id}")))?;
        self.scheduler
            .remove(&job_id)
            .await
            .map_err(scheduler_error)?;
        self.runs.forget(schedule_id);
        log::info!("[{}] trigger unregistered", schedule_id);
        Ok(())
    }
}
