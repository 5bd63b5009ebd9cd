// src/trigger/single_flight.rs

//! Per-schedule single-flight guard and last-run bookkeeping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::RunStatus;

/// Tracks which schedules are running and how their last run ended.
#[derive(Debug, Default)]
pub struct RunRegistry {
    statuses: Mutex<HashMap<Uuid, RunStatus>>,
}

impl RunRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunStatus>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the schedule for a run, or fail with `RunInProgress`.
    pub fn try_begin(self: &Arc<Self>, schedule_id: Uuid) -> Result<RunGuard> {
        let mut statuses = self.lock();
        let previous = statuses.get(&schedule_id).copied().unwrap_or_default();
        if previous == RunStatus::Running {
            return Err(AppError::RunInProgress(schedule_id));
        }
        statuses.insert(schedule_id, RunStatus::Running);
        Ok(RunGuard {
            registry: Arc::clone(self),
            schedule_id,
            previous,
            finished: false,
        })
    }

    /// Run `work` unless another run of the same schedule is in flight.
    ///
    /// When `work` itself reports `RunInProgress` (a run elsewhere holds the
    /// schedule), nothing ran here and the previous status is kept.
    pub async fn run_exclusive<T, F>(self: &Arc<Self>, schedule_id: Uuid, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.try_begin(schedule_id)?;
        let result = work.await;
        match &result {
            Err(AppError::RunInProgress(id)) if *id == schedule_id => guard.abandon(),
            _ => guard.finish(result.is_ok()),
        }
        result
    }

    /// Status of the most recent run, `None` if it never ran.
    pub fn status(&self, schedule_id: Uuid) -> RunStatus {
        self.lock().get(&schedule_id).copied().unwrap_or_default()
    }

    /// Drop bookkeeping for a deleted schedule.
    pub fn forget(&self, schedule_id: Uuid) {
        let mut statuses = self.lock();
        if statuses.get(&schedule_id) != Some(&RunStatus::Running) {
            statuses.remove(&schedule_id);
        }
    }

    fn set(&self, schedule_id: Uuid, status: RunStatus) {
        self.lock().insert(schedule_id, status);
    }
}

/// Held for the duration of a run. Dropping it unfinished records a failure.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    schedule_id: Uuid,
    previous: RunStatus,
    finished: bool,
}

impl RunGuard {
    pub fn finish(mut self, succeeded: bool) {
        let status = if succeeded {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.registry.set(self.schedule_id, status);
        self.finished = true;
    }

    /// Release the claim without recording a run.
    pub fn abandon(mut self) {
        self.registry.set(self.schedule_id, self.previous);
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.set(self.schedule_id, RunStatus::Failed);
        }
    }
}
