//! Periodic trigger service.
//!
//! - `TriggerService`: register/describe/update/unregister periodic runs
//! - `CronTrigger`: in-process implementation on `tokio-cron-scheduler`
//! - `RunRegistry`: single-flight guard and last-run status per schedule

pub mod cron;
pub mod single_flight;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::models::TriggerDescription;

// Re-export for convenience
pub use cron::CronTrigger;
pub use single_flight::{RunGuard, RunRegistry};

/// What a trigger invokes when a schedule fires.
#[async_trait]
pub trait RunHandle: Send + Sync {
    async fn fire(&self, schedule_id: Uuid, cancel: &CancellationToken) -> Result<()>;
}

/// Owns fire-time bookkeeping for schedules.
#[async_trait]
pub trait TriggerService: Send + Sync {
    /// Start firing `schedule_id` on `cron_expression`.
    async fn register_periodic(&self, schedule_id: Uuid, cron_expression: &str) -> Result<()>;

    /// Live status: paused flag, upcoming fire times, last run classification.
    async fn describe(&self, schedule_id: Uuid) -> Result<TriggerDescription>;

    /// Replace the cron expression, discarding any other timing specification.
    async fn update_cron(&self, schedule_id: Uuid, cron_expression: &str) -> Result<()>;

    /// Stop firing `schedule_id`.
    async fn unregister(&self, schedule_id: Uuid) -> Result<()>;
}

/// Convert a 5-field cron expression to the seconds-first form the scheduler
/// expects. 6-field expressions pass through unchanged.
pub fn scheduler_expression(cron_expression: &str) -> String {
    let expression = cron_expression.trim();
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
