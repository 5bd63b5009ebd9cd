// src/services/schedules.rs

//! Schedule lifecycle manager.
//!
//! Keeps the stored configuration and the trigger registration of a schedule
//! consistent. Creation is two-phase: the row is written as `pending`, the
//! trigger is registered, then the row is marked `active`. A failure in
//! between is compensated; a failed compensation is reported as `DualWrite`
//! and healed by `reconcile` at the next startup.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Schedule, ScheduleDetails, ScheduleInput, ScheduleState};
use crate::storage::Store;
use crate::trigger::TriggerService;

/// Outcome of a startup reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: usize,
    pub removed_pending: usize,
    pub failed: usize,
}

/// Create/get/update/delete/list over store and trigger service.
#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn Store>,
    trigger: Arc<dyn TriggerService>,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn Store>, trigger: Arc<dyn TriggerService>) -> Self {
        Self { store, trigger }
    }

    /// Validate, persist, and register a new schedule. Returns its id.
    pub async fn create(&self, input: ScheduleInput) -> Result<Uuid> {
        let schedule = input.into_schedule()?;
        let id = schedule.id;
        self.store.create_schedule(&schedule).await?;

        if let Err(error) = self
            .trigger
            .register_periodic(id, &schedule.cron_expression)
            .await
        {
            log::warn!("[{}] trigger registration failed, rolling back: {}", id, error);
            if let Err(rollback) = self.store.delete_schedule(id).await {
                return Err(AppError::dual_write(format!(
                    "schedule {id} stored as pending but never registered \
                     ({error}); rollback failed: {rollback}"
                )));
            }
            return Err(error);
        }

        if let Err(error) = self.store.mark_active(id).await {
            log::warn!("[{}] activation failed, unregistering: {}", id, error);
            if let Err(rollback) = self.trigger.unregister(id).await {
                return Err(AppError::dual_write(format!(
                    "schedule {id} registered but left pending ({error}); \
                     unregister failed: {rollback}"
                )));
            }
            return Err(error);
        }

        log::info!(
            "[{}] schedule created for '{}' ({} sources, {} recipients)",
            id,
            schedule.keyword,
            schedule.sources.len(),
            schedule.recipients.len()
        );
        Ok(id)
    }

    /// Stored configuration merged with live trigger status.
    pub async fn get(&self, id: Uuid) -> Result<ScheduleDetails> {
        let schedule = self.active_schedule(id).await?;
        let description = match self.trigger.describe(id).await {
            Ok(description) => description,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::dual_write(format!(
                    "schedule {id} is stored but has no trigger registration"
                )));
            }
            Err(error) => return Err(error),
        };

        Ok(ScheduleDetails {
            schedule,
            paused: description.paused,
            next_fire_times: description.next_fire_times,
            last_run_status: description.last_run_status,
        })
    }

    /// Replace configuration, then push the cron expression to the trigger.
    pub async fn update(&self, id: Uuid, input: ScheduleInput) -> Result<()> {
        input.validate()?;
        let current = self.active_schedule(id).await?;
        Self::check_owned_ids(&current, &input)?;
        let schedule = input.into_schedule_with_id(id)?;
        self.store.update_schedule(&schedule).await?;

        self.trigger
            .update_cron(id, &schedule.cron_expression)
            .await
            .map_err(|error| {
                AppError::dual_write(format!(
                    "schedule {id} saved but trigger still uses the old timing: {error}"
                ))
            })?;

        log::info!("[{}] schedule updated", id);
        Ok(())
    }

    /// Unregister the trigger, then delete the stored schedule.
    ///
    /// A run already in flight is not cancelled.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.get_schedule(id).await?;

        match self.trigger.unregister(id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                log::warn!("[{}] no trigger registered, deleting stored schedule", id);
            }
            Err(error) => return Err(error),
        }

        self.store.delete_schedule(id).await.map_err(|error| {
            AppError::dual_write(format!(
                "trigger for schedule {id} removed but stored schedule remains: {error}"
            ))
        })?;

        log::info!("[{}] schedule deleted", id);
        Ok(())
    }

    /// All active schedules, newest first.
    pub async fn list(&self) -> Result<Vec<Schedule>> {
        let schedules = self.store.list_schedules().await?;
        Ok(schedules
            .into_iter()
            .filter(|s| s.state == ScheduleState::Active)
            .collect())
    }

    /// Register every active schedule and drop half-created ones.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for schedule in self.store.list_schedules().await? {
            let result = match schedule.state {
                ScheduleState::Pending => self
                    .store
                    .delete_schedule(schedule.id)
                    .await
                    .map(|()| report.removed_pending += 1),
                ScheduleState::Active => self
                    .trigger
                    .register_periodic(schedule.id, &schedule.cron_expression)
                    .await
                    .map(|()| report.registered += 1),
            };
            if let Err(error) = result {
                report.failed += 1;
                log::error!("[{}] reconciliation failed: {}", schedule.id, error);
            }
        }

        log::info!(
            "Reconciled schedules: {} registered, {} pending removed, {} failed",
            report.registered,
            report.removed_pending,
            report.failed
        );
        Ok(report)
    }

    /// Ids in an update must name sources and recipients of that schedule.
    fn check_owned_ids(current: &Schedule, input: &ScheduleInput) -> Result<()> {
        let sources: HashSet<Uuid> = current.sources.iter().map(|s| s.id).collect();
        if let Some(foreign) = input
            .sources
            .iter()
            .filter_map(|s| s.id)
            .find(|source_id| !sources.contains(source_id))
        {
            return Err(AppError::validation(format!(
                "source {foreign} does not belong to schedule {}",
                current.id
            )));
        }

        let recipients: HashSet<Uuid> = current.recipients.iter().map(|r| r.id).collect();
        if let Some(foreign) = input
            .recipients
            .iter()
            .filter_map(|r| r.id)
            .find(|recipient_id| !recipients.contains(recipient_id))
        {
            return Err(AppError::validation(format!(
                "recipient {foreign} does not belong to schedule {}",
                current.id
            )));
        }
        Ok(())
    }

    async fn active_schedule(&self, id: Uuid) -> Result<Schedule> {
        let schedule = self.store.get_schedule(id).await?;
        if schedule.state != ScheduleState::Active {
            return Err(AppError::not_found(format!("schedule {id}")));
        }
        Ok(schedule)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::models::{RecipientInput, RunStatus, SourceInput, TriggerDescription};
    use crate::storage::SqliteStore;

    /// In-memory trigger service with switchable failures.
    #[derive(Default)]
    pub struct FakeTrigger {
        pub crons: Mutex<HashMap<Uuid, String>>,
        pub fail_register: bool,
        pub fail_update: bool,
    }

    #[async_trait]
    impl TriggerService for FakeTrigger {
        async fn register_periodic(&self, id: Uuid, cron_expression: &str) -> Result<()> {
            if self.fail_register {
                return Err(AppError::trigger("scheduler unavailable"));
            }
            self.crons
                .lock()
                .unwrap()
                .insert(id, cron_expression.to_string());
            Ok(())
        }

        async fn describe(&self, id: Uuid) -> Result<TriggerDescription> {
            if !self.crons.lock().unwrap().contains_key(&id) {
                return Err(AppError::not_found("trigger"));
            }
            Ok(TriggerDescription {
                paused: false,
                next_fire_times: vec![Utc::now()],
                last_run_status: RunStatus::Completed,
            })
        }

        async fn update_cron(&self, id: Uuid, cron_expression: &str) -> Result<()> {
            if self.fail_update {
                return Err(AppError::trigger("scheduler unavailable"));
            }
            match self.crons.lock().unwrap().get_mut(&id) {
                Some(cron) => {
                    *cron = cron_expression.to_string();
                    Ok(())
                }
                None => Err(AppError::not_found("trigger")),
            }
        }

        async fn unregister(&self, id: Uuid) -> Result<()> {
            self.crons
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| AppError::not_found("trigger"))
        }
    }

    pub fn input() -> ScheduleInput {
        ScheduleInput {
            keyword: "rust".into(),
            cron_expression: "0 * * * *".into(),
            sources: vec![SourceInput {
                id: None,
                name: "r/golang".into(),
                sort: Some("new".into()),
                include_nsfw: false,
                restrict_to_source: true,
            }],
            recipients: vec![RecipientInput {
                id: None,
                address: "dev@example.com".into(),
            }],
        }
    }

    async fn service(
        trigger: FakeTrigger,
    ) -> (ScheduleService, Arc<SqliteStore>, Arc<FakeTrigger>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let trigger = Arc::new(trigger);
        (
            ScheduleService::new(store.clone(), trigger.clone()),
            store,
            trigger,
        )
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let (service, _, trigger) = service(FakeTrigger::default()).await;
        let id = service.create(input()).await.unwrap();

        let details = service.get(id).await.unwrap();
        assert_eq!(details.schedule.keyword, "rust");
        assert_eq!(details.schedule.cron_expression, "0 * * * *");
        assert_eq!(details.schedule.sources[0].name, "golang");
        assert_eq!(details.schedule.recipients[0].address, "dev@example.com");
        assert_eq!(details.last_run_status, RunStatus::Completed);
        assert_eq!(details.next_fire_times.len(), 1);
        assert_eq!(
            trigger.crons.lock().unwrap().get(&id).map(String::as_str),
            Some("0 * * * *")
        );
    }

    #[tokio::test]
    async fn test_invalid_input_writes_nothing() {
        let (service, store, _) = service(FakeTrigger::default()).await;
        let mut bad = input();
        bad.recipients.clear();

        assert!(matches!(
            service.create(bad).await,
            Err(AppError::Validation(_))
        ));
        assert!(store.list_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_rolls_back() {
        let (service, store, _) = service(FakeTrigger {
            fail_register: true,
            ..FakeTrigger::default()
        })
        .await;

        assert!(matches!(
            service.create(input()).await,
            Err(AppError::Trigger(_))
        ));
        assert!(store.list_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_pushes_cron() {
        let (service, _, trigger) = service(FakeTrigger::default()).await;
        let id = service.create(input()).await.unwrap();

        let mut changed = input();
        changed.cron_expression = "*/15 * * * *".into();
        changed.keyword = "tokio".into();
        service.update(id, changed).await.unwrap();

        assert_eq!(service.get(id).await.unwrap().schedule.keyword, "tokio");
        assert_eq!(
            trigger.crons.lock().unwrap().get(&id).map(String::as_str),
            Some("*/15 * * * *")
        );
    }

    #[tokio::test]
    async fn test_update_rejects_ids_of_another_schedule() {
        let (service, store, _) = service(FakeTrigger::default()).await;
        let first = service.create(input()).await.unwrap();
        let second = service.create(input()).await.unwrap();
        let other = store.get_schedule(second).await.unwrap();

        let mut stolen_source = input();
        stolen_source.sources[0].id = Some(other.sources[0].id);
        assert!(matches!(
            service.update(first, stolen_source).await,
            Err(AppError::Validation(_))
        ));

        let mut stolen_recipient = input();
        stolen_recipient.recipients[0].id = Some(other.recipients[0].id);
        assert!(matches!(
            service.update(first, stolen_recipient).await,
            Err(AppError::Validation(_))
        ));

        let mut unknown = input();
        unknown.sources[0].id = Some(Uuid::now_v7());
        assert!(matches!(
            service.update(first, unknown).await,
            Err(AppError::Validation(_))
        ));

        // Both schedules are untouched.
        let reloaded = store.get_schedule(second).await.unwrap();
        assert_eq!(reloaded.sources, other.sources);
        assert_eq!(reloaded.recipients, other.recipients);
        assert_eq!(store.get_schedule(first).await.unwrap().sources.len(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_own_ids() {
        let (service, store, _) = service(FakeTrigger::default()).await;
        let id = service.create(input()).await.unwrap();
        let before = store.get_schedule(id).await.unwrap();

        let mut changed = input();
        changed.keyword = "tokio".into();
        changed.sources[0].id = Some(before.sources[0].id);
        changed.recipients[0].id = Some(before.recipients[0].id);
        service.update(id, changed).await.unwrap();

        let after = store.get_schedule(id).await.unwrap();
        assert_eq!(after.keyword, "tokio");
        assert_eq!(after.sources[0].id, before.sources[0].id);
        assert_eq!(after.recipients[0].id, before.recipients[0].id);
    }

    #[tokio::test]
    async fn test_update_trigger_failure_is_dual_write() {
        let (service, _, _) = service(FakeTrigger {
            fail_update: true,
            ..FakeTrigger::default()
        })
        .await;
        let id = service.create(input()).await.unwrap();

        assert!(matches!(
            service.update(id, input()).await,
            Err(AppError::DualWrite(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_unregisters_and_removes() {
        let (service, _, trigger) = service(FakeTrigger::default()).await;
        let id = service.create(input()).await.unwrap();

        service.delete(id).await.unwrap();
        assert!(trigger.crons.lock().unwrap().is_empty());
        assert!(matches!(service.get(id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            service.delete(id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_without_trigger_is_dual_write() {
        let (service, _, trigger) = service(FakeTrigger::default()).await;
        let id = service.create(input()).await.unwrap();
        trigger.crons.lock().unwrap().clear();

        assert!(matches!(service.get(id).await, Err(AppError::DualWrite(_))));
    }

    #[tokio::test]
    async fn test_reconcile_registers_active_and_drops_pending() {
        let (service, store, trigger) = service(FakeTrigger::default()).await;
        let active = service.create(input()).await.unwrap();
        let pending = input().into_schedule().unwrap();
        store.create_schedule(&pending).await.unwrap();
        trigger.crons.lock().unwrap().clear();

        let report = service.reconcile().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                registered: 1,
                removed_pending: 1,
                failed: 0
            }
        );
        assert!(trigger.crons.lock().unwrap().contains_key(&active));
        let ids: Vec<_> = service.list().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![active]);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let (service, _, _) = service(FakeTrigger::default()).await;
        let first = service.create(input()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = service.create(input()).await.unwrap();

        let ids: Vec<_> = service.list().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second, first]);
    }
}
