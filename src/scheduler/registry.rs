//! Schedule registry: keeps the `schedules` ledger and the scheduler store
//! in step.
//!
//! Registration is two-phase. The ledger row is written as `pending`, the
//! store entry is saved, then the row is committed. A crash in between
//! leaves a pending row that `reconcile_pending` resolves on the next start:
//! committed if the store entry made it, removed otherwise.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{ScheduleError, SchedulerEntry, SchedulerStore};
use crate::dispatch::QueueRoute;
use crate::models::{CrontabSpec, PeriodUnit, Schedule, ScheduleKind};
use crate::queue::{new_task_id, TaskBroker, TaskMessage, TaskPayload};
use crate::repository::{DbContext, NewScheduleSpec};

/// Outcome of a pending-row reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub committed: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct ScheduleRegistry {
    ctx: DbContext,
    store: Arc<dyn SchedulerStore>,
}

impl ScheduleRegistry {
    pub fn new(ctx: DbContext, store: Arc<dyn SchedulerStore>) -> Self {
        Self { ctx, store }
    }

    pub fn store(&self) -> &Arc<dyn SchedulerStore> {
        &self.store
    }

    /// Save an interval entry carrying explicit queue routing.
    pub async fn create_interval(
        &self,
        name: &str,
        task: TaskPayload,
        every: u32,
        period: PeriodUnit,
        queue: &str,
        routing_key: &str,
    ) -> Result<SchedulerEntry, ScheduleError> {
        let kind = ScheduleKind::Interval { every, period };
        validate_kind(&kind)?;
        let entry = SchedulerEntry::new(name, task, kind, queue, routing_key, Utc::now());
        self.store.save(&entry).await?;
        Ok(entry)
    }

    /// Save a crontab entry carrying explicit queue routing.
    pub async fn create_crontab(
        &self,
        name: &str,
        task: TaskPayload,
        crontab: &CrontabSpec,
        queue: &str,
        routing_key: &str,
    ) -> Result<SchedulerEntry, ScheduleError> {
        let kind = ScheduleKind::Crontab(crontab.clone());
        validate_kind(&kind)?;
        let entry = SchedulerEntry::new(name, task, kind, queue, routing_key, Utc::now());
        self.store.save(&entry).await?;
        Ok(entry)
    }

    /// Register a schedule in both stores.
    pub async fn register(
        &self,
        spec: &NewScheduleSpec,
        route: &QueueRoute,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleError> {
        validate_kind(&spec.kind)?;

        let schedule = self.ctx.schedules().insert_pending(spec, now).await?;
        let name = schedule.entry_name();

        let mut entry = SchedulerEntry::new(
            &name,
            TaskPayload::ScheduledExtract {
                schedule_id: schedule.id,
            },
            schedule.kind.clone(),
            route.queue,
            route.routing_key,
            now,
        );
        entry.on_data_ready = schedule.on_data_ready;

        let written = match self.store.save(&entry).await {
            Ok(()) => self.ctx.schedules().commit(schedule.id).await.map_err(ScheduleError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            tracing::error!(schedule_id = schedule.id, "schedule registration failed: {}", e);
            self.roll_back(schedule.id, &name).await;
            return Err(e);
        }

        tracing::info!(
            schedule_id = schedule.id,
            entry = %name,
            queue = route.queue,
            "schedule registered"
        );

        self.ctx
            .schedules()
            .get(schedule.id)
            .await?
            .ok_or(ScheduleError::Database(diesel::result::Error::NotFound))
    }

    /// Undo a half-finished registration. Anything left behind stays
    /// pending for `reconcile_pending`.
    async fn roll_back(&self, schedule_id: i32, name: &str) {
        if let Err(e) = self.store.delete(name).await {
            tracing::warn!(schedule_id, "could not remove scheduler entry: {}", e);
            return;
        }
        if let Err(e) = self.ctx.schedules().delete(schedule_id).await {
            tracing::warn!(schedule_id, "could not remove pending schedule: {}", e);
        }
    }

    /// Enable or disable a schedule on both sides. Returns false if the
    /// schedule does not exist.
    pub async fn set_enabled(&self, schedule: &Schedule, enabled: bool) -> Result<bool, ScheduleError> {
        if !self.ctx.schedules().set_enabled(schedule.id, enabled).await? {
            return Ok(false);
        }
        match self.store.get(&schedule.entry_name()).await? {
            Some(mut entry) => {
                entry.enabled = enabled;
                self.store.save(&entry).await?;
            }
            None => {
                tracing::warn!(schedule_id = schedule.id, "no scheduler entry to update");
            }
        }
        Ok(true)
    }

    /// Remove a schedule from the store, then from the ledger.
    pub async fn delete(&self, schedule: &Schedule) -> Result<bool, ScheduleError> {
        self.store.delete(&schedule.entry_name()).await?;
        Ok(self.ctx.schedules().delete(schedule.id).await?)
    }

    /// Resolve pending ledger rows left by interrupted registrations.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, ScheduleError> {
        let mut report = ReconcileReport::default();

        for schedule in self.ctx.schedules().list_pending().await? {
            if self.store.get(&schedule.entry_name()).await?.is_some() {
                self.ctx.schedules().commit(schedule.id).await?;
                report.committed += 1;
            } else {
                self.ctx.schedules().delete(schedule.id).await?;
                report.removed += 1;
            }
        }

        if report != ReconcileReport::default() {
            tracing::info!(
                committed = report.committed,
                removed = report.removed,
                "pending schedules reconciled"
            );
        }
        Ok(report)
    }

    /// Enqueue every enabled data-ready schedule that covers `dataset`.
    pub async fn trigger_data_ready(
        &self,
        dataset: &str,
        broker: &dyn TaskBroker,
    ) -> Result<usize, ScheduleError> {
        let mut fired = 0;

        for schedule in self.ctx.schedules().list_data_ready_for(dataset).await? {
            let Some(entry) = self.store.get(&schedule.entry_name()).await? else {
                tracing::warn!(schedule_id = schedule.id, "data-ready schedule has no scheduler entry");
                continue;
            };
            let task = TaskMessage::new(
                new_task_id(),
                &entry.options.queue,
                &entry.options.routing_key,
                entry.payload.clone(),
            );
            broker.enqueue(&task).await?;
            fired += 1;
        }

        tracing::info!(dataset, fired, "data-ready notification processed");
        Ok(fired)
    }
}

fn validate_kind(kind: &ScheduleKind) -> Result<(), ScheduleError> {
    match kind {
        ScheduleKind::Interval { every, period } => period
            .duration(*every)
            .map(|_| ())
            .ok_or(ScheduleError::InvalidInterval),
        ScheduleKind::Crontab(tab) => tab
            .parse()
            .map(|_| ())
            .map_err(|e| ScheduleError::InvalidCrontab(e.to_string())),
    }
}
