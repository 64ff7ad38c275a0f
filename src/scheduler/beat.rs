//! Beat: fires due scheduler entries onto the broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{ScheduleError, SchedulerStore};
use crate::queue::{new_task_id, TaskBroker, TaskMessage};

pub struct Beat {
    store: Arc<dyn SchedulerStore>,
    broker: Arc<dyn TaskBroker>,
    interval: Duration,
}

impl Beat {
    pub fn new(store: Arc<dyn SchedulerStore>, broker: Arc<dyn TaskBroker>, interval: Duration) -> Self {
        Self {
            store,
            broker,
            interval,
        }
    }

    /// Evaluate every entry once and enqueue the due ones. Returns how many
    /// fired.
    ///
    /// Each listed entry is re-read right before firing, and only the run
    /// bookkeeping is written back, so a concurrent disable or delete is
    /// never overwritten.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, ScheduleError> {
        let mut fired = 0;

        for listed in self.store.list().await? {
            match listed.is_due(now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(entry = %listed.name, "skipping entry: {}", e);
                    continue;
                }
            }
            // The listing may be stale by now.
            let Some(entry) = self.store.get(&listed.name).await? else {
                continue;
            };
            if !entry.is_due(now).unwrap_or(false) {
                continue;
            }

            let task = TaskMessage::new(
                new_task_id(),
                &entry.options.queue,
                &entry.options.routing_key,
                entry.payload.clone(),
            );
            self.broker.enqueue(&task).await?;

            if !self.store.record_run(&entry.name, now).await? {
                tracing::warn!(
                    entry = %entry.name,
                    task_id = %task.task_id,
                    "entry removed while firing"
                );
            }

            tracing::info!(
                entry = %entry.name,
                task_id = %task.task_id,
                queue = %entry.options.queue,
                runs = entry.total_run_count + 1,
                "scheduled task sent"
            );
            fired += 1;
        }

        Ok(fired)
    }

    /// Tick forever.
    pub async fn run(&self) -> Result<(), ScheduleError> {
        tracing::info!(interval_secs = self.interval.as_secs(), "beat started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                tracing::error!("beat tick failed: {}", e);
            }
        }
    }
}
