//! Database-backed broker over the `task_queue` table.
//!
//! Claiming is optimistic: pick the oldest unclaimed row, then update it
//! guarded by `claimed_at IS NULL`. Losing the race to another worker
//! surfaces as `AlreadyClaimed` and the caller simply polls again.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::{BrokerError, TaskBroker, TaskMessage, TaskPayload};
use crate::repository::models::TaskQueueRecord;
use crate::repository::{format_datetime, parse_datetime, DbPool};
use crate::schema::task_queue;

#[derive(Clone)]
pub struct DbBroker {
    pool: DbPool,
}

impl DbBroker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of tasks waiting on a queue.
    pub async fn pending_count(&self, queue: &str) -> Result<i64, BrokerError> {
        let mut conn = self.pool.get().await?;

        let count = task_queue::table
            .filter(task_queue::queue.eq(queue))
            .filter(task_queue::claimed_at.is_null())
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(count)
    }

    /// Rows on a queue, claimed or not.
    pub async fn total_count(&self, queue: &str) -> Result<i64, BrokerError> {
        let mut conn = self.pool.get().await?;

        let count = task_queue::table
            .filter(task_queue::queue.eq(queue))
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(count)
    }
}

fn to_message(record: TaskQueueRecord) -> Result<TaskMessage, BrokerError> {
    let payload: TaskPayload = serde_json::from_str(&record.payload)?;
    Ok(TaskMessage {
        task_id: record.task_id,
        queue: record.queue,
        routing_key: record.routing_key,
        payload,
        enqueued_at: parse_datetime(&record.enqueued_at),
    })
}

#[async_trait]
impl TaskBroker for DbBroker {
    async fn enqueue(&self, task: &TaskMessage) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await?;
        let payload = serde_json::to_string(&task.payload)?;

        diesel::insert_into(task_queue::table)
            .values((
                task_queue::task_id.eq(&task.task_id),
                task_queue::task_name.eq(task.payload.task_name()),
                task_queue::queue.eq(&task.queue),
                task_queue::routing_key.eq(&task.routing_key),
                task_queue::payload.eq(&payload),
                task_queue::enqueued_at.eq(format_datetime(task.enqueued_at)),
            ))
            .execute(&mut conn)
            .await?;

        tracing::debug!(
            task_id = %task.task_id,
            queue = %task.queue,
            task = task.payload.task_name(),
            "task enqueued"
        );
        Ok(())
    }

    async fn claim(
        &self,
        queues: &[String],
        worker: &str,
    ) -> Result<Option<TaskMessage>, BrokerError> {
        if queues.is_empty() {
            return Ok(None);
        }
        let mut conn = self.pool.get().await?;

        let candidate = task_queue::table
            .filter(task_queue::queue.eq_any(queues))
            .filter(task_queue::claimed_at.is_null())
            .order(task_queue::enqueued_at.asc())
            .first::<TaskQueueRecord>(&mut conn)
            .await
            .optional()?;

        let Some(record) = candidate else {
            return Ok(None);
        };

        let claimed = diesel::update(
            task_queue::table
                .filter(task_queue::task_id.eq(&record.task_id))
                .filter(task_queue::claimed_at.is_null()),
        )
        .set((
            task_queue::claimed_at.eq(format_datetime(Utc::now())),
            task_queue::claimed_by.eq(worker),
        ))
        .execute(&mut conn)
        .await?;

        if claimed != 1 {
            return Err(BrokerError::AlreadyClaimed);
        }

        to_message(record).map(Some)
    }

    async fn complete(&self, task_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await?;

        diesel::delete(task_queue::table.filter(task_queue::task_id.eq(task_id)))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn revoke(&self, task_id: &str) -> Result<bool, BrokerError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(
            task_queue::table
                .filter(task_queue::task_id.eq(task_id))
                .filter(task_queue::claimed_at.is_null()),
        )
        .execute(&mut conn)
        .await?;

        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::new_task_id;
    use crate::repository::DbContext;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn broker() -> (DbBroker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (DbBroker::new(ctx.pool().clone()), dir)
    }

    #[tokio::test]
    async fn test_claim_oldest_first_and_only_once() {
        let (broker, _dir) = broker().await;

        let mut older = TaskMessage::new(
            new_task_id(),
            "archived_forecast",
            "archived_forecast",
            TaskPayload::DataExtract { request_id: 1 },
        );
        older.enqueued_at = Utc::now() - Duration::minutes(5);
        let newer = TaskMessage::new(
            new_task_id(),
            "archived_forecast",
            "archived_forecast",
            TaskPayload::ScheduledExtract { schedule_id: 9 },
        );
        broker.enqueue(&newer).await.unwrap();
        broker.enqueue(&older).await.unwrap();
        assert_eq!(broker.pending_count("archived_forecast").await.unwrap(), 2);

        let queues = vec!["archived_forecast".to_string()];
        let first = broker.claim(&queues, "w1").await.unwrap().unwrap();
        assert_eq!(first.task_id, older.task_id);
        assert_eq!(first.payload, TaskPayload::DataExtract { request_id: 1 });

        let second = broker.claim(&queues, "w2").await.unwrap().unwrap();
        assert_eq!(second.task_id, newer.task_id);
        assert!(broker.claim(&queues, "w1").await.unwrap().is_none());

        // Claimed tasks can no longer be revoked.
        assert!(!broker.revoke(&first.task_id).await.unwrap());
        broker.complete(&first.task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_queues_are_isolated_and_revocable() {
        let (broker, _dir) = broker().await;

        let task = TaskMessage::new(
            new_task_id(),
            "operational_radar",
            "operational_radar",
            TaskPayload::DataExtract { request_id: 3 },
        );
        broker.enqueue(&task).await.unwrap();

        let other = vec!["archived_radar".to_string()];
        assert!(broker.claim(&other, "w").await.unwrap().is_none());
        assert!(broker.claim(&[], "w").await.unwrap().is_none());

        assert!(broker.revoke(&task.task_id).await.unwrap());
        assert_eq!(broker.pending_count("operational_radar").await.unwrap(), 0);
    }
}
