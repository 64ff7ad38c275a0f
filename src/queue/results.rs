//! Result backend: the task-side record of how each task ended.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::BrokerError;
use crate::models::RequestStatus;
use crate::repository::models::TaskResultRecord;
use crate::repository::{format_datetime, parse_datetime_opt, DbPool};
use crate::schema::task_results;

/// State of a task as reported by the result backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub task_id: String,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub date_done: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Record the latest state of a task, replacing any earlier one.
    async fn store(
        &self,
        task_id: &str,
        status: &RequestStatus,
        error: Option<&str>,
    ) -> Result<(), BrokerError>;

    /// Current state of a task; unknown tasks report PENDING.
    async fn get(&self, task_id: &str) -> Result<TaskResult, BrokerError>;
}

#[derive(Clone)]
pub struct DbResultBackend {
    pool: DbPool,
}

impl DbResultBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultBackend for DbResultBackend {
    async fn store(
        &self,
        task_id: &str,
        status: &RequestStatus,
        error: Option<&str>,
    ) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await?;
        let date_done = status.is_terminal().then(|| format_datetime(Utc::now()));

        diesel::replace_into(task_results::table)
            .values((
                task_results::task_id.eq(task_id),
                task_results::status.eq(status.as_str()),
                task_results::error.eq(error),
                task_results::date_done.eq(date_done),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<TaskResult, BrokerError> {
        let mut conn = self.pool.get().await?;

        let record = task_results::table
            .filter(task_results::task_id.eq(task_id))
            .first::<TaskResultRecord>(&mut conn)
            .await
            .optional()?;

        Ok(match record {
            Some(r) => TaskResult {
                task_id: r.task_id,
                status: RequestStatus::from_str(&r.status),
                error: r.error,
                date_done: parse_datetime_opt(r.date_done),
            },
            None => TaskResult {
                task_id: task_id.to_string(),
                status: RequestStatus::Pending,
                error: None,
                date_done: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unknown_task_is_pending_and_store_overwrites() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let backend = DbResultBackend::new(ctx.pool().clone());

        let unknown = backend.get("nope").await.unwrap();
        assert_eq!(unknown.status, RequestStatus::Pending);

        backend
            .store("t", &RequestStatus::Started, None)
            .await
            .unwrap();
        assert!(backend.get("t").await.unwrap().date_done.is_none());

        backend
            .store("t", &RequestStatus::Failure, Some("extraction failed"))
            .await
            .unwrap();
        let result = backend.get("t").await.unwrap();
        assert_eq!(result.status, RequestStatus::Failure);
        assert_eq!(result.error.as_deref(), Some("extraction failed"));
        assert!(result.date_done.is_some());
    }
}
