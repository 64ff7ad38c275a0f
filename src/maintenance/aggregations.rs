//! Aggregation pruner.
//!
//! The aggregation store is a secondary time-series database of per-dataset
//! message counts. The pruner deletes rows older than the retention window.
//! On failure it mails the support address instead of retrying.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};

use super::{Mailer, MaintenanceError};
use crate::repository::{format_datetime, DbError, DbPool};
use crate::schema::aggregations;

#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Delete every record with a reference time before `cutoff`. Returns
    /// the number removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MaintenanceError>;
}

/// Aggregations kept in their own SQLite file.
#[derive(Clone)]
pub struct SqliteAggregationStore {
    pool: DbPool,
}

impl SqliteAggregationStore {
    pub fn new(url: &str) -> Self {
        Self {
            pool: DbPool::new(url),
        }
    }

    pub async fn init(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS aggregations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset TEXT NOT NULL,
                reftime TEXT NOT NULL,
                count BIGINT NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_aggregations_reftime ON aggregations(reftime);
            "#,
        )
        .await
    }

    /// Record a message count for a dataset at a reference time.
    pub async fn record(
        &self,
        dataset: &str,
        reftime: DateTime<Utc>,
        count: i64,
    ) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(aggregations::table)
            .values((
                aggregations::dataset.eq(dataset),
                aggregations::reftime.eq(format_datetime(reftime)),
                aggregations::count.eq(count),
                aggregations::created_at.eq(format_datetime(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;
        aggregations::table.count().get_result(&mut conn).await
    }
}

#[async_trait]
impl AggregationStore for SqliteAggregationStore {
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MaintenanceError> {
        let mut conn = self.pool.get().await?;

        // Fixed-width RFC 3339 text, so string order is time order.
        let removed = diesel::delete(
            aggregations::table.filter(aggregations::reftime.lt(format_datetime(cutoff))),
        )
        .execute(&mut conn)
        .await?;

        Ok(removed as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneSummary {
    pub removed: u64,
    pub cutoff: DateTime<Utc>,
}

impl fmt::Display for PruneSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "removed={} cutoff={}", self.removed, self.cutoff.to_rfc3339())
    }
}

pub struct AggregationPruner {
    store: Arc<dyn AggregationStore>,
    mailer: Arc<dyn Mailer>,
    support_email: Option<String>,
    retention_days: i64,
}

impl AggregationPruner {
    pub fn new(
        store: Arc<dyn AggregationStore>,
        mailer: Arc<dyn Mailer>,
        support_email: Option<String>,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            mailer,
            support_email,
            retention_days,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<PruneSummary, MaintenanceError> {
        let cutoff = now - Duration::days(self.retention_days);

        match self.store.prune_before(cutoff).await {
            Ok(removed) => Ok(PruneSummary { removed, cutoff }),
            Err(e) => {
                self.alert(&e, cutoff).await;
                Err(e)
            }
        }
    }

    async fn alert(&self, error: &MaintenanceError, cutoff: DateTime<Utc>) {
        let Some(to) = &self.support_email else {
            tracing::warn!("no support email configured, prune failure not mailed");
            return;
        };
        let body = format!(
            "Pruning aggregations older than {} failed.\n\nError: {}\n",
            cutoff.to_rfc3339(),
            error
        );
        if let Err(e) = self
            .mailer
            .send(to, "[meteodist] aggregation pruning failed", &body)
            .await
        {
            tracing::error!("failed to send prune alert: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::MailError;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl AggregationStore for BrokenStore {
        async fn prune_before(&self, _: DateTime<Utc>) -> Result<u64, MaintenanceError> {
            Err(MaintenanceError::Aggregation("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_prune_removes_old_rows() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("agg.db").display());
        let store = SqliteAggregationStore::new(&url);
        store.init().await.unwrap();

        let now = Utc::now();
        store.record("lm5", now - Duration::days(40), 10).await.unwrap();
        store.record("lm5", now - Duration::days(31), 10).await.unwrap();
        store.record("lm5", now - Duration::days(2), 10).await.unwrap();

        let mailer = Arc::new(RecordingMailer::default());
        let pruner = AggregationPruner::new(
            Arc::new(store.clone()),
            mailer.clone(),
            Some("ops@example.org".to_string()),
            30,
        );
        let summary = pruner.run(now).await.unwrap();
        assert_eq!(summary.removed, 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_sends_alert() {
        let mailer = Arc::new(RecordingMailer::default());
        let pruner = AggregationPruner::new(
            Arc::new(BrokenStore),
            mailer.clone(),
            Some("ops@example.org".to_string()),
            30,
        );

        assert!(pruner.run(Utc::now()).await.is_err());
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops@example.org");
    }
}
