//! Pending-task reconciler.
//!
//! Liveness net for tasks whose completion never reached the ledger. For
//! every non-terminal request the result backend is consulted: a terminal
//! failure or revocation there is mirrored into the request; anything else
//! is left alone until the request is older than the grace period, at which
//! point it is force-failed. Either way the request's queue row is dropped,
//! so a task claimed by a worker that died does not linger.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::MaintenanceError;
use crate::models::RequestStatus;
use crate::queue::{ResultBackend, TaskBroker};
use crate::repository::DbContext;

/// Error message stored on requests failed by the grace-period timeout.
pub const TIMEOUT_MESSAGE: &str = "task timed out: no result received within the grace period";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub mirrored: usize,
    pub timed_out: usize,
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} mirrored={} timed_out={}",
            self.checked, self.mirrored, self.timed_out
        )
    }
}

pub struct PendingReconciler {
    ctx: DbContext,
    broker: Arc<dyn TaskBroker>,
    results: Arc<dyn ResultBackend>,
    grace: Duration,
}

impl PendingReconciler {
    pub fn new(
        ctx: DbContext,
        broker: Arc<dyn TaskBroker>,
        results: Arc<dyn ResultBackend>,
        grace_days: i64,
    ) -> Self {
        Self {
            ctx,
            broker,
            results,
            grace: Duration::days(grace_days),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReconcileSummary, MaintenanceError> {
        let mut summary = ReconcileSummary::default();

        for request in self.ctx.requests().list_non_terminal().await? {
            summary.checked += 1;
            let result = self.results.get(&request.task_id).await?;

            if matches!(result.status, RequestStatus::Failure | RequestStatus::Revoked) {
                let error = result.error.as_deref();
                self.ctx
                    .requests()
                    .transition(request.id, &result.status, error, now)
                    .await?;
                self.broker.complete(&request.task_id).await?;
                tracing::info!(
                    request_id = request.id,
                    status = result.status.as_str(),
                    "mirrored backend state"
                );
                summary.mirrored += 1;
                continue;
            }

            if now - request.submission_date > self.grace {
                self.ctx
                    .requests()
                    .transition(request.id, &RequestStatus::Failure, Some(TIMEOUT_MESSAGE), now)
                    .await?;
                self.broker.complete(&request.task_id).await?;
                tracing::warn!(
                    request_id = request.id,
                    task_id = %request.task_id,
                    submitted = %request.submission_date,
                    "request timed out"
                );
                summary.timed_out += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestArgs;
    use crate::queue::{DbBroker, DbResultBackend, TaskMessage, TaskPayload};
    use crate::repository::{NewRequestSpec, UserSpec};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_grace_period_and_mirroring() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let user = ctx.users().create(&UserSpec::new("a@example.org", "A")).await.unwrap();
        let results = Arc::new(DbResultBackend::new(ctx.pool().clone()));
        let now = Utc::now();

        let submit = |task_id: &str, at: DateTime<Utc>| {
            let ctx = ctx.clone();
            let spec = NewRequestSpec {
                user_id: user.id,
                name: task_id.to_string(),
                args: RequestArgs::default(),
                task_id: task_id.to_string(),
                schedule_id: None,
            };
            async move { ctx.requests().create(&spec, at).await.unwrap() }
        };

        let stale = submit("stale", now - Duration::days(2) - Duration::seconds(1)).await;
        // Claimed by a worker that never came back.
        let broker = Arc::new(DbBroker::new(ctx.pool().clone()));
        broker
            .enqueue(&TaskMessage::new(
                "stale".to_string(),
                "archived_forecast",
                "archived_forecast",
                TaskPayload::DataExtract { request_id: stale.id },
            ))
            .await
            .unwrap();
        assert!(broker
            .claim(&["archived_forecast".to_string()], "gone-worker")
            .await
            .unwrap()
            .is_some());
        let recent = submit("recent", now - Duration::days(1)).await;
        let revoked = submit("revoked", now - Duration::hours(1)).await;
        results
            .store("revoked", &RequestStatus::Revoked, Some("cancelled"))
            .await
            .unwrap();

        let reconciler = PendingReconciler::new(ctx.clone(), broker.clone(), results, 2);
        let summary = reconciler.run(now).await.unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                checked: 3,
                mirrored: 1,
                timed_out: 1
            }
        );

        let stale = ctx.requests().get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, RequestStatus::Failure);
        assert_eq!(stale.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(stale.end_date.is_some());
        assert_eq!(broker.total_count("archived_forecast").await.unwrap(), 0);

        let recent = ctx.requests().get(recent.id).await.unwrap().unwrap();
        assert_eq!(recent.status, RequestStatus::Pending);
        assert!(recent.end_date.is_none());

        let revoked = ctx.requests().get(revoked.id).await.unwrap().unwrap();
        assert_eq!(revoked.status, RequestStatus::Revoked);
        assert_eq!(revoked.error_message.as_deref(), Some("cancelled"));
    }
}
