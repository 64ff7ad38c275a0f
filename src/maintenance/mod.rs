//! Out-of-band maintenance jobs.
//!
//! Each job is independent: it reads the ledger or the filesystem, corrects
//! what it finds, and reports counts. Jobs never raise to a client. They log
//! a start and an end banner whatever the outcome, and optionally append one
//! line per run to a shared job log guarded by a lock file.

mod aggregations;
mod expire;
mod mail;
mod reconcile;
mod sweep;

pub use aggregations::{AggregationPruner, AggregationStore, PruneSummary, SqliteAggregationStore};
pub use expire::{ExpireSummary, RequestExpirer};
pub use mail::{MailError, Mailer, SendmailMailer};
pub use reconcile::{PendingReconciler, ReconcileSummary, TIMEOUT_MESSAGE};
pub use sweep::{OrphanSweeper, SweepSummary};

use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::queue::BrokerError;
use crate::repository::DbError;
use crate::utils::{append_locked, LockError};

/// Lock attempts before a job-log append gives up.
const JOB_LOG_RETRIES: u32 = 10;
const JOB_LOG_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Result backend error: {0}")]
    Backend(#[from] BrokerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Aggregation store error: {0}")]
    Aggregation(String),
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

/// Runs jobs with banners and the optional job log.
#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    job_log: Option<PathBuf>,
}

impl JobRunner {
    pub fn new(job_log: Option<PathBuf>) -> Self {
        Self { job_log }
    }

    /// Run one job. The summary's `Display` is used in the end banner and
    /// the job log line.
    pub async fn run<T, F>(&self, name: &str, job: F) -> Result<T, MaintenanceError>
    where
        T: Display,
        F: Future<Output = Result<T, MaintenanceError>>,
    {
        let started = Instant::now();
        tracing::info!(job = name, "==== {} started ====", name);

        let result = job.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(summary) => {
                tracing::info!(job = name, elapsed_ms, "==== {} finished: {} ====", name, summary);
                format!("ok {}", summary)
            }
            Err(e) => {
                tracing::error!(job = name, elapsed_ms, "==== {} failed: {} ====", name, e);
                format!("failed {}", e)
            }
        };

        if let Some(log) = &self.job_log {
            let line = format!("{} {} {} ({} ms)", Utc::now().to_rfc3339(), name, outcome, elapsed_ms);
            if let Err(e) = append_locked(log, &line, JOB_LOG_RETRIES, JOB_LOG_RETRY_DELAY).await {
                tracing::warn!(job = name, "could not write job log: {}", e);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runner_appends_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("jobs.log");
        let runner = JobRunner::new(Some(log.clone()));

        let ok = runner.run("sweep-orphans", async { Ok::<_, MaintenanceError>(3) }).await;
        assert_eq!(ok.unwrap(), 3);
        let failed = runner
            .run("prune-aggregations", async {
                Err::<u32, _>(MaintenanceError::Aggregation("boom".to_string()))
            })
            .await;
        assert!(failed.is_err());

        let content = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("sweep-orphans ok 3"));
        assert!(lines[1].contains("prune-aggregations failed"));
    }
}
