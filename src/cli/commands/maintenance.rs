//! Maintenance job commands.
//!
//! Each job runs once, or forever with `--daemon`. In daemon mode a failed
//! run is logged and the loop keeps going.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::maintenance::{
    AggregationPruner, JobRunner, MaintenanceError, OrphanSweeper, PendingReconciler,
    RequestExpirer, SendmailMailer, SqliteAggregationStore,
};
use crate::queue::{DbBroker, DbResultBackend};

async fn repeat<T, F, Fut>(
    runner: &JobRunner,
    name: &str,
    daemon: bool,
    interval: u64,
    mut job: F,
) -> anyhow::Result<()>
where
    T: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MaintenanceError>>,
{
    if !daemon {
        let summary = runner.run(name, job()).await?;
        println!("{} {}: {}", style("✓").green(), name, summary);
        return Ok(());
    }

    println!(
        "{} Running {} every {}s",
        style("→").cyan(),
        name,
        interval
    );
    loop {
        // Outcome is already logged by the runner.
        let _ = runner.run(name, job()).await;
        tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
    }
}

pub async fn cmd_reconcile_pending(
    settings: &Settings,
    daemon: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    let broker = Arc::new(DbBroker::new(ctx.pool().clone()));
    let results = Arc::new(DbResultBackend::new(ctx.pool().clone()));
    let reconciler = PendingReconciler::new(ctx, broker, results, settings.pending_grace_days);
    let runner = JobRunner::new(settings.job_log.clone());

    repeat(&runner, "reconcile-pending", daemon, interval, || {
        reconciler.run(Utc::now())
    })
    .await
}

pub async fn cmd_sweep_orphans(
    settings: &Settings,
    daemon: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let sweeper = OrphanSweeper::new(
        settings.create_db_context(),
        settings.download_dir.clone(),
        Duration::from_secs(settings.orphan_min_age_secs),
    );
    let runner = JobRunner::new(settings.job_log.clone());

    repeat(&runner, "sweep-orphans", daemon, interval, || sweeper.run()).await
}

pub async fn cmd_expire_requests(
    settings: &Settings,
    daemon: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let expirer = RequestExpirer::new(settings.create_db_context(), settings.download_dir.clone());
    let runner = JobRunner::new(settings.job_log.clone());

    repeat(&runner, "expire-requests", daemon, interval, || {
        expirer.run(Utc::now())
    })
    .await
}

pub async fn cmd_prune_aggregations(
    settings: &Settings,
    days: Option<i64>,
    daemon: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let retention_days = days.unwrap_or(settings.aggregation_retention_days);
    if retention_days < 0 {
        anyhow::bail!("Retention must not be negative");
    }

    let store = SqliteAggregationStore::new(&settings.aggregation_database_url());
    store.init().await?;
    let support_email = Some(settings.support_email.clone()).filter(|e| !e.is_empty());
    let mailer = SendmailMailer::new(&settings.mail_command, "meteodist@localhost");
    let pruner = AggregationPruner::new(
        Arc::new(store),
        Arc::new(mailer),
        support_email,
        retention_days,
    );
    let runner = JobRunner::new(settings.job_log.clone());

    repeat(&runner, "prune-aggregations", daemon, interval, || {
        pruner.run(Utc::now())
    })
    .await
}
