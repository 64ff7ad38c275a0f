//! Scheduler commands: beat and pending-schedule reconciliation.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::queue::DbBroker;
use crate::scheduler::{open_store, Beat, ScheduleRegistry};

/// Run the periodic scheduler until interrupted.
pub async fn cmd_beat(settings: &Settings, interval: u64) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;
    let store = open_store(&settings.scheduler_store_url()).await?;
    let broker = Arc::new(DbBroker::new(ctx.pool().clone()));

    println!(
        "{} Scheduler ticking every {}s",
        style("→").cyan(),
        interval.max(1)
    );

    Beat::new(store, broker, Duration::from_secs(interval.max(1)))
        .run()
        .await?;
    Ok(())
}

/// Commit pending schedules whose store entry exists and drop the rest.
pub async fn cmd_reconcile(settings: &Settings) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    let store = open_store(&settings.scheduler_store_url()).await?;
    let registry = ScheduleRegistry::new(ctx, store);

    let report = registry.reconcile_pending().await?;
    println!(
        "{} Committed {}, removed {} pending schedule(s)",
        style("✓").green(),
        report.committed,
        report.removed
    );
    Ok(())
}
