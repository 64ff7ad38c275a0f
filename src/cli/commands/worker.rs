//! Worker command.

use std::sync::Arc;

use console::style;

use crate::config::Settings;
use crate::dispatch::all_queues;
use crate::queue::{DbBroker, DbResultBackend};
use crate::worker::Worker;

/// Consume extraction tasks until interrupted.
pub async fn cmd_worker(settings: Settings, queues: Vec<String>) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let known = all_queues();
    let queues = if queues.is_empty() { known.clone() } else { queues };
    if let Some(unknown) = queues.iter().find(|q| !known.contains(q)) {
        anyhow::bail!("Unknown queue: {} (expected one of {})", unknown, known.join(", "));
    }

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;
    let broker = Arc::new(DbBroker::new(ctx.pool().clone()));
    let results = Arc::new(DbResultBackend::new(ctx.pool().clone()));

    println!(
        "{} Worker consuming {}",
        style("→").cyan(),
        queues.join(", ")
    );

    let worker = Worker::new(ctx, broker, results, Arc::new(settings), queues);
    worker.run().await?;
    Ok(())
}
