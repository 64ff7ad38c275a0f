//! Initialize command.

use console::style;

use crate::config::{Settings, ToolCommand};
use crate::maintenance::SqliteAggregationStore;
use crate::scheduler::open_store;

fn check_tool(label: &str, tool: &ToolCommand) {
    if which::which(&tool.command).is_err() {
        println!(
            "  {} {} tool '{}' not found in PATH",
            style("!").yellow(),
            label,
            tool.command
        );
    }
}

/// Initialize the data directory, the ledger, the aggregation store and the
/// scheduler store.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;
    println!("  {} Ledger ready", style("✓").green());

    SqliteAggregationStore::new(&settings.aggregation_database_url())
        .init()
        .await?;
    println!("  {} Aggregation store ready", style("✓").green());

    open_store(&settings.scheduler_store_url()).await?;
    println!("  {} Scheduler store ready", style("✓").green());

    let tools = &settings.tools;
    check_tool("extraction", &tools.extract);
    check_tool("derived variables (GRIB)", &tools.derived_grib);
    check_tool("derived variables (BUFR)", &tools.derived_bufr);
    check_tool("cropping", &tools.crop);
    check_tool("dump", &tools.dump);
    check_tool("import", &tools.import);

    if settings.datasets.is_empty() {
        println!(
            "{} No datasets configured in meteodist.toml",
            style("!").yellow()
        );
    }

    println!(
        "{} Initialized meteodist in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
