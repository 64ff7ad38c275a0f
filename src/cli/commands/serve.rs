//! API server command.

use console::style;

use crate::config::Settings;

/// Start the API server.
pub async fn cmd_serve(settings: Settings, bind: &str) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    println!(
        "{} Starting meteodist API at http://{}",
        style("→").cyan(),
        bind
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings, bind).await
}
