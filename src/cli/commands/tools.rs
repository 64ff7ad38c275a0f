//! Format pipeline tool commands.

use std::path::Path;

use console::style;

use crate::config::Settings;
use crate::tools::{convert, validate_archive, ConvertTarget};
use crate::utils::format_size;

pub fn cmd_convert(
    settings: &Settings,
    input: &Path,
    format: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let target = ConvertTarget::from_str(format)
        .ok_or_else(|| anyhow::anyhow!("Unsupported target format: {} (json or bufr)", format))?;

    let output = convert(input, target, output, &settings.tools)?;
    println!("{} Wrote {}", style("✓").green(), output.display());
    Ok(())
}

pub fn cmd_validate_archive(path: &Path) -> anyhow::Result<()> {
    let entries = validate_archive(path)?;

    for entry in &entries {
        println!("  {} ({})", entry.path, format_size(entry.size));
    }
    println!(
        "{} {} is valid: {} file(s)",
        style("✓").green(),
        path.display(),
        entries.len()
    );
    Ok(())
}
