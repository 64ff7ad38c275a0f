//! Raw data extraction through the archive query tool.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::{PostProcessError, ToolFailure};
use super::remove_quietly;
use super::tool::{run_tool, ToolArgs};
use crate::config::ToolCommand;
use crate::dispatch::parse_reference_time;
use crate::models::{DataFormat, RequestArgs};

fn filter_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(filter_value).collect();
            (!parts.is_empty()).then(|| parts.join(" or "))
        }
        other => Some(other.to_string()),
    }
}

/// Render request arguments as an archive query, e.g.
/// `reftime: >=2024-01-01 00:00:00,<=2024-01-02 00:00:00; product: B12101`.
pub fn build_query(args: &RequestArgs) -> Result<String, String> {
    let mut clauses = Vec::new();

    if let Some(reftime) = &args.reftime {
        let mut bounds = Vec::new();
        for (op, value) in [(">=", &reftime.from), ("<=", &reftime.to)] {
            if let Some(value) = value {
                let dt = parse_reference_time(value).map_err(|e| e.to_string())?;
                bounds.push(format!("{}{}", op, dt.format("%Y-%m-%d %H:%M:%S")));
            }
        }
        if !bounds.is_empty() {
            clauses.push(format!("reftime: {}", bounds.join(",")));
        }
    }

    if let Some(filters) = args.filters.as_object() {
        for (key, value) in filters {
            if let Some(rendered) = filter_value(value) {
                clauses.push(format!("{}: {}", key, rendered));
            }
        }
    }

    Ok(clauses.join("; "))
}

/// Runs the archive query tool and captures its output.
pub struct Extractor {
    pub tool: ToolCommand,
}

impl Extractor {
    /// Where the raw extraction of a task lands.
    pub fn output_path(workdir: &Path, task_id: &str, format: DataFormat) -> PathBuf {
        workdir.join(format!("{}.{}.tmp", task_id, format.as_str()))
    }

    /// Extract into `output`. Empty results are failures.
    pub fn extract(&self, args: &RequestArgs, output: &Path) -> Result<PathBuf, PostProcessError> {
        let fail = |e: ToolFailure| {
            remove_quietly(output);
            PostProcessError::Extraction(e)
        };

        let query = build_query(args)
            .map_err(|e| fail(ToolFailure::new(&self.tool.command, None, e)))?;
        let tool_args = ToolArgs::new()
            .value("{query}", query.as_str())
            .path("{output}", output)
            .list("{datasets}", &args.datasets);

        run_tool(&self.tool, &tool_args, Some(output)).map_err(fail)?;

        let size = std::fs::metadata(output)
            .map(|m| m.len())
            .map_err(|e| fail(ToolFailure::internal(&self.tool.command, e)))?;
        if size == 0 {
            return Err(fail(ToolFailure::new(
                &self.tool.command,
                None,
                "no data matched the request",
            )));
        }

        tracing::debug!(query = %query, size, "extraction complete");
        Ok(output.to_path_buf())
    }
}
