//! External tool invocation shared by extraction and the pipeline stages.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use super::error::ToolFailure;
use crate::config::ToolCommand;

/// Longest stderr excerpt kept in a failure.
const MAX_STDERR: usize = 2000;

/// Placeholder values for one invocation.
#[derive(Debug, Default)]
pub struct ToolArgs<'a> {
    scalars: Vec<(&'static str, String)>,
    lists: Vec<(&'static str, &'a [String])>,
}

impl<'a> ToolArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, key: &'static str, path: &Path) -> Self {
        self.scalars.push((key, path.to_string_lossy().into_owned()));
        self
    }

    pub fn value(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.scalars.push((key, value.into()));
        self
    }

    pub fn list(mut self, key: &'static str, values: &'a [String]) -> Self {
        self.lists.push((key, values));
        self
    }

    /// Expand a template. List placeholders must stand alone as an argument.
    pub fn expand(&self, template: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(template.len());
        for arg in template {
            if let Some((_, values)) = self.lists.iter().find(|(key, _)| arg == key) {
                out.extend(values.iter().cloned());
                continue;
            }
            let mut expanded = arg.clone();
            for (key, value) in &self.scalars {
                expanded = expanded.replace(key, value);
            }
            out.push(expanded);
        }
        out
    }
}

/// Run a tool to completion. With `stdout_to`, standard output is streamed
/// into that file; otherwise it is discarded.
pub fn run_tool(
    tool: &ToolCommand,
    args: &ToolArgs<'_>,
    stdout_to: Option<&Path>,
) -> Result<(), ToolFailure> {
    let argv = args.expand(&tool.args);
    tracing::debug!("Running {} {:?}", tool.command, argv);

    let stdout = match stdout_to {
        Some(path) => Stdio::from(
            File::create(path).map_err(|e| ToolFailure::internal(&tool.command, e))?,
        ),
        None => Stdio::null(),
    };

    let output = Command::new(&tool.command)
        .args(&argv)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ToolFailure::internal(&tool.command, format!("failed to start: {}", e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let excerpt = match stderr.char_indices().rev().nth(MAX_STDERR) {
        Some((idx, _)) => &stderr[idx..],
        None => stderr,
    };
    Err(ToolFailure::new(
        &tool.command,
        output.status.code(),
        excerpt.to_string(),
    ))
}
