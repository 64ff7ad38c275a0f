//! Quality filter: drops invalidated observations from a JSON message dump.
//!
//! Input is one JSON message per line. Each message carries `data` blocks
//! whose `vars` map a variable code to `{"v": value, "a": {attr: value}}`.
//! Variables flagged invalid by the quality control attribute are removed;
//! a message with no variables left is dropped. This runs in-process as a
//! streaming line-by-line transform.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::{PostProcessError, ToolFailure};
use super::{base_stem, remove_quietly, sibling, PostProcessor};

/// Attribute marking a value as manually invalidated.
pub const INVALIDATED_FLAG: &str = "B33196";

fn is_invalidated(var: &Value) -> bool {
    var.get("a")
        .and_then(|attrs| attrs.get(INVALIDATED_FLAG))
        .is_some_and(|flag| flag.as_i64() == Some(1))
}

/// Apply the quality predicate to one message.
///
/// Returns the message with invalidated variables stripped, or `None` when
/// nothing of it survives.
pub fn filter_message(mut message: Value) -> Option<Value> {
    let mut remaining = 0usize;

    if let Some(blocks) = message.get_mut("data").and_then(Value::as_array_mut) {
        for block in blocks.iter_mut() {
            if let Some(vars) = block.get_mut("vars").and_then(Value::as_object_mut) {
                vars.retain(|_, var| !is_invalidated(var));
                remaining += vars.len();
            }
        }
        blocks.retain(|block| {
            block
                .get("vars")
                .and_then(Value::as_object)
                .map_or(true, |vars| !vars.is_empty())
        });
    }

    (remaining > 0).then_some(message)
}

pub struct QualityFilter;

impl QualityFilter {
    pub fn output_path(input: &Path) -> PathBuf {
        sibling(input, &format!("{}.qc.json", base_stem(input)))
    }

    fn filter_stream(input: &Path, output: &Path) -> Result<(usize, usize), ToolFailure> {
        let fail = |e: &dyn std::fmt::Display| ToolFailure::internal("quality_filter", e);

        let reader = BufReader::new(File::open(input).map_err(|e| fail(&e))?);
        let mut writer = BufWriter::new(File::create(output).map_err(|e| fail(&e))?);
        let (mut kept, mut dropped) = (0usize, 0usize);

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| fail(&e))?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = serde_json::from_str(&line)
                .map_err(|e| fail(&format!("line {}: {}", lineno + 1, e)))?;
            match filter_message(message) {
                Some(message) => {
                    serde_json::to_writer(&mut writer, &message).map_err(|e| fail(&e))?;
                    writer.write_all(b"\n").map_err(|e| fail(&e))?;
                    kept += 1;
                }
                None => dropped += 1,
            }
        }
        writer.flush().map_err(|e| fail(&e))?;
        Ok((kept, dropped))
    }
}

impl PostProcessor for QualityFilter {
    fn name(&self) -> &'static str {
        "quality_filter"
    }

    fn run(&self, input: &Path) -> Result<PathBuf, PostProcessError> {
        let output = Self::output_path(input);

        match Self::filter_stream(input, &output) {
            Ok((kept, dropped)) => {
                tracing::debug!(kept, dropped, "quality filter applied");
                remove_quietly(input);
                Ok(output)
            }
            Err(e) => {
                remove_quietly(&output);
                Err(PostProcessError::QualityFilter(e))
            }
        }
    }
}
