//! Extraction and post-processing of extracted data.
//!
//! A request's raw extraction output flows through a fixed, strictly
//! sequential chain of stages: derived variables, grid cropping, output
//! formatting, quality filter. Each stage consumes its input file and
//! returns the path of the file it produced; a stage never leaves both on
//! disk.
//!
//! File names are derived from the task id: the extraction writes
//! `{stem}.{fmt}.tmp`, intermediate stages write `{stem}-ppN.{fmt}.tmp`, and
//! formatting produces the final `{stem}.{fmt}` or `{stem}.json`.

mod error;
mod extract;
mod pipeline;
mod quality;
mod stages;
mod tool;

pub use error::{PostProcessError, ToolFailure};
pub use extract::{build_query, Extractor};
pub use pipeline::Pipeline;
pub use quality::{filter_message, QualityFilter, INVALIDATED_FLAG};
pub use stages::{DerivedVariables, GridCropping, OutputFormatting};
pub use tool::{run_tool, ToolArgs};

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::models::DataFormat;

/// Suffix of files that are still being written.
pub const TMP_SUFFIX: &str = ".tmp";

/// One step of the chain.
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform `input` into a new file next to it and return its path.
    /// On success `input` no longer exists.
    fn run(&self, input: &Path) -> Result<PathBuf, PostProcessError>;
}

fn stem_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<stem>.+?)(?:-pp\d+)?(?:\.qc)?(?:\.(?:grib|bufr|json))?(?:\.tmp)?$")
            .expect("static regex")
    })
}

/// The task stem a pipeline file name was derived from.
pub fn base_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem_pattern()
        .captures(&name)
        .and_then(|c| c.name("stem"))
        .map(|m| m.as_str().to_string())
        .unwrap_or(name)
}

/// Sibling of `input` called `name`.
pub(crate) fn sibling(input: &Path, name: &str) -> PathBuf {
    input
        .parent()
        .map(|p| p.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Detect the message format from magic bytes, falling back to the name.
pub fn detect_format(path: &Path) -> Option<DataFormat> {
    let mut head = [0u8; 4];
    if let Ok(mut file) = File::open(path) {
        if file.read_exact(&mut head).is_ok() {
            if let Some(format) = DataFormat::sniff(&head) {
                return Some(format);
            }
        }
    }
    let name = path.file_name()?.to_string_lossy();
    let name = name.strip_suffix(TMP_SUFFIX).unwrap_or(&name);
    Path::new(name)
        .extension()
        .and_then(|e| DataFormat::from_str(&e.to_string_lossy()))
}

/// Remove a file, ignoring a missing one.
pub fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_stem() {
        let cases = [
            ("abc.grib.tmp", "abc"),
            ("abc-pp1.grib.tmp", "abc"),
            ("abc-pp2.bufr.tmp", "abc"),
            ("abc.json", "abc"),
            ("abc.qc.json", "abc"),
            ("abc", "abc"),
        ];
        for (name, stem) in cases {
            assert_eq!(base_stem(Path::new(name)), stem, "{}", name);
        }
    }

    #[test]
    fn test_detect_format() {
        let dir = tempfile::tempdir().unwrap();
        let grib = dir.path().join("x.bin");
        std::fs::write(&grib, b"GRIB....7777").unwrap();
        assert_eq!(detect_format(&grib), Some(DataFormat::Grib));

        let named = dir.path().join("y.bufr.tmp");
        std::fs::write(&named, b"").unwrap();
        assert_eq!(detect_format(&named), Some(DataFormat::Bufr));

        assert_eq!(detect_format(&dir.path().join("missing")), None);
    }
}
