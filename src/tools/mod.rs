//! Format pipeline tools: BUFR/JSON conversion and uploaded archive checks.
//!
//! These back the `meteodist tools` commands used by ingestion flows.

mod archive;

pub use archive::{validate_archive, ArchiveEntry, ArchiveError, ALLOWED_EXTENSIONS};

use std::path::{Path, PathBuf};

use crate::config::ToolCommands;
use crate::models::DataFormat;
use crate::postprocess::{base_stem, remove_quietly, run_tool, ToolArgs, ToolFailure};

/// Target of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    /// BUFR to JSON lines, through the dump tool.
    Json,
    /// JSON lines to BUFR, through the import tool.
    Bufr,
}

impl ConvertTarget {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "bufr" => Some(Self::Bufr),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bufr => DataFormat::Bufr.as_str(),
        }
    }
}

/// Convert `input` and write the result to `output`, or next to the input
/// as `<stem>.<ext>` when no output is given.
pub fn convert(
    input: &Path,
    target: ConvertTarget,
    output: Option<&Path>,
    tools: &ToolCommands,
) -> Result<PathBuf, ToolFailure> {
    let output = output.map(Path::to_path_buf).unwrap_or_else(|| {
        input.with_file_name(format!("{}.{}", base_stem(input), target.extension()))
    });
    if output == input {
        return Err(ToolFailure::new(
            "convert",
            None,
            "output would overwrite the input",
        ));
    }

    let tool = match target {
        ConvertTarget::Json => &tools.dump,
        ConvertTarget::Bufr => &tools.import,
    };
    let args = ToolArgs::new().path("{input}", input).path("{output}", &output);

    if let Err(e) = run_tool(tool, &args, Some(&output)) {
        remove_quietly(&output);
        return Err(e);
    }
    tracing::info!(input = %input.display(), output = %output.display(), "converted");
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ToolCommand;

    #[test]
    fn test_convert_uses_matching_tool() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("obs.bufr");
        std::fs::write(&input, b"BUFR").unwrap();

        let tools = ToolCommands {
            dump: ToolCommand::new("sh", &["-c", "echo dumped"]),
            import: ToolCommand::new("sh", &["-c", "echo imported"]),
            ..Default::default()
        };

        let json = convert(&input, ConvertTarget::Json, None, &tools).unwrap();
        assert_eq!(json, dir.path().join("obs.json"));
        assert_eq!(std::fs::read_to_string(&json).unwrap(), "dumped\n");

        let bufr = convert(&json, ConvertTarget::Bufr, Some(&dir.path().join("back.bufr")), &tools)
            .unwrap();
        assert_eq!(std::fs::read_to_string(&bufr).unwrap(), "imported\n");
    }

    #[test]
    fn test_convert_refuses_in_place_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("obs.bufr");
        std::fs::write(&input, b"BUFR").unwrap();

        let failing = ToolCommands {
            dump: ToolCommand::new("sh", &["-c", "echo partial; exit 2"]),
            ..Default::default()
        };
        let err = convert(&input, ConvertTarget::Json, None, &failing).unwrap_err();
        assert_eq!(err.exit_code, Some(2));
        assert!(!dir.path().join("obs.json").exists());

        assert!(convert(&input, ConvertTarget::Bufr, None, &failing).is_err());
        assert!(input.exists());
    }
}
