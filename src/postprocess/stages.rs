//! External-tool stages: derived variables, grid cropping, output formatting.

use std::path::{Path, PathBuf};

use super::error::{PostProcessError, ToolFailure};
use super::tool::{run_tool, ToolArgs};
use super::{base_stem, detect_format, remove_quietly, sibling, PostProcessor};
use crate::config::ToolCommand;
use crate::models::{CropBounds, DataFormat};

/// Run a file-to-file tool, keeping exactly one of input and output on disk.
fn transform(
    tool: &ToolCommand,
    options: &[String],
    input: &Path,
    output: &Path,
) -> Result<(), ToolFailure> {
    let args = ToolArgs::new()
        .path("{input}", input)
        .path("{output}", output)
        .value("{stem}", base_stem(input))
        .list("{options}", options);

    let result = run_tool(tool, &args, None).and_then(|()| {
        if output.exists() {
            Ok(())
        } else {
            Err(ToolFailure::new(&tool.command, None, "no output file produced"))
        }
    });

    match result {
        Ok(()) => {
            remove_quietly(input);
            Ok(())
        }
        Err(e) => {
            remove_quietly(output);
            Err(e)
        }
    }
}

/// Compute additional variables with the format-appropriate transform tool.
pub struct DerivedVariables {
    pub variables: Vec<String>,
    pub grib_tool: ToolCommand,
    pub bufr_tool: ToolCommand,
}

impl DerivedVariables {
    pub fn output_path(input: &Path, format: DataFormat) -> PathBuf {
        sibling(
            input,
            &format!("{}-pp1.{}.tmp", base_stem(input), format.as_str()),
        )
    }
}

impl PostProcessor for DerivedVariables {
    fn name(&self) -> &'static str {
        "derived_variables"
    }

    fn run(&self, input: &Path) -> Result<PathBuf, PostProcessError> {
        let format = detect_format(input).ok_or_else(|| {
            PostProcessError::DerivedVariable(ToolFailure::new(
                self.name(),
                None,
                "unrecognized message format",
            ))
        })?;
        let tool = match format {
            DataFormat::Grib => &self.grib_tool,
            DataFormat::Bufr => &self.bufr_tool,
        };
        let output = Self::output_path(input, format);
        let options = vec![format!("--output-variable-list={}", self.variables.join(","))];

        transform(tool, &options, input, &output).map_err(PostProcessError::DerivedVariable)?;
        Ok(output)
    }
}

/// Crop or regrid with the spatial transform tool.
pub struct GridCropping {
    pub trans_type: String,
    pub sub_type: String,
    pub bounds: CropBounds,
    pub tool: ToolCommand,
}

impl GridCropping {
    /// Transform options; bounding coordinates only when present.
    pub fn options(&self) -> Vec<String> {
        let mut options = vec![
            format!("--trans-type={}", self.trans_type),
            format!("--sub-type={}", self.sub_type),
        ];
        let bounds = [
            ("ilon", self.bounds.ilon),
            ("ilat", self.bounds.ilat),
            ("flon", self.bounds.flon),
            ("flat", self.bounds.flat),
        ];
        for (name, value) in bounds {
            if let Some(value) = value {
                options.push(format!("--{}={}", name, value));
            }
        }
        options
    }

    pub fn output_path(input: &Path, format: DataFormat) -> PathBuf {
        sibling(
            input,
            &format!("{}-pp2.{}.tmp", base_stem(input), format.as_str()),
        )
    }
}

impl PostProcessor for GridCropping {
    fn name(&self) -> &'static str {
        "grid_cropping"
    }

    fn run(&self, input: &Path) -> Result<PathBuf, PostProcessError> {
        let format = detect_format(input).unwrap_or(DataFormat::Grib);
        let output = Self::output_path(input, format);

        transform(&self.tool, &self.options(), input, &output)
            .map_err(PostProcessError::Cropping)?;
        Ok(output)
    }
}

/// Produce the final file: a JSON dump, or the messages unchanged.
///
/// The input is removed on every path, including failures.
pub struct OutputFormatting {
    pub json: bool,
    pub dump_tool: ToolCommand,
}

impl PostProcessor for OutputFormatting {
    fn name(&self) -> &'static str {
        "output_formatting"
    }

    fn run(&self, input: &Path) -> Result<PathBuf, PostProcessError> {
        let stem = base_stem(input);

        if self.json {
            let output = sibling(input, &format!("{}.json", stem));
            let args = ToolArgs::new()
                .path("{input}", input)
                .path("{output}", &output)
                .value("{stem}", stem.as_str());
            let result = run_tool(&self.dump_tool, &args, Some(&output));
            remove_quietly(input);
            return match result {
                Ok(()) => Ok(output),
                Err(e) => {
                    remove_quietly(&output);
                    Err(PostProcessError::Formatting(e))
                }
            };
        }

        let format = detect_format(input).unwrap_or(DataFormat::Grib);
        let output = sibling(input, &format!("{}.{}", stem, format.as_str()));
        std::fs::rename(input, &output).map_err(|e| {
            remove_quietly(input);
            PostProcessError::Formatting(ToolFailure::internal(self.name(), e))
        })?;
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn copy_tool() -> ToolCommand {
        // Behaves like a transform: copies input to output, tagging options.
        ToolCommand::new(
            "sh",
            &["-c", "cat \"$1\" > \"$2\"", "transform", "{input}", "{output}"],
        )
    }

    #[test]
    fn test_derived_variables_replaces_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("task.grib.tmp");
        fs::write(&input, b"GRIB-data").unwrap();

        let stage = DerivedVariables {
            variables: vec!["B12194".to_string(), "B13003".to_string()],
            grib_tool: copy_tool(),
            bufr_tool: ToolCommand::new("false", &[]),
        };
        let output = stage.run(&input).unwrap();

        assert_eq!(output, dir.path().join("task-pp1.grib.tmp"));
        assert!(!input.exists());
        assert_eq!(fs::read(&output).unwrap(), b"GRIB-data");
    }

    #[test]
    fn test_failed_stage_keeps_only_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("task.bufr.tmp");
        fs::write(&input, b"BUFR-data").unwrap();

        let stage = GridCropping {
            trans_type: "zoom".to_string(),
            sub_type: "coord".to_string(),
            bounds: CropBounds::default(),
            tool: ToolCommand::new("sh", &["-c", "touch \"$1\"; exit 2", "crop", "{output}"]),
        };
        let err = stage.run(&input).unwrap_err();

        assert!(matches!(err, PostProcessError::Cropping(ref f) if f.exit_code == Some(2)));
        assert!(input.exists());
        assert!(!dir.path().join("task-pp2.bufr.tmp").exists());
    }

    #[test]
    fn test_crop_options_skip_missing_bounds() {
        let stage = GridCropping {
            trans_type: "zoom".to_string(),
            sub_type: "coord".to_string(),
            bounds: CropBounds {
                ilon: Some(9.0),
                flat: Some(45.5),
                ..Default::default()
            },
            tool: copy_tool(),
        };
        assert_eq!(
            stage.options(),
            vec![
                "--trans-type=zoom",
                "--sub-type=coord",
                "--ilon=9",
                "--flat=45.5"
            ]
        );
    }

    #[test]
    fn test_formatting_passthrough_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("task-pp2.bufr.tmp");
        let content = b"BUFR\x00\x01\x02binary7777".to_vec();
        fs::write(&input, &content).unwrap();

        let stage = OutputFormatting {
            json: false,
            dump_tool: ToolCommand::new("false", &[]),
        };
        let output = stage.run(&input).unwrap();

        assert_eq!(output, dir.path().join("task.bufr"));
        assert!(!input.exists());
        assert_eq!(fs::read(&output).unwrap(), content);
    }

    #[test]
    fn test_formatting_json_removes_input_even_on_failure() {
        let dir = tempfile::tempdir().unwrap();

        let input = dir.path().join("ok.bufr.tmp");
        fs::write(&input, b"BUFR").unwrap();
        let stage = OutputFormatting {
            json: true,
            dump_tool: ToolCommand::new("sh", &["-c", "echo '{\"a\":1}'"]),
        };
        let output = stage.run(&input).unwrap();
        assert_eq!(output, dir.path().join("ok.json"));
        assert!(!input.exists());
        assert_eq!(fs::read_to_string(&output).unwrap(), "{\"a\":1}\n");

        let input = dir.path().join("bad.bufr.tmp");
        fs::write(&input, b"BUFR").unwrap();
        let stage = OutputFormatting {
            json: true,
            dump_tool: ToolCommand::new("sh", &["-c", "exit 1"]),
        };
        assert!(matches!(
            stage.run(&input),
            Err(PostProcessError::Formatting(_))
        ));
        assert!(!input.exists());
        assert!(!dir.path().join("bad.json").exists());
    }
}
