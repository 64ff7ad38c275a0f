//! Ordered stage chain built from a request's arguments.

use std::path::{Path, PathBuf};

use super::error::PostProcessError;
use super::quality::QualityFilter;
use super::stages::{DerivedVariables, GridCropping, OutputFormatting};
use super::{remove_quietly, PostProcessor};
use crate::config::ToolCommands;
use crate::models::RequestArgs;

pub struct Pipeline {
    stages: Vec<Box<dyn PostProcessor>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn PostProcessor>>) -> Self {
        Self { stages }
    }

    /// Stages in fixed order: derived variables, grid cropping, output
    /// formatting, quality filter. Formatting always runs.
    pub fn for_request(args: &RequestArgs, tools: &ToolCommands) -> Self {
        let mut stages: Vec<Box<dyn PostProcessor>> = Vec::new();

        if let Some(variables) = args.derived_variables() {
            stages.push(Box::new(DerivedVariables {
                variables: variables.to_vec(),
                grib_tool: tools.derived_grib.clone(),
                bufr_tool: tools.derived_bufr.clone(),
            }));
        }
        if let Some((trans_type, sub_type, bounds)) = args.grid_cropping() {
            stages.push(Box::new(GridCropping {
                trans_type: trans_type.to_string(),
                sub_type: sub_type.to_string(),
                bounds: bounds.clone(),
                tool: tools.crop.clone(),
            }));
        }
        stages.push(Box::new(OutputFormatting {
            json: args.wants_json(),
            dump_tool: tools.dump.clone(),
        }));
        if args.quality_filter() {
            stages.push(Box::new(QualityFilter));
        }

        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in turn. The first failure aborts the chain and the
    /// in-flight file is deleted.
    pub fn run(&self, input: &Path) -> Result<PathBuf, PostProcessError> {
        let mut current = input.to_path_buf();

        for stage in &self.stages {
            tracing::debug!(stage = stage.name(), file = %current.display(), "running stage");
            match stage.run(&current) {
                Ok(next) => current = next,
                Err(e) => {
                    remove_quietly(&current);
                    return Err(e);
                }
            }
        }

        Ok(current)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use crate::models::{CropBounds, PostProcessorSpec};
    use std::fs;

    fn tools() -> ToolCommands {
        let copy = ToolCommand::new(
            "sh",
            &["-c", "cat \"$1\" > \"$2\"", "copy", "{input}", "{output}"],
        );
        ToolCommands {
            extract: ToolCommand::new("true", &[]),
            derived_grib: copy.clone(),
            derived_bufr: copy.clone(),
            crop: copy,
            dump: ToolCommand::new(
                "sh",
                &["-c", "echo '{\"data\":[{\"vars\":{\"B12101\":{\"v\":1}}}]}'"],
            ),
            import: ToolCommand::new("true", &[]),
        }
    }

    #[test]
    fn test_full_chain_order_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("task.bufr.tmp");
        fs::write(&input, b"BUFR....").unwrap();

        let args = RequestArgs {
            datasets: vec!["agrmet".to_string()],
            postprocessors: vec![
                PostProcessorSpec::QualityFilter,
                PostProcessorSpec::GridCropping {
                    trans_type: "zoom".to_string(),
                    sub_type: "coord".to_string(),
                    boundings: CropBounds::default(),
                },
                PostProcessorSpec::DerivedVariables {
                    variables: vec!["B12194".to_string()],
                },
            ],
            output_format: Some("json".to_string()),
            ..Default::default()
        };
        let pipeline = Pipeline::for_request(&args, &tools());
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "derived_variables",
                "grid_cropping",
                "output_formatting",
                "quality_filter"
            ]
        );

        let output = pipeline.run(&input).unwrap();
        assert_eq!(output, dir.path().join("task.qc.json"));

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec!["task.qc.json".to_string()]);
    }

    #[test]
    fn test_failure_removes_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("task.grib.tmp");
        fs::write(&input, b"GRIB....").unwrap();

        let mut tools = tools();
        tools.crop = ToolCommand::new("sh", &["-c", "exit 4"]);
        let args = RequestArgs {
            postprocessors: vec![
                PostProcessorSpec::DerivedVariables {
                    variables: vec!["B12194".to_string()],
                },
                PostProcessorSpec::GridCropping {
                    trans_type: "zoom".to_string(),
                    sub_type: "coord".to_string(),
                    boundings: CropBounds::default(),
                },
            ],
            ..Default::default()
        };

        let err = Pipeline::for_request(&args, &tools).run(&input).unwrap_err();
        assert_eq!(err.stage(), "grid_cropping");
        assert_eq!(err.failure().exit_code, Some(4));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
