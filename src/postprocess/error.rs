//! Post-processing error types.
//!
//! Each stage has its own variant carrying the failing tool and its exit
//! status. Clients only ever see the generic "post-processing failed".

use std::fmt;

use thiserror::Error;

/// What went wrong inside one external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub tool: String,
    pub exit_code: Option<i32>,
    pub message: String,
}

impl ToolFailure {
    pub fn new(tool: &str, exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            exit_code,
            message: message.into(),
        }
    }

    /// Failure that happened around the tool (I/O, parsing) rather than in it.
    pub fn internal(tool: &str, err: impl fmt::Display) -> Self {
        Self::new(tool, None, err.to_string())
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} exited with {}: {}", self.tool, code, self.message),
            None => write!(f, "{}: {}", self.tool, self.message),
        }
    }
}

impl std::error::Error for ToolFailure {}

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("extraction failed: {0}")]
    Extraction(ToolFailure),
    #[error("derived variables failed: {0}")]
    DerivedVariable(ToolFailure),
    #[error("grid cropping failed: {0}")]
    Cropping(ToolFailure),
    #[error("output formatting failed: {0}")]
    Formatting(ToolFailure),
    #[error("quality filter failed: {0}")]
    QualityFilter(ToolFailure),
}

impl PostProcessError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::DerivedVariable(_) => "derived_variables",
            Self::Cropping(_) => "grid_cropping",
            Self::Formatting(_) => "output_formatting",
            Self::QualityFilter(_) => "quality_filter",
        }
    }

    pub fn failure(&self) -> &ToolFailure {
        match self {
            Self::Extraction(f)
            | Self::DerivedVariable(f)
            | Self::Cropping(f)
            | Self::Formatting(f)
            | Self::QualityFilter(f) => f,
        }
    }
}
