//! Extraction requests and their arguments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Lifecycle state of a request, following the task queue vocabulary.
///
/// Workers may report custom phases (e.g. `PROGRESS`); those are kept
/// verbatim and are never terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
    Other(String),
}

impl RequestStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Revoked => "REVOKED",
            Self::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PENDING" => Self::Pending,
            "STARTED" => Self::Started,
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "REVOKED" => Self::Revoked,
            other => Self::Other(other.to_string()),
        }
    }

    /// Terminal states carry an end date; nothing else does.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Status strings that are never terminal, used for pending-task queries.
    pub fn terminal_strs() -> [&'static str; 3] {
        ["SUCCESS", "FAILURE", "REVOKED"]
    }
}

impl Serialize for RequestStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Reference time window of an extraction. Values are kept as submitted;
/// timestamps without an offset are interpreted as UTC when parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Optional bounding coordinates for grid cropping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat: Option<f64>,
}

/// A post-processing step requested by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "processor_type", rename_all = "snake_case")]
pub enum PostProcessorSpec {
    DerivedVariables {
        variables: Vec<String>,
    },
    GridCropping {
        trans_type: String,
        sub_type: String,
        #[serde(default)]
        boundings: CropBounds,
    },
    QualityFilter,
}

/// The serialized argument set of an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestArgs {
    pub datasets: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub filters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reftime: Option<ReferenceTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocessors: Vec<PostProcessorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl RequestArgs {
    pub fn wants_json(&self) -> bool {
        self.output_format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }

    pub fn derived_variables(&self) -> Option<&[String]> {
        self.postprocessors.iter().find_map(|p| match p {
            PostProcessorSpec::DerivedVariables { variables } => Some(variables.as_slice()),
            _ => None,
        })
    }

    pub fn grid_cropping(&self) -> Option<(&str, &str, &CropBounds)> {
        self.postprocessors.iter().find_map(|p| match p {
            PostProcessorSpec::GridCropping {
                trans_type,
                sub_type,
                boundings,
            } => Some((trans_type.as_str(), sub_type.as_str(), boundings)),
            _ => None,
        })
    }

    pub fn quality_filter(&self) -> bool {
        self.postprocessors
            .iter()
            .any(|p| matches!(p, PostProcessorSpec::QualityFilter))
    }

    pub fn reftime_from(&self) -> Option<&str> {
        self.reftime.as_ref().and_then(|r| r.from.as_deref())
    }
}

/// A submitted extraction.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub args: RequestArgs,
    pub submission_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<i32>,
}
