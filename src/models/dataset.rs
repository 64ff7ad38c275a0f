//! Dataset catalog entries.
//!
//! Datasets are not owned by this system; they are described in configuration
//! and mirrored here so the API can report them and route extractions.

use serde::{Deserialize, Serialize};

/// Broad dataset category, used to pick a task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetCategory {
    #[serde(rename = "FOR")]
    Forecast,
    #[serde(rename = "OBS")]
    Observed,
    #[serde(rename = "RAD")]
    Radar,
    #[serde(rename = "SEA")]
    Sea,
}

impl DatasetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forecast => "FOR",
            Self::Observed => "OBS",
            Self::Radar => "RAD",
            Self::Sea => "SEA",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FOR" => Some(Self::Forecast),
            "OBS" => Some(Self::Observed),
            "RAD" => Some(Self::Radar),
            "SEA" => Some(Self::Sea),
            _ => None,
        }
    }
}

/// Message encoding of a dataset's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Grib,
    Bufr,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grib => "grib",
            Self::Bufr => "bufr",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grib" | "grib1" | "grib2" => Some(Self::Grib),
            "bufr" => Some(Self::Bufr),
            _ => None,
        }
    }

    /// Detect the format from the leading magic bytes of a message file.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"GRIB") {
            Some(Self::Grib)
        } else if head.starts_with(b"BUFR") {
            Some(Self::Bufr)
        } else {
            None
        }
    }
}

/// A dataset as configured by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: DatasetCategory,
    pub format: DataFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    /// Open to every caller, authenticated or not.
    #[serde(default)]
    pub public: bool,
}

/// A dataset as seen by one caller.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: DatasetCategory,
    pub format: DataFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    pub is_public: bool,
    pub authorized: bool,
}

impl DatasetView {
    pub fn new(dataset: &Dataset, authorized: bool) -> Self {
        Self {
            id: dataset.name.clone(),
            name: dataset.name.clone(),
            description: dataset.description.clone(),
            category: dataset.category,
            format: dataset.format,
            license: dataset.license.clone(),
            attribution: dataset.attribution.clone(),
            is_public: dataset.public,
            authorized: dataset.public || authorized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_codes() {
        for code in ["FOR", "OBS", "RAD", "SEA"] {
            let category = DatasetCategory::from_str(code).unwrap();
            assert_eq!(category.as_str(), code);
        }
        assert_eq!(DatasetCategory::from_str("obs"), Some(DatasetCategory::Observed));
        assert_eq!(DatasetCategory::from_str("STA"), None);
    }

    #[test]
    fn test_sniff_format() {
        assert_eq!(DataFormat::sniff(b"GRIB\x00\x01"), Some(DataFormat::Grib));
        assert_eq!(DataFormat::sniff(b"BUFR\x00\x01"), Some(DataFormat::Bufr));
        assert_eq!(DataFormat::sniff(b"{\"a\""), None);
    }
}
