//! Dispatch error types.

use thiserror::Error;

use crate::queue::BrokerError;
use crate::repository::DbError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown dataset type: {0}")]
    UnknownDatasetType(String),
    #[error("Invalid reference time: {0}")]
    InvalidReferenceTime(String),
}

/// Reasons a submission is refused or could not be recorded.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("At least one dataset is required")]
    NoDatasets,
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("Not authorized for dataset: {0}")]
    DatasetForbidden(String),
    #[error("Datasets must all share one category")]
    MixedCategories,
    #[error("Quality filtering requires JSON output")]
    QualityFilterNeedsJson,
    #[error("Unsupported output format: {0}")]
    UnsupportedOutputFormat(String),
    #[error("Hourly request limit of {0} reached")]
    RateLimited(i32),
    #[error("Disk quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
