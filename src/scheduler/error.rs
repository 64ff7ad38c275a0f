//! Scheduler error types.

use thiserror::Error;

use crate::queue::BrokerError;
use crate::repository::DbError;

/// Errors from scheduler store backends.
#[derive(Debug, Error)]
pub enum SchedulerStoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unsupported scheduler store URL: {0}")]
    UnsupportedUrl(String),
}

/// Errors from schedule registration and evaluation.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid crontab: {0}")]
    InvalidCrontab(String),
    #[error("Interval must be positive and at most {} days", crate::models::MAX_INTERVAL_DAYS)]
    InvalidInterval,
    #[error("Scheduler store error: {0}")]
    Store(#[from] SchedulerStoreError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
