//! Broker error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Task already claimed by another worker")]
    AlreadyClaimed,
    #[error("Invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
}
