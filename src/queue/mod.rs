//! Task queue abstraction: a broker that hands tasks to workers and a
//! result backend that records their final state.
//!
//! The database implementations are the only ones shipped; the traits keep
//! the API, beat and worker independent of where tasks actually live.

mod db;
mod error;
mod results;

pub use db::DbBroker;
pub use error::BrokerError;
pub use results::{DbResultBackend, ResultBackend, TaskResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Work carried by a queued task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Run the extraction behind an existing request row.
    DataExtract { request_id: i32 },
    /// Run a schedule; the worker creates the request row on pickup.
    ScheduledExtract { schedule_id: i32 },
}

impl TaskPayload {
    pub fn task_name(&self) -> &'static str {
        match self {
            Self::DataExtract { .. } => "data_extract",
            Self::ScheduledExtract { .. } => "scheduled_extract",
        }
    }
}

/// A task as stored by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    pub task_id: String,
    pub queue: String,
    pub routing_key: String,
    pub payload: TaskPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(task_id: String, queue: &str, routing_key: &str, payload: TaskPayload) -> Self {
        Self {
            task_id,
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// New random task identifier.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A broker that manages the enqueue/claim/complete lifecycle.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Make a task available on its queue.
    async fn enqueue(&self, task: &TaskMessage) -> Result<(), BrokerError>;

    /// Claim the oldest available task on any of `queues`.
    ///
    /// Returns `Ok(None)` when every queue is empty.
    async fn claim(
        &self,
        queues: &[String],
        worker: &str,
    ) -> Result<Option<TaskMessage>, BrokerError>;

    /// Remove a claimed task once its outcome has been recorded.
    async fn complete(&self, task_id: &str) -> Result<(), BrokerError>;

    /// Withdraw a task that no worker has claimed yet.
    ///
    /// Returns `false` if the task was already claimed or never existed.
    async fn revoke(&self, task_id: &str) -> Result<bool, BrokerError>;
}
