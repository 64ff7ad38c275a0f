//! Periodic scheduling: the scheduler store, the schedule registry that
//! keeps it in step with the ledger, and the beat loop that fires due
//! entries.
//!
//! Backends for the store:
//! - In-memory (tests, single process)
//! - SQLite key-value file (default)
//! - Redis (`redis-backend` feature)

mod beat;
mod error;
mod memory;
mod registry;
mod sqlite;

#[cfg(feature = "redis-backend")]
mod redis;

pub use beat::Beat;
pub use error::{ScheduleError, SchedulerStoreError};
pub use memory::MemoryStore;
pub use registry::{ReconcileReport, ScheduleRegistry};
pub use sqlite::SqliteSchedulerStore;

#[cfg(feature = "redis-backend")]
pub use self::redis::RedisSchedulerStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ScheduleKind;
use crate::queue::TaskPayload;

/// Queue and routing key a fired entry is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    pub queue: String,
    pub routing_key: String,
}

/// A scheduler-native periodic task, stored as JSON under its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEntry {
    pub name: String,
    pub task: String,
    pub payload: TaskPayload,
    pub schedule: ScheduleKind,
    pub options: EntryOptions,
    pub enabled: bool,
    /// Entries fired by data ingestion are skipped by the beat.
    #[serde(default)]
    pub on_data_ready: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_run_count: u64,
}

impl SchedulerEntry {
    pub fn new(
        name: &str,
        payload: TaskPayload,
        schedule: ScheduleKind,
        queue: &str,
        routing_key: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            task: payload.task_name().to_string(),
            payload,
            schedule,
            options: EntryOptions {
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            },
            enabled: true,
            on_data_ready: false,
            created_at: now,
            last_run_at: None,
            total_run_count: 0,
        }
    }

    /// Next time the entry should fire, counted from its last run (or its
    /// creation if it never ran).
    pub fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let anchor = self.last_run_at.unwrap_or(self.created_at);
        match &self.schedule {
            ScheduleKind::Interval { every, period } => {
                if self.last_run_at.is_none() {
                    return Ok(Some(self.created_at));
                }
                let step = period
                    .duration(*every)
                    .ok_or(ScheduleError::InvalidInterval)?;
                anchor
                    .checked_add_signed(step)
                    .map(Some)
                    .ok_or(ScheduleError::InvalidInterval)
            }
            ScheduleKind::Crontab(tab) => {
                let cron = tab
                    .parse()
                    .map_err(|e| ScheduleError::InvalidCrontab(e.to_string()))?;
                Ok(cron.after(&anchor).next())
            }
        }
    }

    /// Whether the beat should fire this entry at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
        if !self.enabled || self.on_data_ready {
            return Ok(false);
        }
        Ok(self.next_run_at()?.is_some_and(|next| next <= now))
    }

    /// Bookkeeping after a run.
    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.total_run_count += 1;
    }
}

/// Storage for scheduler entries keyed by name.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Insert or replace an entry.
    async fn save(&self, entry: &SchedulerEntry) -> Result<(), SchedulerStoreError>;

    async fn get(&self, name: &str) -> Result<Option<SchedulerEntry>, SchedulerStoreError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, name: &str) -> Result<bool, SchedulerStoreError>;

    /// All entries, ordered by name.
    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerStoreError>;

    /// Record a run on the stored entry, leaving every other field as it is
    /// now in the store. Returns false if the entry no longer exists.
    async fn record_run(&self, name: &str, at: DateTime<Utc>) -> Result<bool, SchedulerStoreError>;
}

/// Attempts at a compare-and-swap before giving up on a contended entry.
const RECORD_RUN_ATTEMPTS: usize = 5;

/// Open the store named by a URL: `memory`, `sqlite:<path>` or, with the
/// `redis-backend` feature, `redis://...`.
pub async fn open_store(url: &str) -> Result<Arc<dyn SchedulerStore>, SchedulerStoreError> {
    if url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis-backend")]
        {
            return Ok(Arc::new(RedisSchedulerStore::new(url).await?));
        }
        #[cfg(not(feature = "redis-backend"))]
        {
            return Err(SchedulerStoreError::UnsupportedUrl(format!(
                "{} (built without redis-backend)",
                url
            )));
        }
    }
    if url.starts_with("sqlite:") || !url.contains("://") {
        let store = SqliteSchedulerStore::new(url);
        store.init().await?;
        return Ok(Arc::new(store));
    }
    Err(SchedulerStoreError::UnsupportedUrl(url.to_string()))
}
