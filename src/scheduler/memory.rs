//! In-memory scheduler store for single-process operation and tests.
//!
//! Entries are not persisted across restarts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{SchedulerEntry, SchedulerStore, SchedulerStoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, SchedulerEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchedulerStore for MemoryStore {
    async fn save(&self, entry: &SchedulerEntry) -> Result<(), SchedulerStoreError> {
        self.entries
            .write()
            .await
            .insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<SchedulerEntry>, SchedulerStoreError> {
        Ok(self.entries.read().await.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool, SchedulerStoreError> {
        Ok(self.entries.write().await.remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerStoreError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn record_run(&self, name: &str, at: DateTime<Utc>) -> Result<bool, SchedulerStoreError> {
        match self.entries.write().await.get_mut(name) {
            Some(entry) => {
                entry.mark_run(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
