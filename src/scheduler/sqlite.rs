//! SQLite key-value scheduler store.
//!
//! Lives in its own database file, separate from the request ledger, so the
//! beat can run against it without touching the main schema. Values are the
//! JSON-serialized entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};

use super::{SchedulerEntry, SchedulerStore, SchedulerStoreError, RECORD_RUN_ATTEMPTS};
use crate::repository::{format_datetime, DbPool};
use crate::schema::scheduler_entries;

#[derive(Clone)]
pub struct SqliteSchedulerStore {
    pool: DbPool,
}

impl SqliteSchedulerStore {
    /// Create a store from a `sqlite:` URL or a plain file path.
    pub fn new(url: &str) -> Self {
        Self {
            pool: DbPool::new(url),
        }
    }

    /// Create the entries table if it does not exist.
    pub async fn init(&self) -> Result<(), SchedulerStoreError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SchedulerStore for SqliteSchedulerStore {
    async fn save(&self, entry: &SchedulerEntry) -> Result<(), SchedulerStoreError> {
        let value = serde_json::to_string(entry)?;
        let mut conn = self.pool.get().await?;

        diesel::replace_into(scheduler_entries::table)
            .values((
                scheduler_entries::key.eq(&entry.name),
                scheduler_entries::value.eq(&value),
                scheduler_entries::updated_at.eq(format_datetime(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<SchedulerEntry>, SchedulerStoreError> {
        let mut conn = self.pool.get().await?;

        let value = scheduler_entries::table
            .find(name)
            .select(scheduler_entries::value)
            .first::<String>(&mut conn)
            .await
            .optional()?;

        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, SchedulerStoreError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(scheduler_entries::table.find(name))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerStoreError> {
        let mut conn = self.pool.get().await?;

        let rows = scheduler_entries::table
            .select((scheduler_entries::key, scheduler_entries::value))
            .order(scheduler_entries::key.asc())
            .load::<(String, String)>(&mut conn)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match serde_json::from_str(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(key = %key, "skipping unreadable scheduler entry: {}", e),
            }
        }
        Ok(entries)
    }

    async fn record_run(&self, name: &str, at: DateTime<Utc>) -> Result<bool, SchedulerStoreError> {
        let mut conn = self.pool.get().await?;

        for _ in 0..RECORD_RUN_ATTEMPTS {
            let current = scheduler_entries::table
                .find(name)
                .select(scheduler_entries::value)
                .first::<String>(&mut conn)
                .await
                .optional()?;
            let Some(current) = current else {
                return Ok(false);
            };

            let mut entry: SchedulerEntry = serde_json::from_str(&current)?;
            entry.mark_run(at);
            let next = serde_json::to_string(&entry)?;

            // Only swap in the new value if nobody wrote the entry meanwhile.
            let rows = diesel::update(
                scheduler_entries::table
                    .filter(scheduler_entries::key.eq(name))
                    .filter(scheduler_entries::value.eq(&current)),
            )
            .set((
                scheduler_entries::value.eq(&next),
                scheduler_entries::updated_at.eq(format_datetime(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
            if rows == 1 {
                return Ok(true);
            }
        }

        Err(SchedulerStoreError::Unavailable(format!(
            "entry {} kept changing while recording a run",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PeriodUnit, ScheduleKind};
    use crate::queue::TaskPayload;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_replaces_and_delete() {
        let dir = tempdir().unwrap();
        let store = SqliteSchedulerStore::new(&dir.path().join("beat.db").display().to_string());
        store.init().await.unwrap();

        let mut entry = SchedulerEntry::new(
            "schedule-7-hourly",
            TaskPayload::ScheduledExtract { schedule_id: 7 },
            ScheduleKind::Interval {
                every: 1,
                period: PeriodUnit::Hours,
            },
            "operational_observed",
            "operational_observed",
            Utc::now(),
        );
        store.save(&entry).await.unwrap();

        entry.mark_run(Utc::now());
        store.save(&entry).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total_run_count, 1);
        assert_eq!(store.get("schedule-7-hourly").await.unwrap(), Some(entry));

        let at = Utc::now();
        assert!(store.record_run("schedule-7-hourly", at).await.unwrap());
        let recorded = store.get("schedule-7-hourly").await.unwrap().unwrap();
        assert_eq!(recorded.total_run_count, 2);
        assert_eq!(recorded.last_run_at, Some(at));

        assert!(store.delete("schedule-7-hourly").await.unwrap());
        assert!(!store.record_run("schedule-7-hourly", at).await.unwrap());
        assert!(!store.delete("schedule-7-hourly").await.unwrap());
        assert!(store.get("schedule-7-hourly").await.unwrap().is_none());
    }
}
