//! Redis-backed scheduler store for deployments where several beat or API
//! processes share one scheduler.
//!
//! Entries live in a single hash keyed by entry name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{SchedulerEntry, SchedulerStore, SchedulerStoreError, RECORD_RUN_ATTEMPTS};

/// Hash holding every entry.
const ENTRIES_KEY: &str = "meteodist:scheduler:entries";

/// Replace a hash field only if it still holds the expected value.
/// Returns -1 if the field is gone, 0 on mismatch, 1 when swapped.
const SWAP_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then return -1 end
if current ~= ARGV[2] then return 0 end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
"#;

pub struct RedisSchedulerStore {
    conn: ConnectionManager,
}

impl RedisSchedulerStore {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    pub async fn new(redis_url: &str) -> Result<Self, SchedulerStoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SchedulerStoreError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            SchedulerStoreError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }
}

fn unavailable(e: redis::RedisError) -> SchedulerStoreError {
    SchedulerStoreError::Unavailable(e.to_string())
}

#[async_trait]
impl SchedulerStore for RedisSchedulerStore {
    async fn save(&self, entry: &SchedulerEntry) -> Result<(), SchedulerStoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(entry)?;

        conn.hset::<_, _, _, ()>(ENTRIES_KEY, &entry.name, value)
            .await
            .map_err(unavailable)
    }

    async fn get(&self, name: &str) -> Result<Option<SchedulerEntry>, SchedulerStoreError> {
        let mut conn = self.conn.clone();

        let value: Option<String> = conn.hget(ENTRIES_KEY, name).await.map_err(unavailable)?;
        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, SchedulerStoreError> {
        let mut conn = self.conn.clone();

        let removed: i64 = conn.hdel(ENTRIES_KEY, name).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerStoreError> {
        let mut conn = self.conn.clone();

        let values: Vec<(String, String)> = conn.hgetall(ENTRIES_KEY).await.map_err(unavailable)?;
        let mut entries = Vec::with_capacity(values.len());
        for (name, value) in values {
            match serde_json::from_str::<SchedulerEntry>(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(key = %name, "skipping unreadable scheduler entry: {}", e),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn record_run(&self, name: &str, at: DateTime<Utc>) -> Result<bool, SchedulerStoreError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(SWAP_SCRIPT);

        for _ in 0..RECORD_RUN_ATTEMPTS {
            let current: Option<String> = conn.hget(ENTRIES_KEY, name).await.map_err(unavailable)?;
            let Some(current) = current else {
                return Ok(false);
            };

            let mut entry: SchedulerEntry = serde_json::from_str(&current)?;
            entry.mark_run(at);
            let next = serde_json::to_string(&entry)?;

            let swapped: i64 = script
                .key(ENTRIES_KEY)
                .arg(name)
                .arg(&current)
                .arg(&next)
                .invoke_async(&mut conn)
                .await
                .map_err(unavailable)?;
            match swapped {
                1 => return Ok(true),
                -1 => return Ok(false),
                _ => continue,
            }
        }

        Err(SchedulerStoreError::Unavailable(format!(
            "entry {} kept changing while recording a run",
            name
        )))
    }
}
