//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and provides access to all repositories.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::access_keys::AccessKeyRepository;
use super::file_outputs::FileOutputRepository;
use super::pool::{DbError, DbPool};
use super::requests::RequestRepository;
use super::schedules::ScheduleRepository;
use super::users::UserRepository;

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:/var/lib/meteodist/meteodist.db");
/// let user = ctx.users().get_by_email("someone@example.org").await?;
/// ```
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database URL or file path.
    pub fn from_url(url: &str) -> Self {
        Self {
            pool: DbPool::new(url),
        }
    }

    /// Create a context from a database file path.
    pub fn from_path(path: &Path) -> Self {
        Self {
            pool: DbPool::from_path(path),
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn access_keys(&self) -> AccessKeyRepository {
        AccessKeyRepository::new(self.pool.clone())
    }

    pub fn requests(&self) -> RequestRepository {
        RequestRepository::new(self.pool.clone())
    }

    pub fn file_outputs(&self) -> FileOutputRepository {
        FileOutputRepository::new(self.pool.clone())
    }

    pub fn schedules(&self) -> ScheduleRepository {
        ScheduleRepository::new(self.pool.clone())
    }

    /// Create all tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                disk_quota BIGINT NOT NULL DEFAULT 0,
                max_requests_per_hour INTEGER NOT NULL DEFAULT 0,
                request_expiration_days INTEGER,
                auto_delete INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_datasets (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                dataset_name TEXT NOT NULL,
                PRIMARY KEY (user_id, dataset_name)
            );

            CREATE TABLE IF NOT EXISTS access_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                token TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                expiration TEXT,
                scope TEXT
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                submission_date TEXT NOT NULL,
                args TEXT NOT NULL DEFAULT '{}',
                is_crontab INTEGER NOT NULL DEFAULT 0,
                period TEXT,
                every INTEGER,
                crontab TEXT,
                on_data_ready INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                state TEXT NOT NULL DEFAULT 'pending'
            );

            CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                args TEXT NOT NULL DEFAULT '{}',
                submission_date TEXT NOT NULL,
                end_date TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                task_id TEXT NOT NULL UNIQUE,
                error_message TEXT,
                schedule_id INTEGER REFERENCES schedules(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_requests_user ON requests(user_id, submission_date);
            CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);

            CREATE TABLE IF NOT EXISTS file_outputs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE,
                size BIGINT NOT NULL DEFAULT 0,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                request_id INTEGER NOT NULL UNIQUE REFERENCES requests(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_file_outputs_user ON file_outputs(user_id);

            CREATE TABLE IF NOT EXISTS task_queue (
                task_id TEXT PRIMARY KEY,
                task_name TEXT NOT NULL,
                queue TEXT NOT NULL,
                routing_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                claimed_at TEXT,
                claimed_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_task_queue_pending ON task_queue(queue, claimed_at, enqueued_at);

            CREATE TABLE IF NOT EXISTS task_results (
                task_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                error TEXT,
                date_done TEXT
            );
            "#,
        )
        .await
    }
}
