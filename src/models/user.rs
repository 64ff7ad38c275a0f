//! User accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A registered user of the distribution service.
///
/// Relations are declared explicitly in `schema.rs` (`joinable!`) and reached
/// through the repositories: requests, file outputs, schedules and the single
/// access key are all keyed by `id`.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    /// Login name for HTTP Basic credentials.
    pub email: String,
    pub name: String,
    /// Disk quota in bytes.
    pub disk_quota: i64,
    /// Maximum submissions per rolling hour (0 = unlimited).
    pub max_requests_per_hour: i32,
    /// Days after which finished requests may be cleaned up.
    pub request_expiration_days: Option<i32>,
    /// Whether expired requests are deleted automatically.
    pub auto_delete: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the user is subject to an hourly submission limit.
    pub fn is_rate_limited(&self) -> bool {
        self.max_requests_per_hour > 0
    }
}
