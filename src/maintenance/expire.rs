//! Request expiry for users with automatic deletion.
//!
//! A finished request is removed once its end date is older than the
//! owner's `request_expiration_days`, together with its FileOutput row and
//! the file on disk. Requests still in flight are never touched.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

use super::MaintenanceError;
use crate::postprocess::remove_quietly;
use crate::repository::DbContext;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpireSummary {
    pub users: usize,
    pub requests_removed: usize,
    pub files_removed: usize,
}

impl fmt::Display for ExpireSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "users={} requests_removed={} files_removed={}",
            self.users, self.requests_removed, self.files_removed
        )
    }
}

pub struct RequestExpirer {
    ctx: DbContext,
    download_dir: PathBuf,
}

impl RequestExpirer {
    pub fn new(ctx: DbContext, download_dir: PathBuf) -> Self {
        Self { ctx, download_dir }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<ExpireSummary, MaintenanceError> {
        let mut summary = ExpireSummary::default();

        for user in self.ctx.users().list_auto_delete().await? {
            let Some(days) = user.request_expiration_days else {
                continue;
            };
            summary.users += 1;
            let cutoff = now - Duration::days(i64::from(days));

            for request in self.ctx.requests().list_finished_before(user.id, cutoff).await? {
                if let Some(output) = self.ctx.file_outputs().get_for_request(request.id).await? {
                    let path = self
                        .download_dir
                        .join(user.id.to_string())
                        .join(&output.filename);
                    remove_quietly(&path);
                    self.ctx.file_outputs().delete(output.id).await?;
                    summary.files_removed += 1;
                }
                self.ctx.requests().delete(request.id).await?;
                tracing::info!(
                    request_id = request.id,
                    user_id = user.id,
                    ended = ?request.end_date,
                    "expired request removed"
                );
                summary.requests_removed += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestArgs, RequestStatus};
    use crate::repository::{NewRequestSpec, UserSpec};
    use std::fs;
    use tempfile::tempdir;

    fn spec(user_id: i32, task_id: &str) -> NewRequestSpec {
        NewRequestSpec {
            user_id,
            name: task_id.to_string(),
            args: RequestArgs::default(),
            task_id: task_id.to_string(),
            schedule_id: None,
        }
    }

    #[tokio::test]
    async fn test_expired_requests_removed_for_auto_delete_users() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let downloads = dir.path().join("downloads");

        let mut tidy = UserSpec::new("tidy@example.org", "Tidy");
        tidy.auto_delete = true;
        tidy.request_expiration_days = Some(7);
        let tidy = ctx.users().create(&tidy).await.unwrap();
        let mut keeper = UserSpec::new("keep@example.org", "Keeper");
        keeper.request_expiration_days = Some(7);
        let keeper = ctx.users().create(&keeper).await.unwrap();

        let now = Utc::now();
        let long_ago = now - Duration::days(10);
        let requests = ctx.requests();

        let old = requests.create(&spec(tidy.id, "old"), long_ago).await.unwrap();
        requests
            .transition(old.id, &RequestStatus::Success, None, long_ago)
            .await
            .unwrap();
        ctx.file_outputs().create("old.grib", 4, tidy.id, old.id).await.unwrap();
        let tidy_dir = downloads.join(tidy.id.to_string());
        fs::create_dir_all(&tidy_dir).unwrap();
        fs::write(tidy_dir.join("old.grib"), b"GRIB").unwrap();

        let recent = requests.create(&spec(tidy.id, "recent"), now).await.unwrap();
        requests
            .transition(recent.id, &RequestStatus::Failure, Some("x"), now)
            .await
            .unwrap();
        let running = requests.create(&spec(tidy.id, "running"), long_ago).await.unwrap();

        let kept = requests.create(&spec(keeper.id, "kept"), long_ago).await.unwrap();
        requests
            .transition(kept.id, &RequestStatus::Success, None, long_ago)
            .await
            .unwrap();

        let summary = RequestExpirer::new(ctx.clone(), downloads).run(now).await.unwrap();
        assert_eq!(
            summary,
            ExpireSummary {
                users: 1,
                requests_removed: 1,
                files_removed: 1,
            }
        );

        assert!(requests.get(old.id).await.unwrap().is_none());
        assert!(!tidy_dir.join("old.grib").exists());
        assert!(ctx.file_outputs().get_by_filename("old.grib").await.unwrap().is_none());
        assert!(requests.get(recent.id).await.unwrap().is_some());
        assert!(requests.get(running.id).await.unwrap().is_some());
        assert!(requests.get(kept.id).await.unwrap().is_some());
    }
}
