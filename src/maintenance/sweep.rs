//! Orphan-file sweeper for the download tree.
//!
//! Layout is `<download_dir>/<user_id>/<filename>`. Temporary files are
//! removed unconditionally. Finished files without a FileOutput row are
//! removed once older than `min_age`, which covers a worker that has written
//! its output but not yet registered it. FileOutput rows whose file is gone
//! are deleted as well.
//!
//! Workers keep writing while the sweep runs, so files may vanish between
//! listing and removal. A failed removal is logged and the sweep moves on.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::MaintenanceError;
use crate::postprocess::TMP_SUFFIX;
use crate::repository::DbContext;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub temp_removed: usize,
    pub orphans_removed: usize,
    pub rows_removed: usize,
    pub kept: usize,
    pub failed: usize,
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temp_removed={} orphans_removed={} rows_removed={} kept={} failed={}",
            self.temp_removed,
            self.orphans_removed,
            self.rows_removed,
            self.kept,
            self.failed
        )
    }
}

pub struct OrphanSweeper {
    ctx: DbContext,
    download_dir: PathBuf,
    min_age: Duration,
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if let Err(e) = collect_files(&entry.path(), files) {
                tracing::warn!(path = %entry.path().display(), "skipping directory: {}", e);
            }
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

enum Removal {
    Removed,
    Vanished,
    Failed,
}

fn remove(path: &Path) -> Removal {
    match std::fs::remove_file(path) {
        Ok(()) => Removal::Removed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Removal::Vanished,
        Err(e) => {
            tracing::warn!(path = %path.display(), "could not remove file: {}", e);
            Removal::Failed
        }
    }
}

fn age_of(path: &Path, now: SystemTime) -> Duration {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

impl OrphanSweeper {
    pub fn new(ctx: DbContext, download_dir: PathBuf, min_age: Duration) -> Self {
        Self {
            ctx,
            download_dir,
            min_age,
        }
    }

    fn output_path(&self, user_id: i32, filename: &str) -> PathBuf {
        self.download_dir.join(user_id.to_string()).join(filename)
    }

    pub async fn run(&self) -> Result<SweepSummary, MaintenanceError> {
        let mut summary = SweepSummary::default();

        let rows = self.ctx.file_outputs().list_all().await?;
        let mut known = HashSet::with_capacity(rows.len());
        for row in rows {
            let path = self.output_path(row.user_id, &row.filename);
            if path.is_file() {
                known.insert(path);
            } else {
                tracing::info!(file_output_id = row.id, path = %path.display(), "file missing, removing row");
                self.ctx.file_outputs().delete(row.id).await?;
                summary.rows_removed += 1;
            }
        }

        if !self.download_dir.is_dir() {
            return Ok(summary);
        }
        let mut files = Vec::new();
        collect_files(&self.download_dir, &mut files)?;
        self.sweep_files(files, &known, SystemTime::now(), &mut summary);

        Ok(summary)
    }

    fn sweep_files(
        &self,
        files: Vec<PathBuf>,
        known: &HashSet<PathBuf>,
        now: SystemTime,
        summary: &mut SweepSummary,
    ) {
        for path in files {
            let is_temp = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(TMP_SUFFIX));

            if is_temp {
                match remove(&path) {
                    Removal::Removed => {
                        tracing::debug!(path = %path.display(), "removed temporary file");
                        summary.temp_removed += 1;
                    }
                    Removal::Vanished => {}
                    Removal::Failed => summary.failed += 1,
                }
            } else if known.contains(&path) {
                summary.kept += 1;
            } else if age_of(&path, now) >= self.min_age {
                match remove(&path) {
                    Removal::Removed => {
                        tracing::info!(path = %path.display(), "removed orphaned file");
                        summary.orphans_removed += 1;
                    }
                    Removal::Vanished => {}
                    Removal::Failed => summary.failed += 1,
                }
            } else {
                summary.kept += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestArgs;
    use crate::repository::{NewRequestSpec, UserSpec};
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sweep() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let user = ctx.users().create(&UserSpec::new("a@example.org", "A")).await.unwrap();
        let downloads = dir.path().join("downloads");
        let user_dir = downloads.join(user.id.to_string());
        fs::create_dir_all(&user_dir).unwrap();

        let mut request_ids = Vec::new();
        for task_id in ["kept", "gone"] {
            let request = ctx
                .requests()
                .create(
                    &NewRequestSpec {
                        user_id: user.id,
                        name: task_id.to_string(),
                        args: RequestArgs::default(),
                        task_id: task_id.to_string(),
                        schedule_id: None,
                    },
                    Utc::now(),
                )
                .await
                .unwrap();
            request_ids.push(request.id);
        }
        ctx.file_outputs()
            .create("kept.grib", 4, user.id, request_ids[0])
            .await
            .unwrap();
        ctx.file_outputs()
            .create("gone.grib", 4, user.id, request_ids[1])
            .await
            .unwrap();

        fs::write(user_dir.join("kept.grib"), b"GRIB").unwrap();
        fs::write(user_dir.join("scratch.grib.tmp"), b"x").unwrap();
        fs::write(user_dir.join("orphan.json"), b"{}").unwrap();

        let sweeper = OrphanSweeper::new(ctx.clone(), downloads.clone(), Duration::ZERO);
        let summary = sweeper.run().await.unwrap();
        assert_eq!(
            summary,
            SweepSummary {
                temp_removed: 1,
                orphans_removed: 1,
                rows_removed: 1,
                kept: 1,
                failed: 0,
            }
        );

        assert!(user_dir.join("kept.grib").exists());
        assert!(!user_dir.join("scratch.grib.tmp").exists());
        assert!(!user_dir.join("orphan.json").exists());
        assert!(ctx.file_outputs().get_by_filename("gone.grib").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_young_orphans_survive() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(downloads.join("1")).unwrap();
        fs::write(downloads.join("1").join("fresh.bufr"), b"BUFR").unwrap();

        let sweeper = OrphanSweeper::new(ctx, downloads.clone(), Duration::from_secs(3600));
        let summary = sweeper.run().await.unwrap();
        assert_eq!(summary.orphans_removed, 0);
        assert_eq!(summary.kept, 1);
        assert!(downloads.join("1").join("fresh.bufr").exists());
    }

    #[tokio::test]
    async fn test_vanished_files_do_not_stop_the_sweep() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let downloads = dir.path().join("downloads");
        let user_dir = downloads.join("1");
        fs::create_dir_all(&user_dir).unwrap();
        fs::write(user_dir.join("late.grib.tmp"), b"x").unwrap();
        fs::write(user_dir.join("orphan.grib"), b"GRIB").unwrap();

        let mut files = Vec::new();
        collect_files(&downloads, &mut files).unwrap();
        // A pipeline stage renames its input after the listing.
        fs::remove_file(user_dir.join("late.grib.tmp")).unwrap();

        let sweeper = OrphanSweeper::new(ctx, downloads, Duration::ZERO);
        let mut summary = SweepSummary::default();
        sweeper.sweep_files(files, &HashSet::new(), SystemTime::now(), &mut summary);

        assert_eq!(summary.temp_removed, 0);
        assert_eq!(summary.orphans_removed, 1);
        assert_eq!(summary.failed, 0);
        assert!(!user_dir.join("orphan.grib").exists());
    }
}
