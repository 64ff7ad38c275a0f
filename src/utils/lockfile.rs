//! Exclusive lock files.
//!
//! Independent processes (API, workers, maintenance jobs) append to the same
//! job log. A writer first creates `<path>.lock` with create-exclusive
//! semantics, retrying a bounded number of times, and removes it when the
//! guard is dropped.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Timed out waiting for lock {0} after {1} attempts")]
    Timeout(PathBuf, u32),
    #[error("IO error on lock {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

/// Guard for a held lock file.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Lock file path for a resource.
    pub fn lock_path(resource: &Path) -> PathBuf {
        let mut name = resource.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock for `resource`, trying `retries + 1` times with
    /// `delay` between attempts.
    pub async fn acquire(resource: &Path, retries: u32, delay: Duration) -> Result<Self, LockError> {
        let path = Self::lock_path(resource);

        for attempt in 0..=retries {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt < retries {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(LockError::Io(path, e)),
            }
        }

        Err(LockError::Timeout(path, retries + 1))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Append one line to `log` while holding its lock.
pub async fn append_locked(
    log: &Path,
    line: &str,
    retries: u32,
    delay: Duration,
) -> Result<(), LockError> {
    let _guard = LockFile::acquire(log, retries, delay).await?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .map_err(|e| LockError::Io(log.to_path_buf(), e))?;
    writeln!(file, "{}", line).map_err(|e| LockError::Io(log.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("jobs.log");

        let held = LockFile::acquire(&log, 0, Duration::ZERO).await.unwrap();
        assert_eq!(held.path(), dir.path().join("jobs.log.lock"));
        assert!(held.path().exists());

        let err = LockFile::acquire(&log, 2, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout(_, 3)));

        drop(held);
        assert!(!LockFile::lock_path(&log).exists());
        assert!(LockFile::acquire(&log, 0, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_append_locked() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("jobs.log");

        append_locked(&log, "first", 0, Duration::ZERO).await.unwrap();
        append_locked(&log, "second", 0, Duration::ZERO).await.unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "first\nsecond\n");
        assert!(!LockFile::lock_path(&log).exists());
    }
}
