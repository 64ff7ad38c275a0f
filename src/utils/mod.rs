//! Shared utilities:
//! - `format`: human-readable sizes for CLI output
//! - `lockfile`: exclusive lock files guarding shared logs

mod format;
pub mod lockfile;

pub use format::format_size;
pub use lockfile::{append_locked, LockError, LockFile};
