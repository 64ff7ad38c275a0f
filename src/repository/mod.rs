//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM over SQLite through diesel-async's
//! sync connection wrapper.

pub mod access_keys;
pub mod context;
pub mod file_outputs;
pub mod models;
pub mod pool;
pub mod requests;
pub mod schedules;
pub mod users;
pub mod util;

pub use access_keys::AccessKeyRepository;
pub use context::DbContext;
pub use file_outputs::FileOutputRepository;
pub use pool::{DbError, DbPool, SqliteConn};
pub use requests::{NewRequestSpec, RequestRepository};
pub use schedules::{NewScheduleSpec, ScheduleRepository};
pub use users::{UserRepository, UserSpec};
pub use util::{format_datetime, parse_datetime, parse_datetime_opt, to_diesel_error};
