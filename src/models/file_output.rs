//! Files produced by successful extractions.

use serde::Serialize;

/// A downloadable output file. Exactly one request owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutput {
    pub id: i32,
    /// Base name of the file inside the owner's download directory.
    pub filename: String,
    pub size: i64,
    pub user_id: i32,
    pub request_id: i32,
}
