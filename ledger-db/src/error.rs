//! Database error types

use thiserror::Error;

/// Database error type
#[derive(Error, Debug)]
pub enum DbError {
    /// Backend I/O or storage-engine failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Overlay commit exhausted its retry budget
    #[error("commit failed after {attempts} attempts: {last_error}")]
    CommitFailed { attempts: u32, last_error: String },
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
