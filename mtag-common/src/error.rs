//! Common error types for the music tagger

use thiserror::Error;

/// Common result type for store, dispatcher and configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the job store, dispatcher and producers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error (serialization, corrupt rows, exhausted retries)
    #[error("Internal error: {0}")]
    Internal(String),

    /// A job for this path already exists; creation is a no-op for callers
    #[error("Job already exists for path: {0}")]
    DuplicatePath(String),

    /// No job with this id
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    /// Conditional transition precondition failed (job moved or never existed)
    #[error("Job {job_id} is no longer in state {expected}")]
    ClaimConflict { job_id: i64, expected: String },

    /// Requested edge is not part of the job state machine
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl Error {
    /// True for SQLite lock contention that is worth retrying
    pub fn is_lock_error(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
