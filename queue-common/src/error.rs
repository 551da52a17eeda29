use thiserror::Error;

/// Enumeration of errors surfaced by queue operations.
///
/// The CLI maps every variant to a non-zero exit; workers absorb `Database`
/// errors and keep looping.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("a job with id {0} already exists")]
    DuplicateId(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} already exists in the active queue")]
    Conflict(String),
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not determine a home directory")]
    NoHomeDir,
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode json: {0}")]
    Json(#[from] serde_json::Error),
}
