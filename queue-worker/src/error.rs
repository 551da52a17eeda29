use queue_common::QueueError;
use thiserror::Error;

/// Enumeration of errors related to running the worker loop and supervising
/// worker processes.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("invalid worker settings: {0}")]
    Settings(String),
    #[error("failed to spawn worker process: {0}")]
    Spawn(std::io::Error),
    #[error("pid registry error: {0}")]
    Io(#[from] std::io::Error),
}
