//! Shared core of the queuectl job queue: the durable store, the job data
//! model, the config provider, and the control-plane job manager.

mod ops;

// Modules stay private; the items below are the crate's whole surface, so
// internal layout can change without touching callers.

// Types
mod types;
pub use types::DeadJob;
pub use types::Job;
pub use types::JobInit;
pub use types::JobLogs;
pub use types::JobState;

// Errors
mod error;
pub use error::QueueError;

// Store
mod queue;
pub use queue::Queue;

// Retry policy
mod retry;
pub use retry::RetryPolicy;

// Config provider and on-disk layout
mod config;
pub use config::Config;
pub use config::DataDir;
pub use config::ConfigKey;

// Job manager
mod manager;
pub use manager::JobManager;
