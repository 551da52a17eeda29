//! Worker side of the queuectl job queue: the claim/execute/record loop and
//! the supervisor that manages worker processes through the pid registry.

mod config;
pub use config::EnvMsDuration;
pub use config::WorkerSettings;

mod error;
pub use error::WorkerError;

mod executor;
pub use executor::ExecOutcome;

mod worker;
pub use worker::install_shutdown_handler;
pub use worker::run_worker_loop;
pub use worker::Worker;

mod supervisor;
pub use supervisor::active_count;
pub use supervisor::start_workers;
pub use supervisor::stop_workers;
