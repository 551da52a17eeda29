use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::QueueError;
use crate::ops;
use crate::types::Job;

/// How long a connection waits for the store's write lock before giving up.
/// Claims that hit this window are treated as "no job available this tick".
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// A handle on the durable store. Cheap to clone; all operations go through
/// the inner connection pool.
#[derive(Clone)]
pub struct Queue {
    pool: SqlitePool,
}

impl Queue {
    /// Open the store at `path`, creating the file and the schema if needed.
    /// Runs in WAL mode so readers do not block writers.
    pub async fn open(path: &Path) -> Result<Self, QueueError> {
        tracing::debug!(path = %path.display(), "opening job store");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let queue = Self { pool };
        queue.init_schema().await?;

        Ok(queue)
    }

    /// Idempotent schema creation. Safe to run on every open.
    async fn init_schema(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    run_at TEXT NOT NULL,
    stdout TEXT,
    stderr TEXT
)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS dlq (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'dead',
    attempts INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    failed_at TEXT NOT NULL,
    stdout TEXT,
    stderr TEXT
)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
CREATE INDEX IF NOT EXISTS idx_jobs_pending_run_at
ON jobs (state, run_at)
WHERE state = 'pending'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, checkpointing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Worker-side operations. The control plane goes through
/// [`crate::JobManager`] instead.
impl Queue {
    /// Claim the oldest eligible pending job, if any. Lock contention is
    /// absorbed and reported as `None` so callers treat it as an idle tick.
    pub async fn claim_job(&self) -> Result<Option<Job>, QueueError> {
        ops::worker::claim_job(&self.pool, Utc::now()).await
    }

    /// Record a successful attempt.
    pub async fn complete_job(
        &self,
        id: &str,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) -> Result<(), QueueError> {
        ops::worker::complete_job(&self.pool, id, stdout, stderr, Utc::now()).await
    }

    /// Schedule a failed job for another attempt `delay` from now. The
    /// recorded `updated_at` and the new `run_at` are derived from the same
    /// instant, so `run_at - updated_at` is exactly the backoff delay.
    pub async fn retry_job(
        &self,
        id: &str,
        attempts: i64,
        delay: Duration,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        let run_at = now
            .checked_add_signed(chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        ops::worker::retry_job(&self.pool, id, attempts, run_at, stdout, stderr, now).await
    }

    /// Move a job that exhausted its retry budget into the dead letter table.
    pub async fn bury_job(
        &self,
        job: &Job,
        attempts: i64,
        stdout: Option<&str>,
        stderr: Option<&str>,
    ) -> Result<(), QueueError> {
        ops::worker::bury_job(&self.pool, job, attempts, stdout, stderr, Utc::now()).await
    }
}

/// Whether an error is SQLite reporting that another writer holds the lock.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err.as_database_error() {
        Some(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("database is locked") || message.contains("database is busy")
        }
        None => false,
    }
}

/// Whether an error is a primary-key / unique-index conflict.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
