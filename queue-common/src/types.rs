use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enumeration of possible states for a job.
///
/// `Failed` is accepted as a list filter for compatibility but is never
/// persisted: a failing attempt either reschedules the job as `Pending` or
/// moves it to the dead letter table as `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            _ => Err(()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// The chunk of data needed to enqueue a job. Unknown keys in the payload
/// are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobInit {
    pub id: Option<String>,
    pub command: String,
    pub max_retries: Option<u32>,
    pub run_at: Option<DateTime<Utc>>,
}

/// A row of the active `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    /// A unique id identifying a job. Unique across the active table and the
    /// dead letter table together.
    pub id: String,
    /// Opaque shell command line to execute.
    pub command: String,
    pub state: JobState,
    /// Count of completed execution attempts.
    pub attempts: i64,
    /// Retry budget, immutable after enqueue.
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The job is not eligible to claim until the wall clock passes this.
    pub run_at: DateTime<Utc>,
    /// Captured output of the most recent attempt.
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// A row of the dead letter table. Same shape as [`Job`] minus scheduling
/// fields, plus the time of the terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadJob {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Projection returned by the `logs` operation. For dead jobs `updated_at`
/// carries the `failed_at` timestamp.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobLogs {
    pub id: String,
    pub state: JobState,
    pub updated_at: DateTime<Utc>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}
