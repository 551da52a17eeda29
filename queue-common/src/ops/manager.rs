use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::QueueError;
use crate::queue::is_unique_violation;
use crate::types::{DeadJob, Job, JobInit, JobLogs, JobState};

/// Insert a new pending job, generating an id when the payload does not
/// carry one. The id must be unique across the active table and the dead
/// letter table together, so the existence check and the insert share one
/// transaction.
pub(crate) async fn enqueue_job(
    pool: &SqlitePool,
    config: &Config,
    init: JobInit,
    now: DateTime<Utc>,
) -> Result<String, QueueError> {
    if init.command.trim().is_empty() {
        return Err(QueueError::InvalidInput(
            "command must not be empty".to_owned(),
        ));
    }

    let id = init.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let max_retries = i64::from(init.max_retries.unwrap_or(config.max_retries));
    // A run_at in the past means "eligible now"; clamping keeps run_at from
    // preceding created_at.
    let run_at = init.run_at.map_or(now, |at| at.max(now));

    let mut tx = pool.begin().await?;

    let in_dlq: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dlq WHERE id = $1)")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;
    if in_dlq {
        return Err(QueueError::DuplicateId(id));
    }

    let inserted = sqlx::query(
        r#"
INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, run_at)
VALUES ($1, $2, 'pending', 0, $3, $4, $4, $5)
        "#,
    )
    .bind(&id)
    .bind(&init.command)
    .bind(max_retries)
    .bind(now)
    .bind(run_at)
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {
            tx.commit().await?;
            Ok(id)
        }
        Err(err) if is_unique_violation(&err) => Err(QueueError::DuplicateId(id)),
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn list_jobs(pool: &SqlitePool, state: JobState) -> Result<Vec<Job>, QueueError> {
    Ok(sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE state = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(state)
    .fetch_all(pool)
    .await?)
}

pub(crate) async fn list_dead(pool: &SqlitePool) -> Result<Vec<DeadJob>, QueueError> {
    Ok(
        sqlx::query_as::<_, DeadJob>("SELECT * FROM dlq ORDER BY failed_at ASC, id ASC")
            .fetch_all(pool)
            .await?,
    )
}

/// Per-state job counts, with the dead letter count folded in under `dead`.
/// `dead` is omitted entirely when the dead letter table is empty.
pub(crate) async fn status(pool: &SqlitePool) -> Result<BTreeMap<String, i64>, QueueError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
            .fetch_all(pool)
            .await?;
    let mut counts: BTreeMap<String, i64> = rows.into_iter().collect();

    let dead: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dlq")
        .fetch_one(pool)
        .await?;
    if dead > 0 {
        *counts.entry("dead".to_owned()).or_insert(0) += dead;
    }

    Ok(counts)
}

/// Move a dead job back to the active table with a fresh retry budget.
/// The read, the insert, and the delete share one transaction: a concurrent
/// enqueue of the same id aborts the whole move with `Conflict`.
pub(crate) async fn retry_dlq(
    pool: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    let mut tx = pool.begin().await?;

    let dead: Option<DeadJob> = sqlx::query_as("SELECT * FROM dlq WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(dead) = dead else {
        return Err(QueueError::NotFound(id.to_owned()));
    };

    let inserted = sqlx::query(
        r#"
INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, run_at)
VALUES ($1, $2, 'pending', 0, $3, $4, $5, $5)
        "#,
    )
    .bind(&dead.id)
    .bind(&dead.command)
    .bind(dead.max_retries)
    .bind(dead.created_at)
    .bind(now)
    .execute(&mut *tx)
    .await;

    if let Err(err) = inserted {
        return if is_unique_violation(&err) {
            Err(QueueError::Conflict(id.to_owned()))
        } else {
            Err(err.into())
        };
    }

    sqlx::query("DELETE FROM dlq WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

/// Captured output for a job, falling back to the dead letter table with
/// `failed_at` standing in for `updated_at`.
pub(crate) async fn job_logs(pool: &SqlitePool, id: &str) -> Result<JobLogs, QueueError> {
    let active = sqlx::query_as::<_, JobLogs>(
        "SELECT id, state, updated_at, stdout, stderr FROM jobs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    if let Some(logs) = active {
        return Ok(logs);
    }

    let dead = sqlx::query_as::<_, JobLogs>(
        "SELECT id, state, failed_at AS updated_at, stdout, stderr FROM dlq WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    if let Some(logs) = dead {
        return Ok(logs);
    }

    Err(QueueError::NotFound(id.to_owned()))
}
