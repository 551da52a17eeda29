use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::QueueError;
use crate::ops::meta::throw_if_no_rows;
use crate::queue::is_busy;
use crate::types::Job;

/// Claim the single oldest eligible pending job, flipping it to `processing`.
///
/// The conditional UPDATE is one statement, so SQLite runs it under the
/// write lock: a concurrent claimer either waits and then matches zero rows
/// (the inner SELECT no longer finds the job pending), or times out on the
/// lock. Both cases surface as `None`, "no job available this tick".
pub(crate) async fn claim_job(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<Option<Job>, QueueError> {
    let result = sqlx::query_as::<_, Job>(
        r#"
UPDATE jobs
SET state = 'processing', updated_at = $1
WHERE id = (
    SELECT id
    FROM jobs
    WHERE state = 'pending' AND run_at <= $1
    ORDER BY created_at ASC, id ASC
    LIMIT 1
)
AND state = 'pending'
RETURNING *
        "#,
    )
    .bind(now)
    .fetch_optional(pool)
    .await;

    match result {
        Ok(job) => Ok(job),
        Err(err) if is_busy(&err) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Record a successful attempt.
pub(crate) async fn complete_job(
    pool: &SqlitePool,
    id: &str,
    stdout: Option<&str>,
    stderr: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    let res = sqlx::query(
        r#"
UPDATE jobs
SET state = 'completed', updated_at = $2, stdout = $3, stderr = $4
WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(now)
    .bind(stdout)
    .bind(stderr)
    .execute(pool)
    .await?;

    throw_if_no_rows(res, id)
}

/// Return a failed job to the pending state with its next eligibility time
/// and the incremented attempt count.
pub(crate) async fn retry_job(
    pool: &SqlitePool,
    id: &str,
    attempts: i64,
    run_at: DateTime<Utc>,
    stdout: Option<&str>,
    stderr: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    let res = sqlx::query(
        r#"
UPDATE jobs
SET state = 'pending', attempts = $2, run_at = $3, updated_at = $4, stdout = $5, stderr = $6
WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(attempts)
    .bind(run_at)
    .bind(now)
    .bind(stdout)
    .bind(stderr)
    .execute(pool)
    .await?;

    throw_if_no_rows(res, id)
}

/// Move a job that exhausted its retry budget into the dead letter table.
/// Insert and delete happen in one transaction so the id never exists in
/// both tables, and never in neither.
pub(crate) async fn bury_job(
    pool: &SqlitePool,
    job: &Job,
    attempts: i64,
    stdout: Option<&str>,
    stderr: Option<&str>,
    failed_at: DateTime<Utc>,
) -> Result<(), QueueError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
INSERT INTO dlq (id, command, state, attempts, max_retries, created_at, failed_at, stdout, stderr)
VALUES ($1, $2, 'dead', $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&job.id)
    .bind(&job.command)
    .bind(attempts)
    .bind(job.max_retries)
    .bind(job.created_at)
    .bind(failed_at)
    .bind(stdout)
    .bind(stderr)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(&job.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}
