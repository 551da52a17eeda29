use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use envconfig::Envconfig;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use queue_common::{Config, DataDir, Job, Queue, RetryPolicy};

use crate::config::WorkerSettings;
use crate::error::WorkerError;
use crate::executor::{run_command, ExecOutcome};

/// A worker claims pending jobs one at a time and records their outcomes.
///
/// There is no concurrency inside a worker: claim, execute, and record run
/// sequentially, so a shutdown request never interrupts an in-flight child.
/// The loop drains the current job and exits at the next iteration check.
pub struct Worker {
    queue: Queue,
    data_dir: DataDir,
    settings: WorkerSettings,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(queue: Queue, data_dir: DataDir, settings: WorkerSettings) -> Self {
        Self {
            queue,
            data_dir,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used by signal handlers (and tests) to request a graceful stop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until the shutdown flag is set.
    pub async fn run(&self) {
        let pid = std::process::id();
        info!(pid, "worker started");

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.queue.claim_job().await {
                Ok(Some(job)) => {
                    info!(id = %job.id, attempt = job.attempts + 1, "processing job");
                    self.process(job).await;
                }
                Ok(None) => tokio::time::sleep(self.settings.poll_interval.0).await,
                Err(err) => {
                    // The store may be briefly unavailable; any pending job
                    // stays claimable, so log and keep looping.
                    error!("failed to claim a job: {err}");
                    tokio::time::sleep(self.settings.poll_interval.0).await;
                }
            }
        }

        info!(pid, "worker shutting down");
    }

    async fn process(&self, job: Job) {
        match run_command(&job.command, self.settings.job_timeout.0).await {
            ExecOutcome::Completed { stdout, stderr } => {
                info!(id = %job.id, "job completed");
                if let Err(err) = self
                    .queue
                    .complete_job(&job.id, Some(&stdout), Some(&stderr))
                    .await
                {
                    error!(id = %job.id, "failed to record completion: {err}");
                }
            }
            ExecOutcome::Failed {
                status,
                stdout,
                stderr,
            } => {
                warn!(id = %job.id, ?status, "job failed");
                self.handle_failure(&job, Some(stdout), Some(stderr)).await;
            }
            ExecOutcome::TimedOut { after } => {
                warn!(id = %job.id, "job timed out");
                let message = format!("command timed out after {}s", after.as_secs());
                self.handle_failure(&job, None, Some(message)).await;
            }
            ExecOutcome::SpawnError(message) => {
                warn!(id = %job.id, "job could not be spawned: {message}");
                self.handle_failure(&job, None, Some(message)).await;
            }
        }
    }

    /// The retry machine: either reschedule with exponential backoff or,
    /// once the budget is exhausted, move the job to the dead letter queue.
    async fn handle_failure(&self, job: &Job, stdout: Option<String>, stderr: Option<String>) {
        let attempts = job.attempts + 1;
        let stdout = stdout.as_deref();
        let stderr = stderr.as_deref();

        if attempts > job.max_retries {
            warn!(
                id = %job.id,
                attempts,
                "job exhausted its retry budget, moving to the dead letter queue"
            );
            if let Err(err) = self.queue.bury_job(job, attempts, stdout, stderr).await {
                error!(id = %job.id, "failed to move job to the dead letter queue: {err}");
            }
            return;
        }

        // Re-read on every failure so operators can adjust the backoff live.
        let backoff_base = match self.data_dir.load_config() {
            Ok(config) => config.backoff_base,
            Err(err) => {
                warn!("could not reload config, falling back to defaults: {err}");
                Config::default().backoff_base
            }
        };
        let policy = RetryPolicy::new(backoff_base);
        let attempt_no = u32::try_from(attempts).unwrap_or(u32::MAX);
        let delay = policy.time_until_next_retry(attempt_no);

        info!(
            id = %job.id,
            attempt = attempts,
            max_retries = job.max_retries,
            delay_secs = delay.as_secs(),
            "scheduling retry"
        );
        if let Err(err) = self
            .queue
            .retry_job(&job.id, attempts, delay, stdout, stderr)
            .await
        {
            error!(id = %job.id, "failed to schedule retry: {err}");
        }
    }
}

/// Install SIGTERM/SIGINT handlers that flip the shutdown flag. The handler
/// never touches the in-flight child; the loop drains and exits on its own.
pub fn install_shutdown_handler(flag: Arc<AtomicBool>) -> Result<(), WorkerError> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, finishing current job"),
            _ = sigint.recv() => info!("received SIGINT, finishing current job"),
        }
        flag.store(true, Ordering::Relaxed);
    });

    Ok(())
}

/// Per-process entry point for `worker run`: read settings, open the store,
/// install signal handlers, and loop until shutdown.
pub async fn run_worker_loop(data_dir: DataDir) -> Result<(), WorkerError> {
    let settings = WorkerSettings::init_from_env()
        .map_err(|err| WorkerError::Settings(err.to_string()))?;
    let queue = Queue::open(&data_dir.db_path()).await?;

    let worker = Worker::new(queue, data_dir, settings);
    install_shutdown_handler(worker.shutdown_handle())?;
    worker.run().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvMsDuration;
    use chrono::Utc;
    use queue_common::{ConfigKey, JobManager, JobState};
    use std::time::Duration;

    fn test_settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: EnvMsDuration(Duration::from_millis(50)),
            job_timeout: EnvMsDuration(Duration::from_secs(5)),
        }
    }

    async fn open_worker() -> (tempfile::TempDir, DataDir, JobManager, Worker) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let data_dir = DataDir::at(dir.path()).expect("failed to init data dir");
        let manager = JobManager::open(&data_dir)
            .await
            .expect("failed to open manager");
        let queue = manager.queue().clone();
        let worker = Worker::new(queue, data_dir.clone(), test_settings());
        (dir, data_dir, manager, worker)
    }

    /// Poll until at least one job is listed in `state`.
    async fn wait_for_state(manager: &JobManager, state: JobState, deadline: Duration) {
        tokio::time::timeout(deadline, async {
            loop {
                let found = match state {
                    JobState::Dead => !manager.list_dead().await.unwrap().is_empty(),
                    other => !manager.list_jobs(other).await.unwrap().is_empty(),
                };
                if found {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("state not reached before the deadline");
    }

    #[tokio::test]
    async fn test_worker_completes_a_job() {
        let (_guard, _data_dir, manager, worker) = open_worker().await;
        manager
            .enqueue(r#"{"id": "a", "command": "echo hi"}"#, None)
            .await
            .expect("enqueue should succeed");

        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        wait_for_state(&manager, JobState::Completed, Duration::from_secs(10)).await;

        let rows = manager.list_jobs(JobState::Completed).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].stdout.as_deref(), Some("hi\n"));
        assert_eq!(rows[0].stderr.as_deref(), Some(""));

        shutdown.store(true, Ordering::Relaxed);
        handle.await.expect("worker task should not panic");
    }

    #[tokio::test]
    async fn test_failing_job_lands_in_the_dlq_with_all_attempts() {
        let (_guard, data_dir, manager, worker) = open_worker().await;
        data_dir
            .set_config(ConfigKey::BackoffBase, 1)
            .expect("set should succeed");
        manager
            .enqueue(r#"{"id": "b", "command": "false", "max_retries": 2}"#, None)
            .await
            .expect("enqueue should succeed");

        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        wait_for_state(&manager, JobState::Dead, Duration::from_secs(20)).await;

        let dead = manager.list_dead().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "b");
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].state, JobState::Dead);

        // The job is gone from the active table.
        assert!(manager.list_jobs(JobState::Pending).await.unwrap().is_empty());
        assert!(manager
            .list_jobs(JobState::Processing)
            .await
            .unwrap()
            .is_empty());

        shutdown.store(true, Ordering::Relaxed);
        handle.await.expect("worker task should not panic");
    }

    #[tokio::test]
    async fn test_zero_retry_budget_means_one_attempt() {
        let (_guard, _data_dir, manager, worker) = open_worker().await;
        manager
            .enqueue(r#"{"id": "c", "command": "false", "max_retries": 0}"#, None)
            .await
            .expect("enqueue should succeed");

        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        wait_for_state(&manager, JobState::Dead, Duration::from_secs(10)).await;

        let dead = manager.list_dead().await.unwrap();
        assert_eq!(dead[0].attempts, 1);

        shutdown.store(true, Ordering::Relaxed);
        handle.await.expect("worker task should not panic");
    }

    #[tokio::test]
    async fn test_retry_is_scheduled_with_backoff() {
        let (_guard, _data_dir, manager, worker) = open_worker().await;
        manager
            .enqueue(r#"{"id": "d", "command": "false", "max_retries": 5}"#, None)
            .await
            .expect("enqueue should succeed");

        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let rows = manager.list_jobs(JobState::Pending).await.unwrap();
                if rows.first().map(|job| job.attempts >= 1).unwrap_or(false) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("first retry not recorded before the deadline");

        shutdown.store(true, Ordering::Relaxed);
        handle.await.expect("worker task should not panic");

        let rows = manager.list_jobs(JobState::Pending).await.unwrap();
        let job = &rows[0];
        // First retry with the default base of 2: delay is 2^0 = 1 second.
        assert!(job.run_at - job.updated_at >= chrono::Duration::seconds(1));
        assert!(job.stderr.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_job_waits_for_run_at() {
        let (_guard, _data_dir, manager, worker) = open_worker().await;
        let run_at = Utc::now() + chrono::Duration::seconds(1);
        manager
            .enqueue(r#"{"id": "e", "command": "echo now"}"#, Some(run_at))
            .await
            .expect("enqueue should succeed");

        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.status().await.unwrap().get("pending"), Some(&1));

        wait_for_state(&manager, JobState::Completed, Duration::from_secs(10)).await;

        shutdown.store(true, Ordering::Relaxed);
        handle.await.expect("worker task should not panic");
    }

    #[tokio::test]
    async fn test_shutdown_drains_the_in_flight_job() {
        let (_guard, _data_dir, manager, worker) = open_worker().await;
        manager
            .enqueue(r#"{"id": "f", "command": "sleep 0.4 && echo done"}"#, None)
            .await
            .expect("enqueue should succeed");

        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        // Let the worker claim, then ask for a stop mid-execution.
        wait_for_state(&manager, JobState::Processing, Duration::from_secs(10)).await;
        shutdown.store(true, Ordering::Relaxed);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should drain and exit")
            .expect("worker task should not panic");

        // The in-flight job was finished, not abandoned or requeued.
        let rows = manager.list_jobs(JobState::Completed).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stdout.as_deref(), Some("done\n"));
    }
}
