use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::DataDir;
use crate::error::QueueError;
use crate::ops;
use crate::queue::Queue;
use crate::types::{DeadJob, Job, JobInit, JobLogs, JobState};

/// Control-plane handle: everything the CLI does to the queue goes through
/// here. Workers use the claim-side operations on [`Queue`] instead.
pub struct JobManager {
    queue: Queue,
    data_dir: DataDir,
}

impl JobManager {
    pub fn new(queue: Queue, data_dir: DataDir) -> Self {
        Self { queue, data_dir }
    }

    /// Open the store inside the data directory.
    pub async fn open(data_dir: &DataDir) -> Result<Self, QueueError> {
        let queue = Queue::open(&data_dir.db_path()).await?;
        Ok(Self::new(queue, data_dir.clone()))
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Parse a JSON payload and insert the job. `run_at_override` (the CLI's
    /// `--run-at` flag) wins over a `run_at` key inside the payload.
    pub async fn enqueue(
        &self,
        payload: &str,
        run_at_override: Option<DateTime<Utc>>,
    ) -> Result<String, QueueError> {
        let mut init: JobInit = serde_json::from_str(payload)
            .map_err(|err| QueueError::InvalidInput(format!("invalid job payload: {err}")))?;
        if let Some(run_at) = run_at_override {
            init.run_at = Some(run_at);
        }
        self.enqueue_init(init).await
    }

    pub async fn enqueue_init(&self, init: JobInit) -> Result<String, QueueError> {
        let config = self.data_dir.load_config()?;
        ops::manager::enqueue_job(self.queue.pool(), &config, init, Utc::now()).await
    }

    pub async fn list_jobs(&self, state: JobState) -> Result<Vec<Job>, QueueError> {
        ops::manager::list_jobs(self.queue.pool(), state).await
    }

    pub async fn list_dead(&self) -> Result<Vec<DeadJob>, QueueError> {
        ops::manager::list_dead(self.queue.pool()).await
    }

    pub async fn status(&self) -> Result<BTreeMap<String, i64>, QueueError> {
        ops::manager::status(self.queue.pool()).await
    }

    pub async fn retry_dlq(&self, id: &str) -> Result<(), QueueError> {
        ops::manager::retry_dlq(self.queue.pool(), id, Utc::now()).await
    }

    pub async fn logs(&self, id: &str) -> Result<JobLogs, QueueError> {
        ops::manager::job_logs(self.queue.pool(), id).await
    }
}
