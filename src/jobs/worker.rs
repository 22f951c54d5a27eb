//! Worker pool draining the job queue.

use super::{
    queue::{FailureOutcome, JobQueue, QueueResult},
    tasks::TaskRunner,
};
use crate::models::job::Job;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    queue: JobQueue,
    runner: Arc<TaskRunner>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, runner: TaskRunner, config: WorkerConfig) -> Self {
        Self {
            queue,
            runner: Arc::new(runner),
            config,
        }
    }

    /// Starts `worker_count` polling loops that stop when `shutdown` fires.
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.worker_count, "starting job workers");
        (0..self.config.worker_count.max(1))
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_loop(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_loop(&self, worker: usize, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(ran) => !ran,
                Err(err) => {
                    error!(worker, "job queue error: {err}");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        debug!(worker, "job worker stopped");
    }

    /// Claims and runs one due job. Returns `false` when none was due.
    pub async fn run_once(&self) -> QueueResult<bool> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };
        self.execute(job).await?;
        Ok(true)
    }

    /// Runs due jobs until the queue has nothing left to hand out.
    pub async fn drain(&self) -> QueueResult<usize> {
        let mut ran = 0;
        while self.run_once().await? {
            ran += 1;
        }
        Ok(ran)
    }

    async fn execute(&self, job: Job) -> QueueResult<()> {
        let task = match job.task() {
            Ok(task) => task,
            Err(err) => {
                return self.queue.discard(job.id, &format!("unreadable payload: {err}")).await;
            }
        };

        debug!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, "running job");
        match self.runner.run(&task).await {
            Ok(()) => self.queue.complete(job.id).await,
            Err(err) => {
                let reason = err.to_string();
                if self.queue.fail(&job, &reason).await? == FailureOutcome::Exhausted
                    && let Err(err) = self.runner.on_exhausted(&task, &reason).await
                {
                    warn!(job_id = %job.id, "exhaustion handler failed: {err}");
                }
                Ok(())
            }
        }
    }
}
