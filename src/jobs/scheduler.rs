//! Enqueues the periodic maintenance jobs.

use super::{Task, queue::JobQueue};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub archive_every: Duration,
    pub cleanup_every: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            archive_every: Duration::from_secs(24 * 60 * 60),
            cleanup_every: Duration::from_secs(60 * 60),
        }
    }
}

pub struct Scheduler {
    queue: JobQueue,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(queue: JobQueue, config: ScheduleConfig) -> Self {
        Self { queue, config }
    }

    /// One loop per periodic task. The first run happens one period after start.
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            archive_every_secs = self.config.archive_every.as_secs(),
            cleanup_every_secs = self.config.cleanup_every.as_secs(),
            "starting job scheduler"
        );
        [
            (Task::ArchiveOldDocuments, self.config.archive_every),
            (Task::CleanupStale, self.config.cleanup_every),
        ]
        .into_iter()
        .map(|(task, period)| {
            let queue = self.queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { every(queue, task, period, shutdown).await })
        })
        .collect()
    }
}

async fn every(queue: JobQueue, task: Task, period: Duration, shutdown: CancellationToken) {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match queue.enqueue(&task).await {
                    Ok(job) => debug!(job_id = %job.id, kind = %job.kind, "scheduled job enqueued"),
                    Err(err) => error!(kind = %task.kind(), "could not enqueue scheduled job: {err}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, jobs::queue::RetryPolicy, models::job::JobKind};

    #[tokio::test]
    async fn enqueues_periodic_jobs_until_shutdown() {
        let pool = db::connect_in_memory().await.unwrap();
        db::migrate(&pool).await.unwrap();
        let queue = JobQueue::new(pool, RetryPolicy::default());
        let scheduler = Scheduler::new(
            queue.clone(),
            ScheduleConfig {
                archive_every: Duration::from_millis(40),
                cleanup_every: Duration::from_millis(40),
            },
        );
        let shutdown = CancellationToken::new();
        let handles = scheduler.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        let cleanups = queue.list(Some(JobKind::CleanupStale), None).await.unwrap();
        let archives = queue.list(Some(JobKind::ArchiveOldDocuments), None).await.unwrap();
        assert!(!cleanups.is_empty());
        assert!(!archives.is_empty());

        // Nothing is enqueued after shutdown.
        let before = queue.list(None, None).await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.list(None, None).await.unwrap().len(), before);
    }
}
