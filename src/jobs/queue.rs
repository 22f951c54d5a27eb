//! Durable job queue over a `jobs` table.
//!
//! The queue is a handle, opened at startup and closed at shutdown. It shares
//! the metadata pool by default or owns a separate one.

use super::Task;
use crate::{
    db,
    models::job::{Job, JobKind, JobStatus},
};
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, types::Json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid retry delay")]
    InvalidDelay,
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Multiplied by the attempt number for each retry.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
        }
    }
}

/// What `fail` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { run_after: DateTime<Utc> },
    Exhausted,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    policy: RetryPolicy,
    owns_pool: bool,
}

impl JobQueue {
    /// A queue on an existing pool, typically the metadata pool.
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            owns_pool: false,
        }
    }

    /// Opens a queue on its own database and ensures the schema exists.
    pub async fn open(url: &str, policy: RetryPolicy) -> QueueResult<Self> {
        let pool = db::connect(url).await?;
        db::migrate(&pool).await?;
        info!(url, "job queue opened");
        Ok(Self {
            pool,
            policy,
            owns_pool: true,
        })
    }

    /// Closes the pool if this queue opened it.
    pub async fn close(&self) {
        if self.owns_pool {
            self.pool.close().await;
            info!("job queue closed");
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ping(&self) -> QueueResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn enqueue(&self, task: &Task) -> QueueResult<Job> {
        self.enqueue_at(task, Utc::now()).await
    }

    pub async fn enqueue_at(&self, task: &Task, run_after: DateTime<Utc>) -> QueueResult<Job> {
        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, kind, payload, status, attempts, max_attempts, run_after,
                               created_at, updated_at)
             VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(task.kind())
        .bind(Json(serde_json::to_value(task)?))
        .bind(i64::from(self.policy.max_attempts.max(1)))
        .bind(run_after)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        debug!(job_id = %job.id, kind = %job.kind, "job enqueued");
        Ok(job)
    }

    /// Atomically takes the oldest due job and marks it running.
    pub async fn claim_next(&self) -> QueueResult<Option<Job>> {
        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'queued' AND run_after <= ?
                 ORDER BY run_after ASC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn complete(&self, id: Uuid) -> QueueResult<()> {
        sqlx::query("UPDATE jobs SET status = 'succeeded', last_error = NULL, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Requeues with back-off while attempts remain, otherwise marks failed.
    pub async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailureOutcome> {
        let now = Utc::now();
        if job.attempts >= job.max_attempts {
            sqlx::query("UPDATE jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?")
                .bind(error)
                .bind(now)
                .bind(job.id)
                .execute(&self.pool)
                .await?;
            warn!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, "job exhausted its retries: {error}");
            return Ok(FailureOutcome::Exhausted);
        }

        let multiplier = u32::try_from(job.attempts.max(1)).unwrap_or(u32::MAX);
        let delay = self
            .policy
            .retry_delay
            .checked_mul(multiplier)
            .ok_or(QueueError::InvalidDelay)?;
        let run_after =
            now + chrono::Duration::from_std(delay).map_err(|_| QueueError::InvalidDelay)?;
        sqlx::query(
            "UPDATE jobs SET status = 'queued', last_error = ?, run_after = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(run_after)
        .bind(now)
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        info!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, %run_after, "job will be retried: {error}");
        Ok(FailureOutcome::Retrying { run_after })
    }

    /// Marks a job failed without retrying, e.g. when its payload is unreadable.
    pub async fn discard(&self, id: Uuid, error: &str) -> QueueResult<()> {
        sqlx::query("UPDATE jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        warn!(job_id = %id, "job discarded: {error}");
        Ok(())
    }

    /// Puts back jobs left `running` by a worker that went away.
    pub async fn requeue_stalled(&self, older_than: Duration) -> QueueResult<u64> {
        let cutoff = cutoff(older_than)?;
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', updated_at = ? WHERE status = 'running' AND updated_at < ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes finished jobs last touched before `older_than` ago.
    pub async fn purge_finished(&self, older_than: Duration) -> QueueResult<u64> {
        let cutoff = cutoff(older_than)?;
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('succeeded', 'failed') AND updated_at <= ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
        Ok(sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list(&self, kind: Option<JobKind>, status: Option<JobStatus>) -> QueueResult<Vec<Job>> {
        let mut query = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(kind) = kind {
            query.push(" AND kind = ");
            query.push_bind(kind);
        }
        if let Some(status) = status {
            query.push(" AND status = ");
            query.push_bind(status);
        }
        query.push(" ORDER BY created_at ASC");
        Ok(query.build_query_as().fetch_all(&self.pool).await?)
    }
}

impl Job {
    pub fn task(&self) -> Result<Task, serde_json::Error> {
        serde_json::from_value(self.payload.0.clone())
    }
}

fn cutoff(older_than: Duration) -> QueueResult<DateTime<Utc>> {
    Ok(Utc::now() - chrono::Duration::from_std(older_than).map_err(|_| QueueError::InvalidDelay)?)
}
