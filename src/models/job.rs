//! Rows of the durable background job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

text_enum! {
    pub enum JobKind {
        ProcessDocument => "process_document",
        NotifyCaseOfficer => "notify_case_officer",
        ArchiveOldDocuments => "archive_old_documents",
        CleanupStale => "cleanup_stale",
    }
}

text_enum! {
    pub enum JobStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: Json<serde_json::Value>,
    pub status: JobStatus,
    /// Number of times the job has been claimed.
    pub attempts: i64,
    pub max_attempts: i64,
    /// The job is not claimed before this instant.
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
