//! Background processing: a durable SQLite-backed queue, a worker pool that
//! drains it, and a scheduler for the periodic maintenance jobs.

pub mod extractor;
pub mod notifier;
pub mod queue;
pub mod scheduler;
pub mod tasks;
pub mod worker;

use crate::models::job::JobKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of background work, stored as the job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    ProcessDocument { document_id: Uuid },
    NotifyCaseOfficer { document_id: Uuid },
    ArchiveOldDocuments,
    CleanupStale,
}

impl Task {
    pub fn kind(&self) -> JobKind {
        match self {
            Task::ProcessDocument { .. } => JobKind::ProcessDocument,
            Task::NotifyCaseOfficer { .. } => JobKind::NotifyCaseOfficer,
            Task::ArchiveOldDocuments => JobKind::ArchiveOldDocuments,
            Task::CleanupStale => JobKind::CleanupStale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_by_kind() {
        let id = Uuid::nil();
        let task = Task::ProcessDocument { document_id: id };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], task.kind().as_str());
        assert_eq!(serde_json::from_value::<Task>(value).unwrap(), task);

        let value = serde_json::to_value(Task::CleanupStale).unwrap();
        assert_eq!(value["type"], "cleanup_stale");
    }
}
