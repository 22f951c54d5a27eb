//! Append-only audit trail of document access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

text_enum! {
    pub enum AccessAction {
        View => "view",
        Download => "download",
        Upload => "upload",
        Delete => "delete",
        Update => "update",
    }
}

/// One access event. `document_id` is kept after the document is deleted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct AccessLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AccessAction,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}
