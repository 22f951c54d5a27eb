//! Immigration clients: the owners of documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::user::UserSummary;

text_enum! {
    /// Country the client is migrating to.
    pub enum Destination {
        Australia => "AU",
        Canada => "CA",
        UnitedKingdom => "UK",
        NewZealand => "NZ",
        UnitedStates => "US",
    }
}

text_enum! {
    pub enum VisaType {
        Skilled => "skilled",
        Work => "work",
        Student => "student",
        Family => "family",
        Business => "business",
    }
}

text_enum! {
    /// Case progress, moved by case officers through the API.
    pub enum ClientStatus {
        Inquiry => "inquiry",
        Documents => "documents",
        Assessment => "assessment",
        Submitted => "submitted",
        Approved => "approved",
        Rejected => "rejected",
        Completed => "completed",
    }
}

text_enum! {
    /// Data-residency region; selects the bucket a client's files land in.
    pub enum ClientRegion {
        Australia => "AU",
        India => "IN",
    }
}

/// A client row. Clients are soft-deleted through `deleted_at`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub destination_country: Destination,
    pub visa_type: VisaType,
    pub status: ClientStatus,
    pub region: ClientRegion,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Client as returned by the API: the row plus derived fields.
#[derive(Serialize, Clone, Debug)]
pub struct ClientView {
    #[serde(flatten)]
    pub client: Client,
    pub assignee: Option<UserSummary>,
    pub document_count: i64,
}

/// Flat row produced by the client listing query.
#[derive(FromRow, Debug)]
pub(crate) struct ClientViewRow {
    #[sqlx(flatten)]
    pub client: Client,
    pub document_count: i64,
    pub assignee_username: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_first_name: Option<String>,
    pub assignee_last_name: Option<String>,
}

impl From<ClientViewRow> for ClientView {
    fn from(row: ClientViewRow) -> Self {
        let assignee = match (row.client.assigned_to, row.assignee_username) {
            (Some(id), Some(username)) => Some(UserSummary {
                id,
                username,
                email: row.assignee_email.unwrap_or_default(),
                first_name: row.assignee_first_name.unwrap_or_default(),
                last_name: row.assignee_last_name.unwrap_or_default(),
            }),
            _ => None,
        };
        Self {
            client: row.client,
            assignee,
            document_count: row.document_count,
        }
    }
}
