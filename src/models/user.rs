//! Authenticated actors (case officers and staff).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user able to call the API.
///
/// Staff users see every client and document; other users only see clients
/// assigned to them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// First and last name, trimmed when either is blank.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// The public part of a user, embedded in client responses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first_name: &str, last_name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: "officer".into(),
            email: "officer@example.com".into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            is_staff: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_name_skips_blank_parts() {
        assert_eq!(user("Ada", "Lovelace").full_name(), "Ada Lovelace");
        assert_eq!(user("Ada", "").full_name(), "Ada");
        assert_eq!(user("", "").full_name(), "");
    }
}
