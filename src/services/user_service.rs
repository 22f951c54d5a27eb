//! Users and their API tokens.

use super::{ServiceError, ServiceResult, is_unique_violation, validation::ValidationErrors};
use crate::models::user::User;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
}

#[derive(Clone)]
pub struct UserService {
    db: SqlitePool,
}

impl UserService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create_user(&self, new: NewUser) -> ServiceResult<User> {
        let mut errors = ValidationErrors::new();
        if new.username.trim().is_empty() {
            errors.add("username", "this field may not be blank");
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let result = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, username, email, first_name, last_name, is_staff, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.username.trim())
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.is_staff)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(user) => {
                info!(user_id = %user.id, username = %user.username, staff = user.is_staff, "user created");
                Ok(user)
            }
            Err(err) if is_unique_violation(&err) => Err(ValidationErrors::single(
                "username",
                "a user with that username already exists",
            )
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Issues a new opaque API token for `user_id`.
    pub async fn issue_token(&self, user_id: Uuid) -> ServiceResult<String> {
        let key = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        sqlx::query("INSERT INTO api_tokens (key, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&key)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
        Ok(key)
    }

    pub async fn find_by_token(&self, key: &str) -> ServiceResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.* FROM users u JOIN api_tokens t ON t.user_id = u.id WHERE t.key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    pub async fn find(&self, id: Uuid) -> ServiceResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", id))
    }
}
