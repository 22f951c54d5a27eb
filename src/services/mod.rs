pub mod access_log_service;
pub mod client_service;
pub mod document_service;
pub mod lifecycle;
pub mod storage;
pub mod user_service;
pub mod validation;

use crate::jobs::queue::QueueError;
use lifecycle::TransitionError;
use storage::StorageError;
use thiserror::Error;
use uuid::Uuid;
use validation::ValidationErrors;

/// Failures of the metadata services, mapped onto HTTP by `errors::AppError`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    PermissionDenied(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("{0}")]
    Conflict(String),
    #[error("document `{0}` was modified concurrently")]
    ConcurrentModification(Uuid),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn staff_only() -> Self {
        Self::PermissionDenied("only staff users may perform this action".into())
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Restricts a query joined on `clients {alias}` to rows `actor` may see:
/// live clients, and for non-staff only those assigned to them.
pub(crate) fn push_client_scope(
    builder: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>,
    actor: &crate::models::user::User,
    alias: &str,
) {
    builder.push(format!(" AND {alias}.deleted_at IS NULL"));
    if !actor.is_staff {
        builder.push(format!(" AND {alias}.assigned_to = "));
        builder.push_bind(actor.id);
    }
}

/// True if the error is a SQLite unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
