use crate::services::{ServiceError, storage::StorageError, validation::ValidationErrors};
use axum::{
    Json,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// An error response: status, machine-readable code and a message safe to
/// show to the caller.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub errors: Option<ValidationErrors>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            errors: None,
        }
    }

    /// Shortcut for a 500 whose details stay in the log.
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "an internal error occurred",
        )
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    pub fn unauthenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "authentication credentials were not provided or are invalid",
        )
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission_denied", msg)
    }

    fn storage_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "storage_unavailable",
            "document storage is temporarily unavailable",
        )
    }

    fn validation(errors: ValidationErrors) -> Self {
        Self {
            errors: Some(errors),
            ..Self::new(StatusCode::BAD_REQUEST, "validation_failed", "validation failed")
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code,
            "message": self.message,
            "status": self.status.as_u16()
        });
        if let (Some(errors), Some(fields)) = (self.errors, body.as_object_mut()) {
            fields.insert("errors".into(), json!(errors));
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(errors) => AppError::validation(errors),
            ServiceError::NotFound { entity, .. } => AppError::not_found(format!("{entity} not found")),
            ServiceError::PermissionDenied(msg) => AppError::forbidden(msg),
            ServiceError::InvalidTransition(err) => {
                AppError::new(StatusCode::CONFLICT, "invalid_transition", err.to_string())
            }
            ServiceError::Conflict(msg) => AppError::new(StatusCode::CONFLICT, "conflict", msg),
            err @ ServiceError::ConcurrentModification(_) => {
                AppError::new(StatusCode::CONFLICT, "concurrent_modification", err.to_string())
            }
            ServiceError::Storage(err) => err.into(),
            ServiceError::Database(err) => {
                error!("database error: {err}");
                AppError::internal()
            }
            ServiceError::Serialization(err) => {
                error!("serialization error: {err}");
                AppError::internal()
            }
            ServiceError::Queue(err) => {
                error!("job queue error: {err}");
                AppError::internal()
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { .. } => AppError::not_found("object not found"),
            StorageError::InvalidObjectKey | StorageError::InvalidBucketName(_) => {
                AppError::bad_request(err.to_string())
            }
            StorageError::LinkExpired | StorageError::InvalidSignature => {
                AppError::forbidden(err.to_string())
            }
            StorageError::Unavailable(_) | StorageError::Io(_) => {
                error!("object store error: {err}");
                AppError::storage_unavailable()
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), "bad_request", err.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::new(rejection.status(), "bad_request", rejection.body_text())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(rejection.status(), "bad_request", rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::new(rejection.status(), "bad_request", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::new(rejection.status(), "bad_request", rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!("unexpected error: {err:#}");
        AppError::internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::document::DocumentStatus, services::lifecycle::TransitionError};

    #[test]
    fn service_errors_map_to_status_and_code() {
        let cases: Vec<(ServiceError, StatusCode, &str)> = vec![
            (
                ValidationErrors::single("title", "required").into(),
                StatusCode::BAD_REQUEST,
                "validation_failed",
            ),
            (ServiceError::not_found("document", "x"), StatusCode::NOT_FOUND, "not_found"),
            (ServiceError::staff_only(), StatusCode::FORBIDDEN, "permission_denied"),
            (
                TransitionError {
                    from: DocumentStatus::Verified,
                    to: DocumentStatus::Processing,
                }
                .into(),
                StatusCode::CONFLICT,
                "invalid_transition",
            ),
            (
                ServiceError::ConcurrentModification(uuid::Uuid::nil()),
                StatusCode::CONFLICT,
                "concurrent_modification",
            ),
            (
                StorageError::InvalidObjectKey.into(),
                StatusCode::BAD_REQUEST,
                "bad_request",
            ),
            (
                StorageError::Unavailable("connection reset".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
            ),
            (
                sqlx::Error::RowNotFound.into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!((app.status, app.code), (status, code));
        }
    }

    #[test]
    fn provider_details_are_not_exposed() {
        let app: AppError = StorageError::Unavailable("AccessDenied for arn:aws:s3:::secret".into()).into();
        assert!(!app.message.contains("arn"));
    }
}
