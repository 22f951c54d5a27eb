//! Case-officer notifications.

use crate::models::{document::Document, user::User};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn document_processed(&self, officer: &User, document: &Document) -> Result<(), NotifyError>;
}

/// Emits a structured log line instead of delivering anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn document_processed(&self, officer: &User, document: &Document) -> Result<(), NotifyError> {
        info!(
            recipient = %officer.email,
            recipient_name = %officer.full_name(),
            document_id = %document.id,
            client_id = %document.client_id,
            document_type = %document.document_type,
            "notification sent for processed document"
        );
        Ok(())
    }
}
