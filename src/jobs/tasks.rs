//! Handlers for each [`Task`] kind.

use super::{
    Task,
    extractor::{DocumentExtractor, ExtractionError},
    notifier::{Notifier, NotifyError},
    queue::QueueError,
};
use crate::{
    models::document::{Document, DocumentStatus},
    services::{
        ServiceError,
        document_service::DocumentService,
        lifecycle,
        storage::{StorageClass, StorageError},
    },
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("invalid duration")]
    InvalidDuration,
}

/// Age thresholds for the periodic maintenance jobs.
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    /// Completed clients untouched this long have their documents archived.
    pub archive_after: Duration,
    /// Documents in `processing` this long are reset.
    pub stuck_after: Duration,
    pub temp_artifact_age: Duration,
    /// Jobs `running` this long are handed back to the queue.
    pub stalled_job_after: Duration,
    pub job_retention: Duration,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            archive_after: Duration::from_secs(90 * 24 * 60 * 60),
            stuck_after: Duration::from_secs(60 * 60),
            temp_artifact_age: Duration::from_secs(60 * 60),
            stalled_job_after: Duration::from_secs(60 * 60),
            job_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    documents: DocumentService,
    extractor: Arc<dyn DocumentExtractor>,
    notifier: Arc<dyn Notifier>,
    settings: MaintenanceSettings,
}

impl TaskRunner {
    pub fn new(
        documents: DocumentService,
        extractor: Arc<dyn DocumentExtractor>,
        notifier: Arc<dyn Notifier>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            documents,
            extractor,
            notifier,
            settings,
        }
    }

    pub async fn run(&self, task: &Task) -> Result<(), TaskError> {
        match task {
            Task::ProcessDocument { document_id } => self.process_document(*document_id).await,
            Task::NotifyCaseOfficer { document_id } => self.notify_case_officer(*document_id).await,
            Task::ArchiveOldDocuments => self.archive_old_documents().await.map(|_| ()),
            Task::CleanupStale => self.cleanup_stale().await,
        }
    }

    /// Called once a job has used up its attempts.
    pub async fn on_exhausted(&self, task: &Task, reason: &str) -> Result<(), TaskError> {
        let Task::ProcessDocument { document_id } = task else {
            return Ok(());
        };
        if let Some(document) = self.documents.find(*document_id).await?
            && document.status == DocumentStatus::Uploaded
        {
            self.documents.mark_failed(&document, reason).await?;
            warn!(%document_id, "processing gave up; document marked failed");
        }
        Ok(())
    }

    async fn process_document(&self, document_id: Uuid) -> Result<(), TaskError> {
        let Some(document) = self.documents.find(document_id).await? else {
            warn!(%document_id, "document not found; nothing to process");
            return Ok(());
        };
        if !lifecycle::can_reprocess(document.status) {
            info!(%document_id, status = %document.status, "document not processable; skipping");
            return Ok(());
        }

        info!(%document_id, "processing document");
        let processing = self.documents.mark_processing(&document).await?;

        match self.extract_and_store(&processing).await {
            Ok(_) => {
                info!(%document_id, "document processed");
                if let Err(err) = self
                    .documents
                    .queue()
                    .enqueue(&Task::NotifyCaseOfficer { document_id })
                    .await
                {
                    error!(%document_id, "could not enqueue notification: {err}");
                }
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                if let Err(reset) = self.documents.reset_to_uploaded(&processing, &reason).await {
                    error!(%document_id, "could not reset document after failure: {reset}");
                }
                Err(err)
            }
        }
    }

    async fn extract_and_store(&self, document: &Document) -> Result<Document, TaskError> {
        let location = document.location();
        let target = self.documents.regions().for_location(&location);
        let bytes = target.store.get(&location).await?;
        let extraction = self
            .extractor
            .extract(document.document_type, &document.file_type, &bytes)
            .await?;
        Ok(self
            .documents
            .mark_processed(document, extraction.data, extraction.text)
            .await?)
    }

    async fn notify_case_officer(&self, document_id: Uuid) -> Result<(), TaskError> {
        let Some(context) = self.documents.notification_context(document_id).await? else {
            warn!(%document_id, "document not found; no notification sent");
            return Ok(());
        };
        match context.assignee {
            Some(officer) => {
                self.notifier
                    .document_processed(&officer, &context.document)
                    .await?
            }
            None => info!(%document_id, client_id = %context.client.id, "client has no case officer"),
        }
        Ok(())
    }

    /// Moves documents of long-completed cases to the archive tier.
    /// Returns how many were archived; individual failures are logged.
    pub async fn archive_old_documents(&self) -> Result<usize, TaskError> {
        let cutoff = Utc::now() - to_chrono(self.settings.archive_after)?;
        let candidates = self.documents.archive_candidates(cutoff).await?;

        let mut archived = 0;
        for document in candidates {
            let location = document.location();
            let target = self.documents.regions().for_location(&location);
            if let Err(err) = target
                .store
                .transition_storage_class(&location, StorageClass::Archive)
                .await
            {
                warn!(document_id = %document.id, key = %location.key, "archive transition failed: {err}");
                continue;
            }
            match self.documents.mark_archived(&document, StorageClass::Archive).await {
                Ok(_) => archived += 1,
                Err(err) => warn!(document_id = %document.id, "could not record archival: {err}"),
            }
        }
        info!(archived, "archived old documents");
        Ok(archived)
    }

    async fn cleanup_stale(&self) -> Result<(), TaskError> {
        let cutoff = Utc::now() - to_chrono(self.settings.stuck_after)?;
        let stuck = self.documents.stale_processing(cutoff).await?;
        let mut reset = 0;
        for document in &stuck {
            match self
                .documents
                .reset_to_uploaded(document, "processing timed out")
                .await
            {
                Ok(_) => reset += 1,
                Err(err) => warn!(document_id = %document.id, "could not reset stuck document: {err}"),
            }
        }

        let mut swept = 0;
        for target in self.documents.regions().targets() {
            match target
                .store
                .sweep_temp_artifacts(self.settings.temp_artifact_age)
                .await
            {
                Ok(count) => swept += count,
                Err(err) => warn!(bucket = %target.bucket, "temp sweep failed: {err}"),
            }
        }

        let queue = self.documents.queue();
        let requeued = queue.requeue_stalled(self.settings.stalled_job_after).await?;
        let purged = queue.purge_finished(self.settings.job_retention).await?;
        info!(reset, swept, requeued, purged, "stale cleanup finished");
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration, TaskError> {
    chrono::Duration::from_std(duration).map_err(|_| TaskError::InvalidDuration)
}
