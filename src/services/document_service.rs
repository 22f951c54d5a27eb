//! Documents: upload, listing, review, deletion and the status writes used by
//! the processing jobs.
//!
//! Every status change goes through [`lifecycle::check_transition`] and a
//! conditional update on `version`, so two writers racing on one document
//! cannot both win.

use super::{
    ServiceError, ServiceResult,
    access_log_service::{AccessLogService, RequestMeta},
    client_service::ClientService,
    lifecycle,
    push_client_scope,
    storage::{StorageClass, StorageError, region::{RegionRouter, StoreTarget}},
    validation::{self, UploadCandidate, UploadPolicy, ValidatedUpload, ValidationErrors},
};
use crate::{
    jobs::{Task, queue::JobQueue},
    models::{
        access_log::AccessAction,
        client::Client,
        document::{Document, DocumentListItem, DocumentStatus, DocumentType},
        job::Job,
        page::{Page, PageRequest},
        user::User,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, types::Json};
use std::{collections::BTreeMap, time::Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

const LIST_SELECT: &str = "SELECT d.id, d.client_id, \
     c.first_name || ' ' || c.last_name AS client_name, \
     d.document_type, d.title, d.status, d.file_size, d.uploaded_at, \
     COALESCE(NULLIF(TRIM(u.first_name || ' ' || u.last_name), ''), u.username, 'System') \
         AS uploaded_by_name \
     FROM documents d \
     JOIN clients c ON c.id = d.client_id \
     LEFT JOIN users u ON u.id = d.uploaded_by \
     WHERE 1 = 1";

const UNUSABLE_KEY: &str = "the file name cannot be used as a storage key";

/// A file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    fn candidate(&self) -> UploadCandidate<'_> {
        UploadCandidate {
            filename: &self.filename,
            declared_content_type: self.content_type.as_deref(),
            bytes: &self.bytes,
        }
    }
}

/// Raw single-upload form fields; validated together in [`DocumentService::upload`].
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub client_id: Option<String>,
    pub document_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub file: Option<UploadedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct BulkUploadRequest {
    pub client_id: Option<String>,
    pub document_type: Option<String>,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkUploadItem {
    pub index: usize,
    pub filename: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkUploadReport {
    pub uploaded: usize,
    pub failed: usize,
    pub results: Vec<BulkUploadItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentFilter {
    pub client_id: Option<Uuid>,
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub document_type: Option<DocumentType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadLink {
    pub download_url: String,
    pub expires_in: u64,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentStatistics {
    pub total: i64,
    pub by_status: BTreeMap<DocumentStatus, i64>,
    pub by_type: BTreeMap<DocumentType, i64>,
}

/// A document with derived fields, as returned by detail endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub file_size_mb: f64,
}

impl From<Document> for DocumentDetail {
    fn from(document: Document) -> Self {
        Self {
            file_size_mb: document.file_size_mb(),
            document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Verify,
    Reject,
}

impl ReviewDecision {
    fn target(self) -> DocumentStatus {
        match self {
            ReviewDecision::Verify => DocumentStatus::Verified,
            ReviewDecision::Reject => DocumentStatus::Rejected,
        }
    }
}

/// Who a processed-document notification goes to.
#[derive(Debug, Clone)]
pub struct NotificationContext {
    pub document: Document,
    pub client: Client,
    pub assignee: Option<User>,
}

/// Optional columns written alongside a status change.
#[derive(Debug, Default)]
struct StatusChange {
    processing_error: Option<Option<String>>,
    extracted_data: Option<serde_json::Value>,
    ocr_text: Option<Option<String>>,
    processed_at: Option<DateTime<Utc>>,
    reviewed_by: Option<Uuid>,
    review_notes: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    pub upload_policy: UploadPolicy,
    pub download_ttl: Duration,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            upload_policy: UploadPolicy::default(),
            download_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone)]
pub struct DocumentService {
    db: SqlitePool,
    clients: ClientService,
    access_logs: AccessLogService,
    queue: JobQueue,
    regions: RegionRouter,
    settings: DocumentSettings,
}

impl DocumentService {
    pub fn new(
        db: SqlitePool,
        queue: JobQueue,
        regions: RegionRouter,
        settings: DocumentSettings,
    ) -> Self {
        Self {
            clients: ClientService::new(db.clone()),
            access_logs: AccessLogService::new(db.clone()),
            db,
            queue,
            regions,
            settings,
        }
    }

    pub fn regions(&self) -> &RegionRouter {
        &self.regions
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    // ---- API operations ----

    /// Validate, store the object, insert the row, log and enqueue processing.
    ///
    /// A failed object write leaves no row behind; a failed row insert removes
    /// the object it just wrote.
    pub async fn upload(
        &self,
        actor: &User,
        meta: &RequestMeta,
        request: UploadRequest,
    ) -> ServiceResult<Document> {
        let mut errors = ValidationErrors::new();
        let client_id = parse_client_id(request.client_id.as_deref(), &mut errors);
        let document_type =
            validation::parse_document_type(request.document_type.as_deref(), &mut errors);
        let title = request.title.unwrap_or_default();
        validation::validate_title(&title, &mut errors);

        let validated = match &request.file {
            None => {
                errors.add("file", "no file was submitted");
                None
            }
            Some(file) => match validation::validate_upload(file.candidate(), &self.settings.upload_policy) {
                Ok(validated) => Some(validated),
                Err(file_errors) => {
                    errors.merge(file_errors);
                    None
                }
            },
        };

        let client = self.visible_client(actor, client_id, &mut errors).await?;

        let (Some(client), Some(document_type), Some(file), Some(validated)) =
            (client, document_type, request.file.as_ref(), validated)
        else {
            return Err(errors.into());
        };
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let stored = self
            .store_and_insert(
                actor,
                &client,
                document_type,
                title.trim(),
                request.description.as_deref(),
                file,
                &validated,
            )
            .await;
        let document = match stored {
            Err(ServiceError::Storage(StorageError::InvalidObjectKey)) => {
                return Err(ValidationErrors::single("filename", UNUSABLE_KEY).into());
            }
            other => other?,
        };

        self.access_logs
            .record_best_effort(document.id, Some(actor.id), AccessAction::Upload, meta)
            .await;
        self.enqueue_processing(document.id).await;
        info!(document_id = %document.id, actor = %actor.username, key = %document.object_key, "document uploaded");
        Ok(document)
    }

    /// Stores each file independently and reports per-file outcomes in order.
    pub async fn bulk_upload(
        &self,
        actor: &User,
        meta: &RequestMeta,
        request: BulkUploadRequest,
    ) -> ServiceResult<BulkUploadReport> {
        let mut errors = ValidationErrors::new();
        let client_id = parse_client_id(request.client_id.as_deref(), &mut errors);
        let document_type =
            validation::parse_document_type(request.document_type.as_deref(), &mut errors);
        if request.files.is_empty() {
            errors.add("files", "no files were submitted");
        }
        let client = self.visible_client(actor, client_id, &mut errors).await?;
        let (Some(client), Some(document_type)) = (client, document_type) else {
            return Err(errors.into());
        };
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let mut results = Vec::with_capacity(request.files.len());
        for (index, file) in request.files.iter().enumerate() {
            let outcome = match validation::validate_upload(file.candidate(), &self.settings.upload_policy) {
                Err(file_errors) => Err(file_errors),
                Ok(validated) => {
                    let title: String = file.filename.chars().take(validation::MAX_TITLE_LEN).collect();
                    self.store_and_insert(actor, &client, document_type, &title, None, file, &validated)
                        .await
                        .map_err(|err| {
                            warn!(index, filename = %file.filename, "bulk upload item failed: {err}");
                            ValidationErrors::single("file", item_failure_reason(&err))
                        })
                }
            };

            match outcome {
                Ok(document) => {
                    self.access_logs
                        .record_best_effort(document.id, Some(actor.id), AccessAction::Upload, meta)
                        .await;
                    self.enqueue_processing(document.id).await;
                    results.push(BulkUploadItem {
                        index,
                        filename: file.filename.clone(),
                        status: "uploaded",
                        document_id: Some(document.id),
                        errors: None,
                    });
                }
                Err(item_errors) => results.push(BulkUploadItem {
                    index,
                    filename: file.filename.clone(),
                    status: "failed",
                    document_id: None,
                    errors: Some(item_errors),
                }),
            }
        }

        let uploaded = results.iter().filter(|item| item.document_id.is_some()).count();
        let failed = results.len() - uploaded;
        info!(client_id = %client.id, uploaded, failed, "bulk upload finished");
        Ok(BulkUploadReport {
            uploaded,
            failed,
            results,
        })
    }

    pub async fn list(
        &self,
        actor: &User,
        filter: &DocumentFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<DocumentListItem>> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM documents d JOIN clients c ON c.id = d.client_id WHERE 1 = 1",
        );
        push_client_scope(&mut count, actor, "c");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(LIST_SELECT);
        push_client_scope(&mut query, actor, "c");
        push_filter(&mut query, filter);
        query.push(" ORDER BY d.uploaded_at DESC, d.id LIMIT ");
        query.push_bind(page.limit());
        query.push(" OFFSET ");
        query.push_bind(page.offset());
        let rows: Vec<DocumentListItem> = query.build_query_as().fetch_all(&self.db).await?;

        Ok(Page::new(page, total, rows))
    }

    /// All documents of one client, newest first.
    pub async fn list_for_client(
        &self,
        actor: &User,
        client_id: Uuid,
    ) -> ServiceResult<Vec<DocumentListItem>> {
        self.clients
            .find_visible(actor, client_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("client", client_id))?;

        let mut query = QueryBuilder::<Sqlite>::new(LIST_SELECT);
        query.push(" AND d.client_id = ");
        query.push_bind(client_id);
        query.push(" ORDER BY d.uploaded_at DESC, d.id");
        Ok(query.build_query_as().fetch_all(&self.db).await?)
    }

    /// Loads a document and logs the view.
    pub async fn get(&self, actor: &User, id: Uuid, meta: &RequestMeta) -> ServiceResult<Document> {
        let document = self.find_visible(actor, id).await?;
        self.access_logs
            .record_best_effort(document.id, Some(actor.id), AccessAction::View, meta)
            .await;
        Ok(document)
    }

    /// Edits descriptive metadata; the object key never changes.
    pub async fn update(
        &self,
        actor: &User,
        id: Uuid,
        patch: DocumentPatch,
        meta: &RequestMeta,
    ) -> ServiceResult<Document> {
        let document = self.find_visible(actor, id).await?;

        let mut errors = ValidationErrors::new();
        if let Some(title) = &patch.title {
            validation::validate_title(title, &mut errors);
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE documents SET updated_at = ");
        query.push_bind(Utc::now());
        query.push(", version = version + 1");
        if let Some(title) = patch.title {
            query.push(", title = ");
            query.push_bind(title.trim().to_string());
        }
        if let Some(description) = patch.description {
            query.push(", description = ");
            query.push_bind(description);
        }
        if let Some(document_type) = patch.document_type {
            query.push(", document_type = ");
            query.push_bind(document_type);
        }
        query.push(" WHERE id = ");
        query.push_bind(document.id);
        query.push(" AND version = ");
        query.push_bind(document.version);
        query.push(" RETURNING *");
        let updated: Document = query
            .build_query_as()
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::ConcurrentModification(document.id))?;

        self.access_logs
            .record_best_effort(updated.id, Some(actor.id), AccessAction::Update, meta)
            .await;
        Ok(updated)
    }

    /// Deletes the row, then the object. A failed object delete is logged
    /// with its key and never resurrects the row.
    pub async fn delete(&self, actor: &User, id: Uuid, meta: &RequestMeta) -> ServiceResult<()> {
        let document = self.find_visible(actor, id).await?;
        self.access_logs
            .record_best_effort(document.id, Some(actor.id), AccessAction::Delete, meta)
            .await;

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document.id)
            .execute(&self.db)
            .await?;

        let location = document.location();
        let target = self.regions.for_location(&location);
        match target.store.delete(&location).await {
            Ok(true) => info!(document_id = %document.id, key = %location.key, "document and object deleted"),
            Ok(false) => warn!(document_id = %document.id, key = %location.key, "object was already missing"),
            Err(err) => error!(
                document_id = %document.id,
                bucket = %location.bucket,
                key = %location.key,
                "orphaned object left behind: {err}"
            ),
        }
        Ok(())
    }

    /// Issues a presigned link and logs the download.
    pub async fn download(&self, actor: &User, id: Uuid, meta: &RequestMeta) -> ServiceResult<DownloadLink> {
        let document = self.find_visible(actor, id).await?;
        let location = document.location();
        let target = self.regions.for_location(&location);
        let link = target
            .store
            .presign_get(&location, self.settings.download_ttl)
            .await?;

        self.access_logs
            .record_best_effort(document.id, Some(actor.id), AccessAction::Download, meta)
            .await;
        Ok(DownloadLink {
            download_url: link.url,
            expires_in: self.settings.download_ttl.as_secs(),
            filename: document.original_filename,
        })
    }

    /// `processed -> verified | rejected`, stamping the reviewer.
    pub async fn review(
        &self,
        actor: &User,
        id: Uuid,
        decision: ReviewDecision,
        notes: Option<String>,
    ) -> ServiceResult<Document> {
        let document = self.find_visible(actor, id).await?;
        let change = StatusChange {
            reviewed_by: Some(actor.id),
            review_notes: Some(notes.filter(|n| !n.trim().is_empty())),
            ..StatusChange::default()
        };
        let reviewed = self.write_transition(&document, decision.target(), change).await?;
        info!(document_id = %id, reviewer = %actor.username, status = %reviewed.status, "document reviewed");
        Ok(reviewed)
    }

    /// Queues another processing run if the document may move to `processing`.
    pub async fn reprocess(&self, actor: &User, id: Uuid) -> ServiceResult<Job> {
        let document = self.find_visible(actor, id).await?;
        lifecycle::check_transition(document.status, DocumentStatus::Processing)?;
        let job = self
            .queue
            .enqueue(&Task::ProcessDocument {
                document_id: document.id,
            })
            .await?;
        info!(document_id = %id, job_id = %job.id, "document queued for reprocessing");
        Ok(job)
    }

    pub async fn statistics(
        &self,
        actor: &User,
        filter: &DocumentFilter,
    ) -> ServiceResult<DocumentStatistics> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT d.status, d.document_type, COUNT(*) FROM documents d \
             JOIN clients c ON c.id = d.client_id WHERE 1 = 1",
        );
        push_client_scope(&mut query, actor, "c");
        push_filter(&mut query, filter);
        query.push(" GROUP BY d.status, d.document_type");
        let rows: Vec<(DocumentStatus, DocumentType, i64)> =
            query.build_query_as().fetch_all(&self.db).await?;

        let mut by_status: BTreeMap<DocumentStatus, i64> =
            DocumentStatus::ALL.iter().map(|status| (*status, 0)).collect();
        let mut by_type = BTreeMap::new();
        let mut total = 0;
        for (status, document_type, count) in rows {
            total += count;
            *by_status.entry(status).or_default() += count;
            *by_type.entry(document_type).or_default() += count;
        }
        Ok(DocumentStatistics {
            total,
            by_status,
            by_type,
        })
    }

    // ---- processing-side operations ----

    pub async fn find(&self, id: Uuid) -> ServiceResult<Option<Document>> {
        Ok(sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn mark_processing(&self, document: &Document) -> ServiceResult<Document> {
        let change = StatusChange {
            processing_error: Some(None),
            ..StatusChange::default()
        };
        self.write_transition(document, DocumentStatus::Processing, change).await
    }

    pub async fn mark_processed(
        &self,
        document: &Document,
        extracted_data: serde_json::Value,
        ocr_text: Option<String>,
    ) -> ServiceResult<Document> {
        let change = StatusChange {
            processing_error: Some(None),
            extracted_data: Some(extracted_data),
            ocr_text: Some(ocr_text),
            processed_at: Some(Utc::now()),
            ..StatusChange::default()
        };
        self.write_transition(document, DocumentStatus::Processed, change).await
    }

    /// `processing -> uploaded`, keeping the reason.
    pub async fn reset_to_uploaded(&self, document: &Document, reason: &str) -> ServiceResult<Document> {
        let change = StatusChange {
            processing_error: Some(Some(reason.to_string())),
            ..StatusChange::default()
        };
        self.write_transition(document, DocumentStatus::Uploaded, change).await
    }

    /// `uploaded -> failed` once processing retries are exhausted.
    pub async fn mark_failed(&self, document: &Document, reason: &str) -> ServiceResult<Document> {
        let change = StatusChange {
            processing_error: Some(Some(reason.to_string())),
            ..StatusChange::default()
        };
        self.write_transition(document, DocumentStatus::Failed, change).await
    }

    pub async fn mark_archived(&self, document: &Document, class: StorageClass) -> ServiceResult<Document> {
        let now = Utc::now();
        sqlx::query_as::<_, Document>(
            "UPDATE documents SET storage_class = ?, archived_at = ?, updated_at = ?, version = version + 1
             WHERE id = ? AND version = ?
             RETURNING *",
        )
        .bind(class.as_str())
        .bind(now)
        .bind(now)
        .bind(document.id)
        .bind(document.version)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ServiceError::ConcurrentModification(document.id))
    }

    /// Unarchived documents of clients completed before `cutoff`.
    pub async fn archive_candidates(&self, cutoff: DateTime<Utc>) -> ServiceResult<Vec<Document>> {
        Ok(sqlx::query_as::<_, Document>(
            "SELECT d.* FROM documents d JOIN clients c ON c.id = d.client_id
             WHERE c.status = 'completed' AND c.updated_at < ? AND d.archived_at IS NULL
             ORDER BY d.uploaded_at",
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?)
    }

    /// Documents left in `processing` since before `cutoff`.
    pub async fn stale_processing(&self, cutoff: DateTime<Utc>) -> ServiceResult<Vec<Document>> {
        Ok(sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE status = 'processing' AND updated_at < ? ORDER BY updated_at",
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?)
    }

    pub async fn notification_context(&self, id: Uuid) -> ServiceResult<Option<NotificationContext>> {
        let Some(document) = self.find(id).await? else {
            return Ok(None);
        };
        let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?")
            .bind(document.client_id)
            .fetch_one(&self.db)
            .await?;
        let assignee = match client.assigned_to {
            Some(user_id) => sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?,
            None => None,
        };
        Ok(Some(NotificationContext {
            document,
            client,
            assignee,
        }))
    }

    // ---- helpers ----

    async fn find_visible(&self, actor: &User, id: Uuid) -> ServiceResult<Document> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT d.* FROM documents d JOIN clients c ON c.id = d.client_id WHERE d.id = ",
        );
        query.push_bind(id);
        push_client_scope(&mut query, actor, "c");
        let document: Option<Document> = query.build_query_as().fetch_optional(&self.db).await?;
        document.ok_or_else(|| ServiceError::not_found("document", id))
    }

    /// Resolves the target client, recording a field error if it is not visible.
    async fn visible_client(
        &self,
        actor: &User,
        client_id: Option<Uuid>,
        errors: &mut ValidationErrors,
    ) -> ServiceResult<Option<Client>> {
        let Some(client_id) = client_id else {
            return Ok(None);
        };
        let client = self.clients.find_visible(actor, client_id).await?;
        if client.is_none() {
            errors.add("client_id", "client not found");
        }
        Ok(client)
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_and_insert(
        &self,
        actor: &User,
        client: &Client,
        document_type: DocumentType,
        title: &str,
        description: Option<&str>,
        file: &UploadedFile,
        validated: &ValidatedUpload,
    ) -> ServiceResult<Document> {
        let target: &StoreTarget = self.regions.resolve(client.region);
        let now = Utc::now();
        let location = target.location(object_key(client.id, document_type, now, &validated.filename));

        let stored = target
            .store
            .put(&location, file.bytes.clone(), validated.content_type)
            .await?;

        let inserted = sqlx::query_as::<_, Document>(
            "INSERT INTO documents (
                 id, client_id, document_type, title, description, file_size, file_type,
                 original_filename, bucket, object_key, region, storage_class, etag, status,
                 uploaded_by, uploaded_at, updated_at, version
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(client.id)
        .bind(document_type)
        .bind(title)
        .bind(description)
        .bind(stored.size_bytes)
        .bind(validated.content_type)
        .bind(&file.filename)
        .bind(&location.bucket)
        .bind(&location.key)
        .bind(&location.region)
        .bind(StorageClass::Standard.as_str())
        .bind(&stored.etag)
        .bind(DocumentStatus::Uploaded)
        .bind(actor.id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(document) => Ok(document),
            Err(err) => {
                if let Err(cleanup) = target.store.delete(&location).await {
                    error!(key = %location.key, "could not remove object after failed insert: {cleanup}");
                }
                Err(err.into())
            }
        }
    }

    async fn enqueue_processing(&self, document_id: Uuid) {
        if let Err(err) = self.queue.enqueue(&Task::ProcessDocument { document_id }).await {
            error!(%document_id, "could not enqueue processing; document stays uploaded: {err}");
        }
    }

    async fn write_transition(
        &self,
        document: &Document,
        to: DocumentStatus,
        change: StatusChange,
    ) -> ServiceResult<Document> {
        lifecycle::check_transition(document.status, to)?;

        let now = Utc::now();
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE documents SET status = ");
        query.push_bind(to);
        query.push(", updated_at = ");
        query.push_bind(now);
        query.push(", version = version + 1");
        if let Some(processing_error) = change.processing_error {
            query.push(", processing_error = ");
            query.push_bind(processing_error);
        }
        if let Some(extracted_data) = change.extracted_data {
            query.push(", extracted_data = ");
            query.push_bind(Json(extracted_data));
        }
        if let Some(ocr_text) = change.ocr_text {
            query.push(", ocr_text = ");
            query.push_bind(ocr_text);
        }
        if let Some(processed_at) = change.processed_at {
            query.push(", processed_at = ");
            query.push_bind(processed_at);
        }
        if let Some(reviewed_by) = change.reviewed_by {
            query.push(", verified_by = ");
            query.push_bind(reviewed_by);
            query.push(", verified_at = ");
            query.push_bind(now);
        }
        if let Some(notes) = change.review_notes {
            query.push(", verification_notes = ");
            query.push_bind(notes);
        }
        query.push(" WHERE id = ");
        query.push_bind(document.id);
        query.push(" AND version = ");
        query.push_bind(document.version);
        query.push(" RETURNING *");

        let updated: Document = query
            .build_query_as()
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::ConcurrentModification(document.id))?;
        info!(document_id = %document.id, from = %document.status, to = %to, "document status changed");
        Ok(updated)
    }
}

/// `documents/clients/{client}/{type}/{YYYYmmdd_HHMMSS_micros}_{filename}`.
pub fn object_key(
    client_id: Uuid,
    document_type: DocumentType,
    at: DateTime<Utc>,
    filename: &str,
) -> String {
    format!(
        "documents/clients/{}/{}/{}_{}",
        client_id,
        document_type,
        at.format("%Y%m%d_%H%M%S_%6f"),
        filename
    )
}

fn parse_client_id(raw: Option<&str>, errors: &mut ValidationErrors) -> Option<Uuid> {
    match raw.map(str::trim) {
        None | Some("") => {
            errors.add("client_id", "this field is required");
            None
        }
        Some(value) => match Uuid::parse_str(value) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("client_id", "must be a valid UUID");
                None
            }
        },
    }
}

fn item_failure_reason(err: &ServiceError) -> String {
    match err {
        ServiceError::Storage(StorageError::InvalidObjectKey | StorageError::InvalidBucketName(_)) => {
            UNUSABLE_KEY.to_string()
        }
        ServiceError::Storage(StorageError::Unavailable(_) | StorageError::Io(_)) => {
            "storage unavailable".to_string()
        }
        ServiceError::Validation(errors) => errors.to_string(),
        _ => "the file could not be stored".to_string(),
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &DocumentFilter) {
    if let Some(client_id) = filter.client_id {
        builder.push(" AND d.client_id = ");
        builder.push_bind(client_id);
    }
    if let Some(document_type) = filter.document_type {
        builder.push(" AND d.document_type = ");
        builder.push_bind(document_type);
    }
    if let Some(status) = filter.status {
        builder.push(" AND d.status = ");
        builder.push_bind(status);
    }
}
