//! `/documents/` endpoints.
//!
//! Uploads arrive as multipart forms and are buffered per file; the upload
//! size limit is enforced by the router's body limit and by validation.

use crate::{
    AppState,
    errors::AppError,
    middleware::{ClientMeta, CurrentUser},
    models::{
        document::DocumentListItem,
        page::{Page, PageRequest},
    },
    services::document_service::{
        BulkUploadReport, BulkUploadRequest, DocumentDetail, DocumentFilter, DocumentPatch,
        DocumentStatistics, DownloadLink, ReviewDecision, UploadRequest, UploadedFile,
    },
};
use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReprocessResponse {
    pub status: &'static str,
    pub job_id: Uuid,
}

/// `GET /documents/?client_id=&document_type=&status=&page=&page_size=`
pub async fn list_documents(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    filter: Result<Query<DocumentFilter>, QueryRejection>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<Page<DocumentListItem>>, AppError> {
    let Query(filter) = filter?;
    let Query(page) = page?;
    Ok(Json(state.documents.list(&actor, &filter, page).await?))
}

/// `POST /documents/` (multipart: client_id, document_type, title, description, file)
pub async fn upload_document(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ClientMeta(meta): ClientMeta,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart = multipart?;
    let mut request = UploadRequest::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "client_id" => request.client_id = Some(field.text().await?),
            "document_type" => request.document_type = Some(field.text().await?),
            "title" => request.title = Some(field.text().await?),
            "description" => request.description = Some(field.text().await?),
            "file" => request.file = Some(read_file(field).await?),
            _ => {}
        }
    }

    let document = state.documents.upload(&actor, &meta, request).await?;
    Ok((StatusCode::CREATED, Json(DocumentDetail::from(document))))
}

/// `POST /documents/bulk_upload/` (multipart: client_id, document_type, files[])
pub async fn bulk_upload(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ClientMeta(meta): ClientMeta,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<BulkUploadReport>), AppError> {
    let mut multipart = multipart?;
    let mut request = BulkUploadRequest::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "client_id" => request.client_id = Some(field.text().await?),
            "document_type" => request.document_type = Some(field.text().await?),
            "files" | "files[]" => request.files.push(read_file(field).await?),
            _ => {}
        }
    }

    let report = state.documents.bulk_upload(&actor, &meta, request).await?;
    let status = if report.failed == 0 {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

pub async fn get_document(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ClientMeta(meta): ClientMeta,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DocumentDetail>, AppError> {
    let Path(id) = id?;
    let document = state.documents.get(&actor, id, &meta).await?;
    Ok(Json(document.into()))
}

/// `PATCH /documents/{id}/`: title, description and type only.
pub async fn update_document(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ClientMeta(meta): ClientMeta,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<DocumentPatch>, JsonRejection>,
) -> Result<Json<DocumentDetail>, AppError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    let document = state.documents.update(&actor, id, patch, &meta).await?;
    Ok(Json(document.into()))
}

pub async fn delete_document(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ClientMeta(meta): ClientMeta,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    state.documents.delete(&actor, id, &meta).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn download_document(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ClientMeta(meta): ClientMeta,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DownloadLink>, AppError> {
    let Path(id) = id?;
    Ok(Json(state.documents.download(&actor, id, &meta).await?))
}

pub async fn verify_document(
    state: State<AppState>,
    actor: CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Option<Json<ReviewRequest>>,
) -> Result<Json<DocumentDetail>, AppError> {
    review(state, actor, id, body, ReviewDecision::Verify).await
}

pub async fn reject_document(
    state: State<AppState>,
    actor: CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Option<Json<ReviewRequest>>,
) -> Result<Json<DocumentDetail>, AppError> {
    review(state, actor, id, body, ReviewDecision::Reject).await
}

async fn review(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Option<Json<ReviewRequest>>,
    decision: ReviewDecision,
) -> Result<Json<DocumentDetail>, AppError> {
    let Path(id) = id?;
    let notes = body.and_then(|Json(request)| request.notes);
    let document = state.documents.review(&actor, id, decision, notes).await?;
    Ok(Json(document.into()))
}

/// `POST /documents/{id}/reprocess/` → 202 with the queued job id.
pub async fn reprocess_document(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id?;
    let job = state.documents.reprocess(&actor, id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ReprocessResponse {
            status: "queued",
            job_id: job.id,
        }),
    ))
}

pub async fn document_statistics(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    filter: Result<Query<DocumentFilter>, QueryRejection>,
) -> Result<Json<DocumentStatistics>, AppError> {
    let Query(filter) = filter?;
    Ok(Json(state.documents.statistics(&actor, &filter).await?))
}

async fn read_file(field: Field<'_>) -> Result<UploadedFile, AppError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(str::to_string);
    let bytes = field.bytes().await?;
    Ok(UploadedFile {
        filename,
        content_type,
        bytes,
    })
}
