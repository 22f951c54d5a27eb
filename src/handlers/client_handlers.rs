//! `/clients/` endpoints.

use crate::{
    AppState,
    errors::AppError,
    middleware::CurrentUser,
    models::{
        client::ClientView,
        document::DocumentListItem,
        page::{Page, PageRequest},
    },
    services::client_service::{ClientFilter, ClientInput, ClientPatch},
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: Uuid,
}

/// `GET /clients/?status=&region=&search=&page=&page_size=`
pub async fn list_clients(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    filter: Result<Query<ClientFilter>, QueryRejection>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<Page<ClientView>>, AppError> {
    let Query(filter) = filter?;
    let Query(page) = page?;
    Ok(Json(state.clients.list(&actor, &filter, page).await?))
}

/// `POST /clients/`
pub async fn create_client(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    body: Result<Json<ClientInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) = body?;
    let client = state.clients.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn get_client(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ClientView>, AppError> {
    let Path(id) = id?;
    Ok(Json(state.clients.get(&actor, id).await?))
}

/// `PUT /clients/{id}/`: every editable field is required.
pub async fn replace_client(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ClientInput>, JsonRejection>,
) -> Result<Json<ClientView>, AppError> {
    let Path(id) = id?;
    let Json(input) = body?;
    Ok(Json(state.clients.update(&actor, id, input.into()).await?))
}

/// `PATCH /clients/{id}/`
pub async fn patch_client(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ClientPatch>, JsonRejection>,
) -> Result<Json<ClientView>, AppError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    Ok(Json(state.clients.update(&actor, id, patch).await?))
}

/// `DELETE /clients/{id}/`: staff-only soft delete.
pub async fn delete_client(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    state.clients.soft_delete(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn client_documents(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<DocumentListItem>>, AppError> {
    let Path(id) = id?;
    Ok(Json(state.documents.list_for_client(&actor, id).await?))
}

/// `POST /clients/{id}/assign/` with `{"user_id": ...}`.
pub async fn assign_client(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<ClientView>, AppError> {
    let Path(id) = id?;
    let Json(request) = body?;
    Ok(Json(state.clients.assign(&actor, id, request.user_id).await?))
}
