//! `/access-logs/` endpoints. Staff only.

use crate::{
    AppState,
    errors::AppError,
    middleware::CurrentUser,
    models::{
        access_log::{AccessAction, AccessLog},
        page::{Page, PageRequest},
    },
    services::access_log_service::AccessLogFilter,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct AccessLogQuery {
    pub document_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: Option<AccessAction>,
}

impl From<AccessLogQuery> for AccessLogFilter {
    fn from(query: AccessLogQuery) -> Self {
        Self {
            document_id: query.document_id,
            user_id: query.user_id,
            action: query.action,
        }
    }
}

pub async fn list_access_logs(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    query: Result<Query<AccessLogQuery>, QueryRejection>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<Page<AccessLog>>, AppError> {
    let Query(query) = query?;
    let Query(page) = page?;
    let filter = AccessLogFilter::from(query);
    Ok(Json(state.access_logs.list(&actor, &filter, page).await?))
}

pub async fn get_access_log(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AccessLog>, AppError> {
    let Path(id) = id?;
    Ok(Json(state.access_logs.get(&actor, id).await?))
}
