//! Serves presigned links issued by the local object store.
//! Streams object bodies to avoid buffering them in memory.

use crate::{AppState, errors::AppError};
use axum::{
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct SignedLinkQuery {
    pub expires: i64,
    pub signature: String,
}

/// `GET /objects/{bucket}/{*key}?expires=&signature=`
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    link: Result<Query<SignedLinkQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(link) = link?;
    let Some(store) = state.local_objects.as_ref() else {
        return Err(AppError::not_found("object not found"));
    };
    store.verify_link(&bucket, &key, link.expires, &link.signature, Utc::now())?;

    let (file, len) = store.open(&bucket, &key).await?;
    debug!(%bucket, %key, len, "serving presigned object");
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    let content_type = mime_guess::from_path(&key).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(content_type.essence_str()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Some(filename) = key.rsplit('/').next()
        && let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=0"));
    Ok(response)
}
