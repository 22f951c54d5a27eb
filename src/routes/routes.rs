//! Defines routes for the document service.
//!
//! ## Structure
//! - **Public**
//!   - `GET /healthz`, `GET /readyz`
//!   - `GET /objects/{bucket}/{*key}`: presigned local downloads
//!
//! - **Authenticated**
//!   - `/clients/`, `/clients/{id}/`, `/clients/{id}/documents/`, `/clients/{id}/assign/`
//!   - `/documents/`, `/documents/{id}/` and its `download/`, `verify/`,
//!     `reject/`, `reprocess/` actions, `/documents/bulk_upload/`,
//!     `/documents/statistics/`
//!   - `/access-logs/`, `/access-logs/{id}/` (staff only)

use crate::{
    AppState,
    handlers::{
        access_log_handlers::{get_access_log, list_access_logs},
        client_handlers::{
            assign_client, client_documents, create_client, delete_client, get_client,
            list_clients, patch_client, replace_client,
        },
        document_handlers::{
            bulk_upload, delete_document, document_statistics, download_document, get_document,
            list_documents, reject_document, reprocess_document, update_document, upload_document,
            verify_document,
        },
        health_handlers::{healthz, readyz},
        object_handlers::get_object,
    },
    middleware::auth_middleware,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the full router.
///
/// `body_limit` caps a whole request body, so it must leave room for a bulk
/// upload of several files.
pub fn routes(state: AppState, body_limit: usize) -> Router {
    let protected = Router::new()
        .route("/clients/", get(list_clients).post(create_client))
        .route(
            "/clients/{id}/",
            get(get_client)
                .put(replace_client)
                .patch(patch_client)
                .delete(delete_client),
        )
        .route("/clients/{id}/documents/", get(client_documents))
        .route("/clients/{id}/assign/", post(assign_client))
        .route("/documents/", get(list_documents).post(upload_document))
        .route("/documents/bulk_upload/", post(bulk_upload))
        .route("/documents/statistics/", get(document_statistics))
        .route(
            "/documents/{id}/",
            get(get_document)
                .patch(update_document)
                .delete(delete_document),
        )
        .route("/documents/{id}/download/", get(download_document))
        .route("/documents/{id}/verify/", post(verify_document))
        .route("/documents/{id}/reject/", post(reject_document))
        .route("/documents/{id}/reprocess/", post(reprocess_document))
        .route("/access-logs/", get(list_access_logs))
        .route("/access-logs/{id}/", get(get_access_log))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects/{bucket}/{*key}", get(get_object))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
