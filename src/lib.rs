//! Document storage for an immigration case-management system: client and
//! document records in SQLite, payloads in an object store, and a durable job
//! queue for post-upload processing.

pub mod app;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use jobs::queue::JobQueue;
use services::{
    access_log_service::AccessLogService, client_service::ClientService,
    document_service::DocumentService, storage::local::LocalObjectStore, user_service::UserService,
};
use sqlx::SqlitePool;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub users: UserService,
    pub clients: ClientService,
    pub documents: DocumentService,
    pub access_logs: AccessLogService,
    /// Serves presigned links when documents live on local disk.
    pub local_objects: Option<LocalObjectStore>,
}

impl AppState {
    pub fn new(db: SqlitePool, documents: DocumentService, local_objects: Option<LocalObjectStore>) -> Self {
        Self {
            users: UserService::new(db.clone()),
            clients: ClientService::new(db.clone()),
            access_logs: AccessLogService::new(db.clone()),
            documents,
            local_objects,
            db,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        self.documents.queue()
    }
}
