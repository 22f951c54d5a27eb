//! Wires configuration into stores, services, the router and the job runtime.

use crate::{
    AppState,
    config::{AppConfig, StorageBackend},
    db,
    jobs::{
        extractor::PlaceholderExtractor,
        notifier::LogNotifier,
        queue::{JobQueue, RetryPolicy},
        scheduler::{ScheduleConfig, Scheduler},
        tasks::{MaintenanceSettings, TaskRunner},
        worker::{WorkerConfig, WorkerPool},
    },
    models::client::ClientRegion,
    routes,
    services::{
        document_service::{DocumentService, DocumentSettings},
        storage::{
            ObjectStore, ensure_bucket_name_safe,
            local::LocalObjectStore,
            memory::MemoryObjectStore,
            region::{RegionRouter, StoreTarget},
        },
        validation::UploadPolicy,
    },
};
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tracing::info;

/// Everything a process needs to serve requests and run jobs.
pub struct Application {
    pub state: AppState,
    pub queue: JobQueue,
    pub workers: WorkerPool,
    pub scheduler: Scheduler,
    body_limit: usize,
}

impl Application {
    pub async fn build(cfg: &AppConfig) -> Result<Self> {
        let pool = db::connect(&cfg.database_url)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?;
        db::migrate(&pool).await.context("running migrations")?;

        let policy = RetryPolicy {
            max_attempts: cfg.job_max_attempts,
            retry_delay: cfg.job_retry_delay,
        };
        let queue = match &cfg.queue_url {
            Some(url) => JobQueue::open(url, policy)
                .await
                .with_context(|| format!("opening job queue at {url}"))?,
            None => JobQueue::new(pool.clone(), policy),
        };

        let (regions, local_objects) = build_regions(cfg).await?;
        let documents = DocumentService::new(
            pool.clone(),
            queue.clone(),
            regions,
            DocumentSettings {
                upload_policy: UploadPolicy {
                    max_upload_size: cfg.max_upload_size,
                    allowed_extensions: cfg.allowed_extensions.clone(),
                },
                download_ttl: cfg.download_ttl,
            },
        );

        let runner = TaskRunner::new(
            documents.clone(),
            Arc::new(PlaceholderExtractor),
            Arc::new(LogNotifier),
            MaintenanceSettings {
                archive_after: cfg.archive_after,
                stuck_after: cfg.stuck_after,
                ..MaintenanceSettings::default()
            },
        );
        let workers = WorkerPool::new(
            queue.clone(),
            runner,
            WorkerConfig {
                worker_count: cfg.worker_count,
                poll_interval: cfg.poll_interval,
            },
        );
        let scheduler = Scheduler::new(
            queue.clone(),
            ScheduleConfig {
                archive_every: cfg.archive_every,
                cleanup_every: cfg.cleanup_every,
            },
        );

        Ok(Self {
            state: AppState::new(pool, documents, local_objects),
            queue,
            workers,
            scheduler,
            body_limit: cfg.max_request_size,
        })
    }

    pub fn router(&self) -> Router {
        routes::routes::routes(self.state.clone(), self.body_limit)
    }

    /// Closes the queue and the metadata pool.
    pub async fn close(&self) {
        self.queue.close().await;
        self.state.db.close().await;
    }
}

/// One target per data-residency region; with multi-region off every client
/// lands in the AU bucket.
async fn build_regions(cfg: &AppConfig) -> Result<(RegionRouter, Option<LocalObjectStore>)> {
    ensure_bucket_name_safe(&cfg.bucket_au)?;
    ensure_bucket_name_safe(&cfg.bucket_in)?;

    let mut local_objects = None;
    let (au_store, in_store): (Arc<dyn ObjectStore>, Arc<dyn ObjectStore>) = match cfg.storage_backend {
        StorageBackend::Local => {
            tokio::fs::create_dir_all(&cfg.storage_dir)
                .await
                .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
            let store = LocalObjectStore::new(
                &cfg.storage_dir,
                cfg.public_base_url.clone(),
                cfg.signing_secret.clone(),
            );
            local_objects = Some(store.clone());
            let store: Arc<dyn ObjectStore> = Arc::new(store);
            (store.clone(), store)
        }
        StorageBackend::Memory => {
            let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
            (store.clone(), store)
        }
        StorageBackend::S3 => s3_stores(cfg).await?,
    };

    let router = RegionRouter::new(
        ClientRegion::Australia,
        StoreTarget::new(&cfg.bucket_au, &cfg.region_au, au_store),
        cfg.multi_region,
    )
    .with_target(
        ClientRegion::India,
        StoreTarget::new(&cfg.bucket_in, &cfg.region_in, in_store),
    );
    info!(backend = ?cfg.storage_backend, multi_region = cfg.multi_region, "object storage configured");
    Ok((router, local_objects))
}

#[cfg(feature = "s3")]
async fn s3_stores(cfg: &AppConfig) -> Result<(Arc<dyn ObjectStore>, Arc<dyn ObjectStore>)> {
    use crate::services::storage::s3::{S3ObjectStore, S3Settings};

    let settings = |region: &str| S3Settings {
        region: region.to_string(),
        endpoint_url: cfg.s3_endpoint.clone(),
        force_path_style: cfg.s3_endpoint.is_some(),
    };
    let au = S3ObjectStore::connect(&settings(&cfg.region_au)).await;
    let india = S3ObjectStore::connect(&settings(&cfg.region_in)).await;
    Ok((Arc::new(au), Arc::new(india)))
}

#[cfg(not(feature = "s3"))]
async fn s3_stores(_cfg: &AppConfig) -> Result<(Arc<dyn ObjectStore>, Arc<dyn ObjectStore>)> {
    anyhow::bail!("this build does not include the s3 backend; rebuild with `--features s3`")
}
