//! Construction of the store, queue, storage, inspector and notifier.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use filescan_core::{Config, InspectorKind, Notifier};
use filescan_db::{InMemoryMetadataStore, MetadataStore, PgMetadataStore, ScanJobRepository};
use filescan_infra::{WebhookNotifier, WebhookNotifierConfig};
use filescan_services::{Inspector, KeywordInspector};
use filescan_storage::{LocalStorage, Storage};
use filescan_worker::{
    InMemoryJobQueue, JobQueue, JobQueueConfig, PgJobQueue, ScanServices, WorkerPool,
    WorkerPoolConfig,
};

use crate::state::AppState;

/// Store, queue and storage shared by the HTTP handlers and the worker pool.
pub struct Backends {
    pub store: Arc<dyn MetadataStore>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<dyn Storage>,
    pub pool: Option<PgPool>,
}

impl Backends {
    pub fn into_state(self, config: Config) -> AppState {
        AppState {
            config,
            store: self.store,
            queue: self.queue,
            storage: self.storage,
            pool: self.pool,
        }
    }
}

pub async fn build_backends(config: &Config, pool: Option<PgPool>) -> Result<Backends> {
    let storage = LocalStorage::new(&config.upload_dir)
        .await
        .context("Failed to initialize upload storage")?;
    tracing::info!(upload_dir = %config.upload_dir, "Local storage initialized");

    let queue_config = JobQueueConfig::from(config);
    let (store, queue): (Arc<dyn MetadataStore>, Arc<dyn JobQueue>) = match &pool {
        Some(pool) => (
            Arc::new(PgMetadataStore::new(pool.clone())),
            Arc::new(PgJobQueue::new(
                ScanJobRepository::new(pool.clone()),
                queue_config,
            )),
        ),
        None => (
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryJobQueue::new(queue_config)),
        ),
    };

    Ok(Backends {
        store,
        queue,
        storage: Arc::new(storage),
        pool,
    })
}

pub fn build_inspector(config: &Config) -> Result<Arc<dyn Inspector>> {
    match config.inspector {
        InspectorKind::Keyword => Ok(Arc::new(KeywordInspector)),
        #[cfg(feature = "clamav")]
        InspectorKind::ClamAv => {
            // Keep a daemon scan inside the attempt's lease.
            let timeout_secs = config.scan_lease_secs.clamp(1, 30);
            tracing::info!(
                host = %config.clamav_host,
                port = config.clamav_port,
                timeout_secs,
                "Using ClamAV inspector"
            );
            Ok(Arc::new(filescan_services::ClamAvInspector::with_timeout(
                config.clamav_host.clone(),
                config.clamav_port,
                timeout_secs,
            )))
        }
        #[cfg(not(feature = "clamav"))]
        InspectorKind::ClamAv => Err(anyhow::anyhow!(
            "INSPECTOR=clamav requires the 'clamav' feature"
        )),
    }
}

pub fn build_notifier(config: &Config) -> Result<Option<Arc<dyn Notifier>>> {
    let Some(url) = &config.webhook_url else {
        tracing::info!("WEBHOOK_URL not set, infection notifications disabled");
        return Ok(None);
    };

    let notifier = WebhookNotifier::new(WebhookNotifierConfig {
        url: url.clone(),
        signing_secret: config.webhook_secret.clone(),
        timeout: config.webhook_timeout(),
    })?;
    tracing::info!(
        url = %url,
        signed = config.webhook_secret.is_some(),
        "Infection notifications enabled"
    );
    Ok(Some(Arc::new(notifier)))
}

pub fn start_workers(config: &Config, backends: &Backends) -> Result<WorkerPool> {
    let services = ScanServices {
        queue: backends.queue.clone(),
        store: backends.store.clone(),
        storage: backends.storage.clone(),
        inspector: build_inspector(config)?,
        notifier: build_notifier(config)?,
    };
    Ok(WorkerPool::spawn(services, WorkerPoolConfig::from(config)))
}
