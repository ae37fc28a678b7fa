//! Test helpers: build AppState and router over in-memory backends.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use filescan_api::setup::routes;
use filescan_api::state::AppState;
use filescan_core::models::{JobType, Lease, RetryDecision, ScanJob, SubmitOptions};
use filescan_core::Config;
use filescan_db::{InMemoryMetadataStore, MetadataStore};
use filescan_storage::{LocalStorage, Storage};
use filescan_worker::{InMemoryJobQueue, JobQueue, JobQueueConfig, QueueError};

/// Test application: server plus direct handles on its backends.
pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<InMemoryMetadataStore>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<LocalStorage>,
    pub config: Config,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub async fn upload(&self, filename: &str, content: &[u8]) -> TestResponse {
        let part = Part::bytes(bytes::Bytes::copy_from_slice(content))
            .file_name(filename.to_string())
            .mime_type("application/octet-stream");
        self.server
            .post("/upload")
            .multipart(MultipartForm::new().add_part("file", part))
            .await
    }

    /// Files currently present in the upload directory.
    pub fn stored_files(&self) -> usize {
        std::fs::read_dir(self._temp_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn test_config(upload_dir: &TempDir) -> Config {
    Config {
        upload_dir: upload_dir.path().display().to_string(),
        max_upload_size_bytes: 1024,
        scan_backoff_base_ms: 10,
        ..Config::default()
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with_queue(None).await
}

/// Build the app; `queue` replaces the default in-memory queue.
pub async fn setup_test_app_with_queue(queue: Option<Arc<dyn JobQueue>>) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = test_config(&temp_dir);

    let storage = Arc::new(
        LocalStorage::new(temp_dir.path())
            .await
            .expect("Failed to create local storage"),
    );
    let store = Arc::new(InMemoryMetadataStore::new());
    let queue = queue.unwrap_or_else(|| {
        Arc::new(InMemoryJobQueue::new(JobQueueConfig::from(&config))) as Arc<dyn JobQueue>
    });

    let state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone() as Arc<dyn MetadataStore>,
        queue: queue.clone(),
        storage: storage.clone() as Arc<dyn Storage>,
        pool: None,
    });

    let router = routes::setup_routes(&config, state).expect("Failed to build routes");
    let server = TestServer::new(router).expect("Failed to start test server");

    TestApp {
        server,
        store,
        queue,
        storage,
        config,
        _temp_dir: temp_dir,
    }
}

/// Queue whose durability layer is always down.
pub struct UnavailableQueue;

#[async_trait]
impl JobQueue for UnavailableQueue {
    async fn submit(
        &self,
        _job_type: JobType,
        _payload: serde_json::Value,
        _options: SubmitOptions,
    ) -> Result<Uuid, QueueError> {
        Err(QueueError::QueueUnavailable("connection refused".to_string()))
    }

    async fn acquire(&self, _job_type: JobType) -> Result<(ScanJob, Lease), QueueError> {
        Err(QueueError::QueueUnavailable("connection refused".to_string()))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost(lease.job_id))
    }

    async fn fail(&self, lease: &Lease, _error: &str) -> Result<RetryDecision, QueueError> {
        Err(QueueError::LeaseLost(lease.job_id))
    }

    async fn progress(&self, lease: &Lease, _percent: i32) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost(lease.job_id))
    }

    async fn get(&self, _job_id: Uuid) -> Result<Option<ScanJob>, QueueError> {
        Ok(None)
    }
}
