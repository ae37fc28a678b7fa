//! End-to-end scan pipeline over the in-memory queue and store, local storage,
//! and the keyword inspector.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

use filescan_core::models::{
    BackoffPolicy, FileListQuery, FileMetadata, FileStats, FileStatus, JobState, JobType,
    MarkOutcome, Priority, RetryDecision, ScanJob, ScanJobPayload, ScanResult, SubmitOptions,
};
use filescan_core::notify::{InfectionAlert, NotificationError, Notifier};
use filescan_db::{InMemoryMetadataStore, MetadataStore, StoreResult};
use filescan_services::{Classification, InspectionError, Inspector, KeywordInspector};
use filescan_storage::{LocalStorage, Storage};
use filescan_worker::{
    InMemoryJobQueue, JobQueue, JobQueueConfig, ScanServices, ScanWorker, WorkerPool,
    WorkerPoolConfig,
};

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<InfectionAlert>>,
    fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_infected(&self, alert: &InfectionAlert) -> Result<(), NotificationError> {
        self.alerts.lock().await.push(alert.clone());
        if self.fail {
            return Err(NotificationError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Fails the first `failures` inspections, then defers to the keyword matcher.
struct FlakyInspector {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Inspector for FlakyInspector {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn inspect(&self, data: &[u8]) -> Result<Classification, InspectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(InspectionError::Unavailable("daemon restarting".to_string()));
        }
        KeywordInspector.inspect(data).await
    }
}

struct Harness {
    _dir: TempDir,
    queue: Arc<InMemoryJobQueue>,
    store: Arc<InMemoryMetadataStore>,
    storage: Arc<LocalStorage>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_notifier(RecordingNotifier::default()).await
    }

    async fn with_notifier(notifier: RecordingNotifier) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        Self {
            _dir: dir,
            queue: Arc::new(InMemoryJobQueue::new(JobQueueConfig {
                lease_duration: Duration::from_secs(5),
                ..JobQueueConfig::default()
            })),
            store: Arc::new(InMemoryMetadataStore::new()),
            storage: Arc::new(storage),
            notifier: Arc::new(notifier),
        }
    }

    fn services(&self, inspector: Arc<dyn Inspector>) -> ScanServices {
        ScanServices {
            queue: self.queue.clone(),
            store: self.store.clone(),
            storage: self.storage.clone(),
            inspector,
            notifier: Some(self.notifier.clone()),
        }
    }

    fn worker(&self, inspector: Arc<dyn Inspector>) -> ScanWorker {
        ScanWorker::new(
            0,
            self.services(inspector),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
    }

    /// Store `content`, create its pending record, and submit a scan job.
    async fn upload(&self, name: &str, content: &[u8], options: SubmitOptions) -> (Uuid, Uuid) {
        let path = self
            .storage
            .store(name, Bytes::copy_from_slice(content))
            .await
            .unwrap();
        self.register(name, &path, options).await
    }

    /// Create a pending record for `path` without writing any bytes.
    async fn register(&self, name: &str, path: &str, options: SubmitOptions) -> (Uuid, Uuid) {
        let record = self
            .store
            .create(FileMetadata::pending(name, path))
            .await
            .unwrap();
        let job_id = self
            .queue
            .submit_scan(&ScanJobPayload::new(record.id, path), options)
            .await
            .unwrap();
        (record.id, job_id)
    }

    async fn run_one(&self, worker: &ScanWorker) -> ScanJob {
        let (job, lease) =
            tokio::time::timeout(Duration::from_secs(5), self.queue.acquire(JobType::Scan))
                .await
                .expect("no job became available")
                .unwrap();
        worker.process(job.clone(), lease).await.unwrap();
        self.queue.get(job.id).await.unwrap().unwrap()
    }
}

fn fast_retries(max_attempts: i32) -> SubmitOptions {
    SubmitOptions {
        max_attempts,
        backoff: BackoffPolicy::exponential(Duration::from_millis(10)),
        priority: Priority::Normal,
    }
}

#[tokio::test]
async fn test_suspicious_file_is_infected_and_notified() {
    let harness = Harness::new().await;
    let worker = harness.worker(Arc::new(KeywordInspector));
    let (file_id, _) = harness
        .upload(
            "giveaway.pdf",
            b"Claim your BITCOIN giveaway now",
            SubmitOptions::default(),
        )
        .await;

    let job = harness.run_one(&worker).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.attempt_count, 1);

    let record = harness.store.get(file_id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Scanned);
    assert_eq!(record.result, Some(ScanResult::Infected));
    assert!(record.scanned_at.is_some());

    let alerts = harness.notifier.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].file_id, file_id);
    assert_eq!(alerts[0].filename, "giveaway.pdf");
    assert_eq!(alerts[0].path, record.path);
}

#[tokio::test]
async fn test_clean_file_is_not_notified() {
    let harness = Harness::new().await;
    let worker = harness.worker(Arc::new(KeywordInspector));
    let (file_id, _) = harness
        .upload("report.pdf", b"quarterly numbers", SubmitOptions::default())
        .await;

    let job = harness.run_one(&worker).await;
    assert_eq!(job.state, JobState::Completed);

    let record = harness.store.get(file_id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Scanned);
    assert_eq!(record.result, Some(ScanResult::Clean));
    assert!(harness.notifier.alerts.lock().await.is_empty());
}

#[tokio::test]
async fn test_missing_file_exhausts_and_stays_pending() {
    let harness = Harness::new().await;
    let worker = harness.worker(Arc::new(KeywordInspector));
    let (file_id, job_id) = harness
        .register("ghost.pdf", "1700000000000-ghost.pdf", fast_retries(3))
        .await;

    for attempt in 1..=3 {
        let job = harness.run_one(&worker).await;
        assert_eq!(job.attempt_count, attempt);
        let record = harness.store.get(file_id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Pending);
        assert!(record.result.is_none());
    }

    let job = harness.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt_count, 3);
    assert!(job
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("ghost.pdf")));
    assert!(harness.notifier.alerts.lock().await.is_empty());
}

#[tokio::test]
async fn test_inspection_failure_is_retried() {
    let harness = Harness::new().await;
    let inspector = Arc::new(FlakyInspector {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let worker = harness.worker(inspector.clone());
    let (file_id, _) = harness
        .upload("a.docx", b"eval(payload)", fast_retries(3))
        .await;

    let first = harness.run_one(&worker).await;
    assert_eq!(first.state, JobState::Delayed);
    let record = harness.store.get(file_id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Pending);

    let second = harness.run_one(&worker).await;
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(second.attempt_count, 2);
    assert_eq!(inspector.calls.load(Ordering::SeqCst), 2);

    let record = harness.store.get(file_id).await.unwrap().unwrap();
    assert_eq!(record.result, Some(ScanResult::Infected));
}

#[tokio::test]
async fn test_redelivery_after_persist_does_not_renotify() {
    let harness = Harness::new().await;
    let worker = harness.worker(Arc::new(KeywordInspector));
    let (file_id, job_id) = harness
        .upload("a.png", b"rm -rf /", SubmitOptions::default())
        .await;

    // A previous attempt persisted the verdict but never acked.
    let earlier = Utc::now();
    harness
        .store
        .mark_scanned(file_id, ScanResult::Infected, earlier)
        .await
        .unwrap();

    let job = harness.run_one(&worker).await;
    assert_eq!(job.id, job_id);
    assert_eq!(job.state, JobState::Completed);

    let record = harness.store.get(file_id).await.unwrap().unwrap();
    assert_eq!(record.scanned_at, Some(earlier));
    assert!(harness.notifier.alerts.lock().await.is_empty());
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_job() {
    let harness = Harness::with_notifier(RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    })
    .await;
    let worker = harness.worker(Arc::new(KeywordInspector));
    harness
        .upload("a.pdf", b"send bitcoin", SubmitOptions::default())
        .await;

    let job = harness.run_one(&worker).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(harness.notifier.alerts.lock().await.len(), 1);
}

#[tokio::test]
async fn test_lease_is_exclusive() {
    let harness = Harness::new().await;
    harness
        .upload("a.pdf", b"hello", SubmitOptions::default())
        .await;

    let (job, lease) = harness.queue.acquire(JobType::Scan).await.unwrap();
    let second =
        tokio::time::timeout(Duration::from_millis(100), harness.queue.acquire(JobType::Scan))
            .await;
    assert!(second.is_err(), "job was leased twice");

    harness.queue.ack(&lease).await.unwrap();
    assert_eq!(
        harness.queue.get(job.id).await.unwrap().unwrap().state,
        JobState::Completed
    );
}

#[tokio::test]
async fn test_backoff_delays_redelivery() {
    let harness = Harness::new().await;
    let options = SubmitOptions {
        max_attempts: 3,
        backoff: BackoffPolicy::exponential(Duration::from_millis(200)),
        priority: Priority::Normal,
    };
    harness.register("a.pdf", "missing.pdf", options).await;

    let (_, lease) = harness.queue.acquire(JobType::Scan).await.unwrap();
    let decision = harness.queue.fail(&lease, "read failed").await.unwrap();
    assert_eq!(
        decision,
        RetryDecision::WillRetry {
            delay: Duration::from_millis(200),
            next_attempt: 2
        }
    );

    let started = tokio::time::Instant::now();
    let (job, _) = harness.queue.acquire(JobType::Scan).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(job.attempt_count, 2);
}

#[tokio::test]
async fn test_pool_processes_jobs_and_drains() {
    let harness = Harness::new().await;
    let mut files = Vec::new();
    for i in 0..6 {
        let content: &[u8] = if i % 2 == 0 { b"bitcoin" } else { b"plain" };
        files.push(
            harness
                .upload(&format!("f{}.pdf", i), content, SubmitOptions::default())
                .await,
        );
    }

    let pool = WorkerPool::spawn(
        harness.services(Arc::new(KeywordInspector)),
        WorkerPoolConfig {
            workers: 3,
            lease_duration: Duration::from_secs(5),
            error_backoff: Duration::from_millis(10),
        },
    );
    assert_eq!(pool.size(), 3);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = harness.store.stats().await.unwrap();
        if stats.scanned == 6 {
            assert_eq!(stats.infected, 3);
            assert_eq!(stats.clean, 3);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "pool did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
        .await
        .expect("pool did not drain");

    for (_, job_id) in files {
        let job = harness.queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
    assert_eq!(harness.notifier.alerts.lock().await.len(), 3);
}

/// Records the job's progress at the moment the terminal update is written.
struct ProgressAtPersistStore {
    inner: InMemoryMetadataStore,
    queue: Arc<InMemoryJobQueue>,
    job_id: Mutex<Option<Uuid>>,
    progress_seen: Mutex<Vec<i32>>,
}

#[async_trait]
impl MetadataStore for ProgressAtPersistStore {
    async fn create(&self, record: FileMetadata) -> StoreResult<FileMetadata> {
        self.inner.create(record).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<FileMetadata>> {
        self.inner.get(id).await
    }

    async fn mark_scanned(
        &self,
        id: Uuid,
        result: ScanResult,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        if let Some(job_id) = *self.job_id.lock().await {
            if let Ok(Some(job)) = self.queue.get(job_id).await {
                self.progress_seen.lock().await.push(job.progress);
            }
        }
        self.inner.mark_scanned(id, result, scanned_at).await
    }

    async fn list(&self, query: &FileListQuery) -> StoreResult<Vec<FileMetadata>> {
        self.inner.list(query).await
    }

    async fn stats(&self) -> StoreResult<FileStats> {
        self.inner.stats().await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_persisting_progress_reported_before_write() {
    let harness = Harness::new().await;
    let store = Arc::new(ProgressAtPersistStore {
        inner: InMemoryMetadataStore::new(),
        queue: harness.queue.clone(),
        job_id: Mutex::new(None),
        progress_seen: Mutex::new(Vec::new()),
    });

    let path = harness
        .storage
        .store("notes.pdf", Bytes::from_static(b"meeting notes"))
        .await
        .unwrap();
    let record = store
        .create(FileMetadata::pending("notes.pdf", &path))
        .await
        .unwrap();
    let job_id = harness
        .queue
        .submit_scan(&ScanJobPayload::new(record.id, &path), fast_retries(3))
        .await
        .unwrap();
    *store.job_id.lock().await = Some(job_id);

    let worker = ScanWorker::new(
        0,
        ScanServices {
            queue: harness.queue.clone(),
            store: store.clone(),
            storage: harness.storage.clone(),
            inspector: Arc::new(KeywordInspector),
            notifier: None,
        },
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    let job = harness.run_one(&worker).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(*store.progress_seen.lock().await, vec![80]);
}
