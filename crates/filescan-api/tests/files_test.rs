//! Listing, lookup and end-to-end scan tests.
//!
//! Run with: `cargo test -p filescan-api --test files_test`

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use filescan_core::models::{FileMetadata, FileStats, FileStatus, ScanResult};
use filescan_services::KeywordInspector;
use filescan_worker::{ScanServices, WorkerPool, WorkerPoolConfig};
use helpers::{setup_test_app, TestApp};

fn start_pool(app: &TestApp) -> WorkerPool {
    WorkerPool::spawn(
        ScanServices {
            queue: app.queue.clone(),
            store: app.store.clone(),
            storage: app.storage.clone(),
            inspector: Arc::new(KeywordInspector),
            notifier: None,
        },
        WorkerPoolConfig {
            workers: 2,
            lease_duration: Duration::from_secs(5),
            error_backoff: Duration::from_millis(10),
        },
    )
}

async fn wait_until_scanned(app: &TestApp, id: Uuid) -> FileMetadata {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record: FileMetadata = app.client().get(&format!("/files/{}", id)).await.json();
        if record.status == FileStatus::Scanned {
            return record;
        }
        assert!(tokio::time::Instant::now() < deadline, "file was never scanned");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_list_files_newest_first() {
    let app = setup_test_app().await;
    let first: FileMetadata = app.upload("a.pdf", b"one").await.json();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second: FileMetadata = app.upload("b.pdf", b"two").await.json();

    let response = app.client().get("/files").await;
    assert_eq!(response.status_code(), 200);
    let files: Vec<FileMetadata> = response.json();
    let ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    let page: Vec<FileMetadata> = app.client().get("/files?limit=1&offset=1").await.json();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, first.id);
}

#[tokio::test]
async fn test_list_files_without_params_returns_every_record() {
    let app = setup_test_app().await;
    for i in 0..60 {
        let response = app.upload(&format!("doc-{}.pdf", i), b"contents").await;
        assert_eq!(response.status_code(), 201);
    }

    let files: Vec<FileMetadata> = app.client().get("/files").await.json();
    assert_eq!(files.len(), 60);
    assert!(files
        .windows(2)
        .all(|pair| pair[0].uploaded_at >= pair[1].uploaded_at));

    let limited: Vec<FileMetadata> = app.client().get("/files?limit=50").await.json();
    assert_eq!(limited.len(), 50);
}

#[tokio::test]
async fn test_get_unknown_file_is_404() {
    let app = setup_test_app().await;
    let response = app.client().get(&format!("/files/{}", Uuid::new_v4())).await;
    assert_eq!(response.status_code(), 404);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let app = setup_test_app().await;
    let response = app.client().get(&format!("/jobs/{}", Uuid::new_v4())).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_uploaded_files_are_scanned() {
    let app = setup_test_app().await;
    let infected: FileMetadata = app.upload("giveaway.pdf", b"bitcoin giveaway").await.json();
    let clean: FileMetadata = app.upload("notes.docx", b"meeting notes").await.json();

    let pool = start_pool(&app);
    let infected = wait_until_scanned(&app, infected.id).await;
    let clean = wait_until_scanned(&app, clean.id).await;
    pool.shutdown().await;

    assert_eq!(infected.result, Some(ScanResult::Infected));
    assert!(infected.scanned_at.is_some());
    assert_eq!(clean.result, Some(ScanResult::Clean));

    let stats: FileStats = app.client().get("/files/stats").await.json();
    assert_eq!(
        stats,
        FileStats {
            total: 2,
            pending: 0,
            scanned: 2,
            clean: 1,
            infected: 1,
        }
    );

    let scanned: Vec<FileMetadata> = app.client().get("/files?status=scanned").await.json();
    assert_eq!(scanned.len(), 2);
    let pending: Vec<FileMetadata> = app.client().get("/files?status=pending").await.json();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_health_reports_memory_backend() {
    let app = setup_test_app().await;
    let body: serde_json::Value = app.client().get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["database"], "not_configured");
}
