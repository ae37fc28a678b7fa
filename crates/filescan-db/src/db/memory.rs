//! Process-local metadata store, used when no `DATABASE_URL` is configured and
//! throughout the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use filescan_core::models::{
    FileListQuery, FileMetadata, FileStats, FileStatus, MarkOutcome, ScanResult,
};

use super::error::{StoreError, StoreResult};
use super::files::MetadataStore;

#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<Uuid, FileMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create(&self, record: FileMetadata) -> StoreResult<FileMetadata> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Other(anyhow::anyhow!(
                "file {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<FileMetadata>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn mark_scanned(
        &self,
        id: Uuid,
        result: ScanResult,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.apply_scan(result, scanned_at) {
            Ok(MarkOutcome::Updated(record.clone()))
        } else {
            Ok(MarkOutcome::AlreadyScanned(record.clone()))
        }
    }

    async fn list(&self, query: &FileListQuery) -> StoreResult<Vec<FileMetadata>> {
        let records = self.records.read().await;
        let mut matching: Vec<FileMetadata> = records
            .values()
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let page = matching.into_iter().skip(query.offset() as usize);
        Ok(match query.limit() {
            Some(limit) => page.take(limit as usize).collect(),
            None => page.collect(),
        })
    }

    async fn stats(&self) -> StoreResult<FileStats> {
        let records = self.records.read().await;
        let mut stats = FileStats::default();
        for record in records.values() {
            stats.total += 1;
            match record.status {
                FileStatus::Pending => stats.pending += 1,
                FileStatus::Scanned => stats.scanned += 1,
            }
            match record.result {
                Some(ScanResult::Clean) => stats.clean += 1,
                Some(ScanResult::Infected) => stats.infected += 1,
                None => {}
            }
        }
        Ok(stats)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}
