use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use filescan_core::models::{FileListQuery, FileMetadata, FileStats, MarkOutcome, ScanResult};

use super::error::{StoreError, StoreResult};

/// Durable record of every uploaded file.
///
/// `mark_scanned` is the only mutation after creation and is conditional on the
/// record still being pending; `delete` exists only so a failed upload can be
/// rolled back.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create(&self, record: FileMetadata) -> StoreResult<FileMetadata>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<FileMetadata>>;

    /// Move a pending record to scanned. An already-scanned record is returned
    /// unchanged as `AlreadyScanned`; a missing one is `StoreError::NotFound`.
    async fn mark_scanned(
        &self,
        id: Uuid,
        result: ScanResult,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome>;

    /// Newest `uploaded_at` first.
    async fn list(&self, query: &FileListQuery) -> StoreResult<Vec<FileMetadata>>;

    async fn stats(&self) -> StoreResult<FileStats>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[tracing::instrument(skip(self, record), fields(file.id = %record.id))]
    async fn create(&self, record: FileMetadata) -> StoreResult<FileMetadata> {
        let created = sqlx::query_as::<Postgres, FileMetadata>(
            r#"
            INSERT INTO files (id, filename, path, status, result, uploaded_at, scanned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, filename, path, status, result, uploaded_at, scanned_at
            "#,
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(&record.path)
        .bind(record.status.to_string())
        .bind(record.result.map(|r| r.to_string()))
        .bind(record.uploaded_at)
        .bind(record.scanned_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(filename = %created.filename, "File metadata created");
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> StoreResult<Option<FileMetadata>> {
        let record = sqlx::query_as::<Postgres, FileMetadata>(
            r#"
            SELECT id, filename, path, status, result, uploaded_at, scanned_at
            FROM files
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(file.id = %id, result = %result))]
    async fn mark_scanned(
        &self,
        id: Uuid,
        result: ScanResult,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        let updated = sqlx::query_as::<Postgres, FileMetadata>(
            r#"
            UPDATE files
            SET status = 'scanned',
                result = $2,
                scanned_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING id, filename, path, status, result, uploaded_at, scanned_at
            "#,
        )
        .bind(id)
        .bind(result.to_string())
        .bind(scanned_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = updated {
            return Ok(MarkOutcome::Updated(record));
        }

        // Nothing matched: either already scanned or gone.
        match self.get(id).await? {
            Some(existing) => Ok(MarkOutcome::AlreadyScanned(existing)),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, query: &FileListQuery) -> StoreResult<Vec<FileMetadata>> {
        let mut sql = String::from(
            r#"
            SELECT id, filename, path, status, result, uploaded_at, scanned_at
            FROM files
            "#,
        );

        let mut bind_count = 1;
        if query.status.is_some() {
            sql.push_str(" WHERE status = $1 ");
            bind_count += 1;
        }

        sql.push_str(" ORDER BY uploaded_at DESC, id DESC");
        if query.limit().is_some() {
            sql.push_str(&format!(" LIMIT ${}", bind_count));
            bind_count += 1;
        }
        sql.push_str(&format!(" OFFSET ${}", bind_count));

        let mut query_builder = sqlx::query_as::<_, FileMetadata>(&sql);
        if let Some(status) = query.status {
            query_builder = query_builder.bind(status.to_string());
        }
        if let Some(limit) = query.limit() {
            query_builder = query_builder.bind(limit);
        }

        let records = query_builder
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list files")?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn stats(&self) -> StoreResult<FileStats> {
        use sqlx::Row;
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'scanned') as scanned,
                COUNT(*) FILTER (WHERE result = 'clean') as clean,
                COUNT(*) FILTER (WHERE result = 'infected') as infected
            FROM files
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch file stats")?;

        Ok(FileStats {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            scanned: row.get::<Option<i64>, _>("scanned").unwrap_or(0),
            clean: row.get::<Option<i64>, _>("clean").unwrap_or(0),
            infected: row.get::<Option<i64>, _>("infected").unwrap_or(0),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
