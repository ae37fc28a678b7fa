//! Database repositories
//!
//! `files` holds the metadata store contract and its two implementations;
//! `scan_job` is the row-level API the PostgreSQL job queue is built on.

mod error;
pub mod files;
pub mod memory;
pub mod scan_job;

pub use error::{StoreError, StoreResult};
pub use files::{MetadataStore, PgMetadataStore};
pub use memory::InMemoryMetadataStore;
pub use scan_job::{AckResult, ScanJobRepository};

use anyhow::Context;
use sqlx::PgPool;

/// Apply the workspace migrations (`migrations/` at the repository root).
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}
