//! Filescan Database Layer
//!
//! Metadata store implementations (in-memory and PostgreSQL) and the PostgreSQL
//! repository that backs the durable scan job queue.

pub mod db;

pub use db::{
    run_migrations, AckResult, InMemoryMetadataStore, MetadataStore, PgMetadataStore,
    ScanJobRepository, StoreError, StoreResult,
};
