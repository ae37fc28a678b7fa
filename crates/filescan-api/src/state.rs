//! Shared application state handed to every handler.

use std::sync::Arc;

use filescan_core::Config;
use filescan_db::MetadataStore;
use filescan_storage::Storage;
use filescan_worker::JobQueue;
use sqlx::PgPool;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn MetadataStore>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<dyn Storage>,
    /// Present when running against PostgreSQL; used by the health check.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn backend(&self) -> &'static str {
        if self.pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }
}
