//! Application setup and initialization
//!
//! Builds every collaborator from `Config` and hands them to the router and the
//! scan worker pool as `Arc<dyn Trait>` handles.

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use anyhow::{Context, Result};
use axum::Router;
use filescan_core::Config;
use filescan_worker::WorkerPool;
use std::sync::Arc;

use crate::state::AppState;

/// Everything `main` needs to serve traffic and shut down cleanly.
pub struct App {
    pub state: Arc<AppState>,
    pub router: Router,
    pub workers: WorkerPool,
}

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<App> {
    config.validate().context("Configuration validation failed")?;

    filescan_infra::init_telemetry(config.is_production())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment,
        inspector = ?config.inspector,
        "Configuration loaded and validated successfully"
    );

    let pool = match &config.database_url {
        Some(url) => Some(database::setup_database(&config, url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory metadata store and job queue");
            None
        }
    };

    let backends = services::build_backends(&config, pool).await?;
    let workers = services::start_workers(&config, &backends)?;
    let state = Arc::new(backends.into_state(config.clone()));
    let router = routes::setup_routes(&config, state.clone())?;

    Ok(App {
        state,
        router,
        workers,
    })
}
