use axum::{
    extract::{Path, State},
    response::Json,
};
use std::sync::Arc;
use uuid::Uuid;

use filescan_core::models::ScanJob;
use filescan_core::AppError;

use crate::error::HttpAppError;
use crate::state::AppState;

/// Read-only snapshot of a scan job.
#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ScanJob>, HttpAppError> {
    match state.queue.get(job_id).await? {
        Some(job) => Ok(Json(job)),
        None => {
            tracing::debug!(job.id = %job_id, "Job not found");
            Err(AppError::NotFound(format!("Job {} not found", job_id)).into())
        }
    }
}
