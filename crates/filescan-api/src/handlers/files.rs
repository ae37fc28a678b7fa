use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use std::sync::Arc;
use uuid::Uuid;

use filescan_core::models::{FileListQuery, FileMetadata, FileStats};
use filescan_core::AppError;

use crate::error::HttpAppError;
use crate::state::AppState;

/// List files, newest upload first.
#[tracing::instrument(skip(state))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileListQuery>,
) -> Result<Json<Vec<FileMetadata>>, HttpAppError> {
    let files = state.store.list(&query).await?;
    tracing::debug!(count = files.len(), "Listed files");
    Ok(Json(files))
}

#[tracing::instrument(skip(state))]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<FileMetadata>, HttpAppError> {
    match state.store.get(file_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::NotFound(format!("File {} not found", file_id)).into()),
    }
}

#[tracing::instrument(skip(state))]
pub async fn file_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FileStats>, HttpAppError> {
    Ok(Json(state.store.stats().await?))
}
