use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

use filescan_core::models::{BackoffPolicy, FileMetadata, Priority, ScanJobPayload, SubmitOptions};
use filescan_core::AppError;

use crate::error::HttpAppError;
use crate::state::AppState;

const FILE_FIELD: &str = "file";

struct UploadedFile {
    filename: String,
    data: Bytes,
}

/// Pull the `file` field out of the multipart body; other fields are ignored.
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<UploadedFile>, HttpAppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("Uploaded file has no filename".to_string()))?;
        let data = field.bytes().await?;
        return Ok(Some(UploadedFile { filename, data }));
    }
    Ok(None)
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Accept a file, persist a pending record and enqueue its scan.
///
/// If the scan cannot be enqueued the stored bytes and the record are removed
/// again, so a client never sees a pending file that will not be scanned.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileMetadata>), HttpAppError> {
    let config = &state.config;
    let upload = read_file_field(&mut multipart)
        .await?
        .ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;

    let extension = extension_of(&upload.filename).unwrap_or_default();
    if !config.is_extension_allowed(&extension) {
        return Err(AppError::UnsupportedFileType(format!(
            "'{}' is not allowed; allowed extensions: {}",
            upload.filename,
            config.allowed_extensions.join(", ")
        ))
        .into());
    }
    if upload.data.len() > config.max_upload_size_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "{} bytes exceeds max {} bytes",
            upload.data.len(),
            config.max_upload_size_bytes
        ))
        .into());
    }

    let size = upload.data.len();
    let path = state.storage.store(&upload.filename, upload.data).await?;

    let record = match state
        .store
        .create(FileMetadata::pending(&upload.filename, &path))
        .await
    {
        Ok(record) => record,
        Err(e) => {
            discard_bytes(&state, &path).await;
            return Err(e.into());
        }
    };

    let options = SubmitOptions {
        max_attempts: config.scan_max_attempts,
        backoff: BackoffPolicy::exponential(config.scan_backoff_base()),
        priority: Priority::Normal,
    };
    match state
        .queue
        .submit_scan(&ScanJobPayload::new(record.id, &path), options)
        .await
    {
        Ok(job_id) => {
            tracing::info!(
                file.id = %record.id,
                job.id = %job_id,
                filename = %record.filename,
                size,
                "File uploaded and queued for scanning"
            );
            Ok((StatusCode::CREATED, Json(record)))
        }
        Err(e) => {
            tracing::warn!(file.id = %record.id, error = %e, "Scan submission failed, rolling back upload");
            if let Err(delete_err) = state.store.delete(record.id).await {
                tracing::error!(
                    file.id = %record.id,
                    error = %delete_err,
                    "Failed to remove metadata during upload rollback"
                );
            }
            discard_bytes(&state, &path).await;
            Err(e.into())
        }
    }
}

async fn discard_bytes(state: &AppState, path: &str) {
    if let Err(e) = state.storage.delete(path).await {
        tracing::error!(path = %path, error = %e, "Failed to remove stored bytes during upload rollback");
    }
}
