//! Storage abstraction trait

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist uploaded bytes under a fresh key derived from `original_name`
    /// and return that key.
    async fn store(&self, original_name: &str, data: Bytes) -> StorageResult<String>;

    /// Read a file back by its storage key.
    async fn read(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Delete a file. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;
}
