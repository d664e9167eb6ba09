//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use droplite_core::AppError;
use futures::Stream;
use std::io;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Remote store unreachable or timing out.
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether a caller may reasonably retry the operation.
    ///
    /// Network-level failures are transient; disk-full, permission, key and
    /// configuration errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Object not found: {}", key)),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(format!("Invalid storage key: {}", msg)),
            other => AppError::Storage {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Inbound payload handed to [`Storage::write`]. Its length is not known in advance.
pub type ContentReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Outbound payload returned by [`Storage::read`]. Dropping it closes the underlying handle.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Where and how much a completed write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Normalized storage key the object is now readable under
    pub key: String,
    /// Backend-specific location (filesystem path or `s3://bucket/key`)
    pub location: String,
    /// Public URL, when the backend is configured with one
    pub url: Option<String>,
    /// Number of bytes actually committed
    pub size_bytes: u64,
}

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem) implement this trait so the
/// ingestion service can work with any of them without knowing which one was
/// configured. Implementations must be safe to call concurrently for
/// distinct keys; concurrent writers to the same key resolve as
/// last-writer-wins.
///
/// Dropping a returned future cancels the operation. A cancelled write never
/// leaves a partially written object visible under `key`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stream `reader` to durable storage under `key` until EOF.
    ///
    /// The object only becomes visible under `key` once every byte has been
    /// committed.
    async fn write(&self, key: &str, reader: ContentReader) -> StorageResult<StoredObject>;

    /// Open the object stored under `key` for sequential reading.
    ///
    /// Fails with [`StorageError::NotFound`] when nothing is stored there.
    async fn read(&self, key: &str) -> StorageResult<ByteStream>;

    /// Remove the object stored under `key`. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Unavailable("timeout".into()).is_transient());
        assert!(StorageError::IoError(io::Error::from(io::ErrorKind::ConnectionReset)).is_transient());
        assert!(!StorageError::IoError(io::Error::from(io::ErrorKind::PermissionDenied)).is_transient());
        assert!(!StorageError::UploadFailed("disk full".into()).is_transient());
        assert!(!StorageError::InvalidKey("..".into()).is_transient());
    }

    #[test]
    fn converts_into_app_error_categories() {
        let err: AppError = StorageError::NotFound("a/b".into()).into();
        assert!(err.is_not_found());

        let err: AppError = StorageError::InvalidKey("leading slash".into()).into();
        assert!(err.is_validation());

        let err: AppError = StorageError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, AppError::Storage { transient: true, .. }));

        let err: AppError = StorageError::UploadFailed("no space left".into()).into();
        assert!(matches!(err, AppError::Storage { transient: false, .. }));
    }
}
