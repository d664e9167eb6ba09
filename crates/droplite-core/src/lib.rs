//! Droplite Core Library
//!
//! This crate provides the domain model, error types and configuration
//! shared by the storage backends, the metadata repository and the
//! ingestion service.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, DeletePolicy};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{FileRecord, FileStatus, ListFilesParams};
pub use storage_types::StorageBackend;
// Note: Storage, StorageError, StorageResult live in the droplite-storage crate
