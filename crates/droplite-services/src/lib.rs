//! Droplite Services Layer
//!
//! This crate is the **business service layer**: it hosts the ingestion
//! orchestrator that sequences storage writes and metadata persistence, and
//! re-exports the storage and repository seams it is built on so callers
//! depend on a single facade.

pub mod services;

pub use droplite_db::{FileRepository, MemoryFileRepository, PgFileRepository};
pub use droplite_storage::{
    create_storage, ByteStream, ContentReader, LocalStorage, S3Storage, Storage, StorageBackend,
    StorageError, StorageResult,
};
pub use services::files::{FileService, RegisterFileInput};
