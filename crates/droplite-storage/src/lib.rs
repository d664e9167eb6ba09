//! Droplite Storage Library
//!
//! This crate provides the storage abstraction and its implementations: the
//! [`Storage`] trait plus backends for the local filesystem and for
//! S3-compatible object stores.
//!
//! # Storage key format
//!
//! Keys are backend-relative, slash-separated paths. Generated keys follow
//! `uploads/{YYYY}/{MM}/{file_id}/{sanitized_name}`. Keys must not contain
//! `..` segments, backslashes or a leading `/`. Key handling is centralized in
//! the `keys` module so all backends agree on what a valid key is.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use droplite_core::StorageBackend;
pub use factory::create_storage;
pub use keys::{default_storage_key, normalize_key, sanitize_filename};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::{S3Config, S3Storage};
pub use traits::{ByteStream, ContentReader, Storage, StorageError, StorageResult, StoredObject};
