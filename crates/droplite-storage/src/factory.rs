#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::{S3Config, S3Storage};
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use droplite_core::Config;
use std::sync::Arc;

/// Create the storage backend selected by configuration.
///
/// Called once at startup; the returned handle is shared by every request.
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let backend = config.storage_backend;

    let storage: Arc<dyn Storage> = match backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            if config.s3_bucket.trim().is_empty() {
                return Err(StorageError::ConfigError("S3_BUCKET not configured".to_string()));
            }
            let s3_config = S3Config::new(config.s3_bucket.clone())
                .with_region(config.s3_region.clone())
                .with_endpoint(config.s3_endpoint_url())
                .with_credentials(config.s3_access_key.clone(), config.s3_secret_key.clone())
                .with_path_style(config.s3_path_style);

            Arc::new(S3Storage::new(s3_config).await?)
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => {
            return Err(StorageError::ConfigError(
                "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
            ))
        }

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            if config.local_storage_path.trim().is_empty() {
                return Err(StorageError::ConfigError(
                    "LOCAL_STORAGE_PATH not configured".to_string(),
                ));
            }
            Arc::new(
                LocalStorage::new(
                    config.local_storage_path.clone(),
                    config.local_storage_base_url.clone(),
                )
                .await?,
            )
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => {
            return Err(StorageError::ConfigError(
                "Local storage backend not available (storage-local feature not enabled)".to_string(),
            ))
        }
    };

    tracing::info!(backend = %backend, "Storage backend initialized");
    Ok(storage)
}
