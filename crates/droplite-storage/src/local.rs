use crate::keys::normalize_key;
use crate::traits::{ByteStream, ContentReader, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::StreamExt;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Local filesystem storage implementation
///
/// Writes go to a temporary sibling file that is fsynced and then renamed
/// onto the final path, so readers only ever see complete objects.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: Option<String>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/droplite")
    /// * `base_url` - Optional base URL the directory is served under (e.g., "http://localhost:8080/files")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: Option<String>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let base_path = fs::canonicalize(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to canonicalize storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let metadata = fs::metadata(&base_path).await?;
        if !metadata.is_dir() {
            return Err(StorageError::ConfigError(format!(
                "Storage path {} exists but is not a directory",
                base_path.display()
            )));
        }

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Convert a normalized storage key to a filesystem path under the base directory.
    ///
    /// Normalization already rules out `..` segments; this additionally
    /// refuses keys whose existing ancestors are symlinks leading outside
    /// the base directory.
    async fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        let path = self.base_path.join(key);

        let mut current = path.as_path();
        loop {
            match fs::canonicalize(current).await {
                Ok(canonical) => {
                    if canonical.strip_prefix(&self.base_path).is_err() {
                        return Err(StorageError::InvalidKey(
                            "Storage key resolves outside storage directory".to_string(),
                        ));
                    }
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => match current.parent() {
                    Some(parent) if parent.starts_with(&self.base_path) => current = parent,
                    _ => break,
                },
                Err(e) => return Err(StorageError::IoError(e)),
            }
        }

        Ok(path)
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Temporary sibling for `path`: same directory, unique per write, `.tmp` suffix.
///
/// A per-write suffix keeps two writers racing on the same key from
/// interleaving bytes in a shared temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("object"));
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// Removes the temporary file on drop unless the write was committed.
///
/// Covers error returns and cancellation (the write future being dropped
/// mid-stream) alike.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed abandoned temporary file");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "Failed to remove temporary file"
                );
            }
        }
    }
}

/// Make a completed rename durable by syncing the containing directory.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, key: &str, mut reader: ContentReader) -> StorageResult<StoredObject> {
        let key = normalize_key(key)?;
        let path = self.key_to_path(&key).await?;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;

        let temp_path = temp_path_for(&path);
        let mut guard = TempFileGuard::new(temp_path.clone());

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        let bytes_written = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            tracing::warn!(
                error = %e,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Local storage write interrupted"
            );
            StorageError::IoError(e)
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to sync temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        drop(file);

        fs::rename(&temp_path, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;
        guard.disarm();

        if let Some(parent) = path.parent() {
            if let Err(e) = sync_dir(parent).await {
                tracing::debug!(error = %e, dir = %parent.display(), "Directory sync failed");
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = bytes_written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(StoredObject {
            url: self.generate_url(&key),
            location: path.display().to_string(),
            key,
            size_bytes: bytes_written,
        })
    }

    async fn read(&self, key: &str) -> StorageResult<ByteStream> {
        let key = normalize_key(key)?;
        let path = self.key_to_path(&key).await?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key));
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if !file.metadata().await?.is_file() {
            return Err(StorageError::NotFound(key));
        }

        tracing::debug!(path = %path.display(), key = %key, "Local storage read opened");

        let path_display = path.display().to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(
                    error = %e,
                    path = %path_display,
                    "Local storage stream read error"
                );
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = normalize_key(key)?;
        let path = self.key_to_path(&key).await?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), key = %key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
