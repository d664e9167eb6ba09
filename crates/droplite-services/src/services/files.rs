//! File ingestion service
//!
//! Orchestrates a single upload: validate → derive key → write bytes →
//! persist metadata. Bytes are always committed to the storage backend before
//! the metadata record is created, so a record is never marked `stored`
//! without its content. The reverse gap (bytes written, record insert
//! failed) leaves an orphaned object that is logged for an external sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use droplite_core::models::{FileRecord, FileStatus, ListFilesParams};
use droplite_core::{AppError, Config, DeletePolicy};
use droplite_db::FileRepository;
use droplite_storage::{
    default_storage_key, normalize_key, ByteStream, ContentReader, Storage, StoredObject,
};
use uuid::Uuid;

use super::limit::LimitedReader;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Everything needed to register one file.
///
/// `content` is optional: without it the record is registered as `pending`
/// against an explicit `storage_key` whose bytes arrive out of band.
pub struct RegisterFileInput {
    pub original_name: String,
    pub mime_type: String,
    /// Declared size, used for admission only. The stored record carries the
    /// number of bytes actually written.
    pub size_bytes: i64,
    pub storage_key: Option<String>,
    pub checksum: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub content: Option<ContentReader>,
}

impl RegisterFileInput {
    pub fn new(original_name: impl Into<String>, mime_type: impl Into<String>, size_bytes: i64) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            storage_key: None,
            checksum: None,
            metadata: None,
            expires_at: None,
            content: None,
        }
    }

    pub fn with_content(mut self, content: ContentReader) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = Some(storage_key.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Ingestion orchestrator and retrieval path for uploaded files.
///
/// Holds no mutable state of its own; clones share the same backend and
/// repository handles and may be used concurrently.
#[derive(Clone)]
pub struct FileService {
    storage: Arc<dyn Storage>,
    repository: Arc<dyn FileRepository>,
    max_upload_bytes: u64,
    delete_policy: DeletePolicy,
}

impl FileService {
    pub fn new(storage: Arc<dyn Storage>, repository: Arc<dyn FileRepository>) -> Self {
        Self {
            storage,
            repository,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            delete_policy: DeletePolicy::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        storage: Arc<dyn Storage>,
        repository: Arc<dyn FileRepository>,
    ) -> Self {
        Self::new(storage, repository)
            .with_max_upload_bytes(config.max_upload_bytes)
            .with_delete_policy(config.delete_policy)
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn with_delete_policy(mut self, delete_policy: DeletePolicy) -> Self {
        self.delete_policy = delete_policy;
        self
    }

    /// Register a file: write its content (when supplied) and persist its record.
    ///
    /// With content the returned record is `stored`; without it the record is
    /// `pending`. Validation failures touch neither the backend nor the
    /// repository, and a backend failure never reaches the repository.
    pub async fn register_file(&self, input: RegisterFileInput) -> Result<FileRecord, AppError> {
        let start = std::time::Instant::now();
        let explicit_key = self.validate(&input)?;

        let file_id = Uuid::new_v4();
        let now = Utc::now();
        let storage_key =
            explicit_key.unwrap_or_else(|| default_storage_key(file_id, &input.original_name, now));

        let mut record = FileRecord {
            id: file_id,
            original_name: input.original_name,
            mime_type: input.mime_type,
            size_bytes: input.size_bytes,
            storage_key,
            checksum: input.checksum,
            status: FileStatus::Pending,
            metadata: input.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            expires_at: input.expires_at,
        };

        if let Some(content) = input.content {
            let stored = self.write_content(file_id, &record.storage_key, content).await?;
            record.size_bytes = i64::try_from(stored.size_bytes).map_err(|_| {
                AppError::Internal(format!("Stored size {} out of range", stored.size_bytes))
            })?;
            record.status = FileStatus::Stored;
        }

        let created = match self.repository.create(&record).await {
            Ok(created) => created,
            Err(e) => {
                if record.is_stored() {
                    tracing::warn!(
                        error = %e,
                        file_id = %file_id,
                        storage_key = %record.storage_key,
                        "File record insert failed after content was written; object is orphaned"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            file_id = %created.id,
            storage_key = %created.storage_key,
            size_bytes = created.size_bytes,
            status = %created.status,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File registered"
        );

        Ok(created)
    }

    /// List records, newest first. No status filter lists `stored` records only.
    pub async fn list_files(&self, params: ListFilesParams) -> Result<Vec<FileRecord>, AppError> {
        self.repository.list(&params).await
    }

    pub async fn get_file(&self, id: Uuid) -> Result<FileRecord, AppError> {
        self.repository.get_by_id(id).await
    }

    /// Open the content stored under `storage_key`.
    pub async fn get_file_content(&self, storage_key: &str) -> Result<ByteStream, AppError> {
        self.storage.read(storage_key).await.map_err(AppError::from)
    }

    /// Look up a record and open its content. Only `stored` records have content.
    pub async fn open_file(&self, id: Uuid) -> Result<(FileRecord, ByteStream), AppError> {
        let record = self.get_file(id).await?;
        if !record.is_stored() {
            return Err(AppError::NotFound(format!(
                "File {} has no stored content (status: {})",
                id, record.status
            )));
        }

        let content = self.get_file_content(&record.storage_key).await?;
        Ok((record, content))
    }

    /// Mark a record deleted. Deleting an already-deleted record is a no-op.
    ///
    /// Under [`DeletePolicy::Purge`] the backend object of a stored record is
    /// removed afterwards; failures there are logged, not returned.
    pub async fn delete_file(&self, id: Uuid) -> Result<(), AppError> {
        let record = self.repository.get_by_id(id).await?;
        if record.status == FileStatus::Deleted {
            tracing::debug!(file_id = %id, "File already deleted");
            return Ok(());
        }

        if let Err(e) = self.repository.update_status(id, FileStatus::Deleted).await {
            // A concurrent delete may have landed between the read and the update
            let raced = matches!(e, AppError::InvalidInput(_))
                && self.repository.get_by_id(id).await?.status == FileStatus::Deleted;
            if !raced {
                return Err(e);
            }
            tracing::debug!(file_id = %id, "File deleted concurrently");
            return Ok(());
        }
        tracing::info!(
            file_id = %id,
            storage_key = %record.storage_key,
            policy = %self.delete_policy,
            "File deleted"
        );

        if self.delete_policy == DeletePolicy::Purge && record.is_stored() {
            self.discard_object(&record.storage_key).await;
        }

        Ok(())
    }

    fn validate(&self, input: &RegisterFileInput) -> Result<Option<String>, AppError> {
        if input.original_name.is_empty() {
            return Err(AppError::InvalidInput("original_name is required".to_string()));
        }
        if input.mime_type.is_empty() {
            return Err(AppError::InvalidInput("mime_type is required".to_string()));
        }
        if input.size_bytes <= 0 {
            return Err(AppError::InvalidInput(
                "size_bytes must be positive".to_string(),
            ));
        }
        if input.size_bytes as u64 > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Declared size {} exceeds the {} byte limit",
                input.size_bytes, self.max_upload_bytes
            )));
        }

        let explicit_key = match input.storage_key.as_deref() {
            Some(key) => Some(normalize_key(key)?),
            None => None,
        };

        if input.content.is_none() && explicit_key.is_none() {
            return Err(AppError::InvalidInput(
                "storage_key is required when no content is supplied".to_string(),
            ));
        }

        Ok(explicit_key)
    }

    /// Stream `content` to the backend, enforcing the upload limit on the
    /// bytes actually received.
    ///
    /// Oversized and empty content fail the read itself, so the backend
    /// abandons the write and whatever the key held before stays intact.
    async fn write_content(
        &self,
        file_id: Uuid,
        storage_key: &str,
        content: ContentReader,
    ) -> Result<StoredObject, AppError> {
        let (limited, rejection) = LimitedReader::new(content, self.max_upload_bytes);

        self.storage
            .write(storage_key, Box::pin(limited))
            .await
            .map_err(|e| {
                if let Some(rejected) = rejection.get() {
                    tracing::info!(
                        file_id = %file_id,
                        storage_key = %storage_key,
                        reason = ?rejected,
                        "Upload content rejected"
                    );
                    return AppError::from(*rejected);
                }
                tracing::error!(
                    error = %e,
                    file_id = %file_id,
                    storage_key = %storage_key,
                    transient = e.is_transient(),
                    "Storage write failed"
                );
                AppError::from(e)
            })
    }

    async fn discard_object(&self, storage_key: &str) {
        if let Err(e) = self.storage.delete(storage_key).await {
            tracing::warn!(
                error = %e,
                storage_key = %storage_key,
                "Failed to remove stored object"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use droplite_db::MemoryFileRepository;
    use droplite_storage::{LocalStorage, StorageBackend, StorageError, StorageResult};
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    /// In-memory backend that records every call.
    #[derive(Default)]
    struct SpyStorage {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        writes: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl SpyStorage {
        fn contains(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(key)
        }
    }

    #[async_trait]
    impl Storage for SpyStorage {
        async fn write(&self, key: &str, mut reader: ContentReader) -> StorageResult<StoredObject> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut data = Vec::new();
            reader.read_to_end(&mut data).await?;
            let size_bytes = data.len() as u64;
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(StoredObject {
                key: key.to_string(),
                location: format!("memory://{}", key),
                url: None,
                size_bytes,
            })
        }

        async fn read(&self, key: &str) -> StorageResult<ByteStream> {
            let data = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
            Ok(Box::pin(futures::stream::iter(vec![Ok(Bytes::from(data))])))
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::Local
        }
    }

    /// Backend whose writes always fail.
    #[derive(Default)]
    struct FailingStorage {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Storage for FailingStorage {
        async fn write(&self, _key: &str, _reader: ContentReader) -> StorageResult<StoredObject> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::UploadFailed("no space left on device".to_string()))
        }

        async fn read(&self, key: &str) -> StorageResult<ByteStream> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::S3
        }
    }

    /// Repository that counts creates and can be told to reject them.
    #[derive(Default)]
    struct SpyRepository {
        inner: MemoryFileRepository,
        creates: AtomicUsize,
        fail_create: bool,
    }

    #[async_trait]
    impl FileRepository for SpyRepository {
        async fn create(&self, record: &FileRecord) -> Result<FileRecord, AppError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(AppError::Internal("database unavailable".to_string()));
            }
            self.inner.create(record).await
        }

        async fn get_by_id(&self, id: Uuid) -> Result<FileRecord, AppError> {
            self.inner.get_by_id(id).await
        }

        async fn list(&self, params: &ListFilesParams) -> Result<Vec<FileRecord>, AppError> {
            self.inner.list(params).await
        }

        async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), AppError> {
            self.inner.update_status(id, status).await
        }
    }

    fn content(data: &[u8]) -> ContentReader {
        Box::pin(std::io::Cursor::new(data.to_vec()))
    }

    fn spy_service() -> (FileService, Arc<SpyStorage>, Arc<SpyRepository>) {
        let storage = Arc::new(SpyStorage::default());
        let repository = Arc::new(SpyRepository::default());
        let service = FileService::new(storage.clone(), repository.clone());
        (service, storage, repository)
    }

    fn open_error(result: Result<(FileRecord, ByteStream), AppError>) -> AppError {
        match result {
            Ok((record, _)) => panic!("expected open_file to fail, got {:?}", record),
            Err(e) => e,
        }
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    async fn register_bytes(service: &FileService, name: &str, data: &[u8]) -> FileRecord {
        service
            .register_file(
                RegisterFileInput::new(name, "application/octet-stream", data.len() as i64)
                    .with_content(content(data)),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stores_report_pdf_on_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
        let repository = Arc::new(MemoryFileRepository::new());
        let service = FileService::new(storage, repository);

        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let record = service
            .register_file(
                RegisterFileInput::new("report.pdf", "application/pdf", 2048)
                    .with_content(content(&payload)),
            )
            .await
            .unwrap();

        assert_eq!(record.status, FileStatus::Stored);
        assert_eq!(record.size_bytes, 2048);
        assert!(record.metadata.is_empty());

        let segments: Vec<&str> = record.storage_key.split('/').collect();
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0], "uploads");
        assert!(segments[1].len() == 4 && segments[1].chars().all(|c| c.is_ascii_digit()));
        assert!(segments[2].len() == 2 && segments[2].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(segments[3], record.id.to_string());
        assert_eq!(segments[4], "report.pdf");

        let bytes = collect(service.get_file_content(&record.storage_key).await.unwrap()).await;
        assert_eq!(bytes, payload);

        let (opened, stream) = service.open_file(record.id).await.unwrap();
        assert_eq!(opened.id, record.id);
        assert_eq!(collect(stream).await, payload);
    }

    #[tokio::test]
    async fn registration_without_content_requires_key() {
        let (service, storage, repository) = spy_service();

        let err = service
            .register_file(RegisterFileInput::new("notes.txt", "text/plain", 10))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);

        let record = service
            .register_file(
                RegisterFileInput::new("notes.txt", "text/plain", 10)
                    .with_storage_key("imports/batch-7/notes.txt"),
            )
            .await
            .unwrap();
        assert_eq!(record.status, FileStatus::Pending);
        assert_eq!(record.storage_key, "imports/batch-7/notes.txt");
        assert_eq!(record.size_bytes, 10);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);

        let listed = service.list_files(ListFilesParams::default()).await.unwrap();
        assert!(listed.is_empty());
        assert!(open_error(service.open_file(record.id).await).is_not_found());
    }

    #[tokio::test]
    async fn invalid_input_touches_nothing() {
        let (service, storage, repository) = spy_service();

        let cases = [
            RegisterFileInput::new("", "text/plain", 3),
            RegisterFileInput::new("a.txt", "", 3),
            RegisterFileInput::new("a.txt", "text/plain", 0),
            RegisterFileInput::new("a.txt", "text/plain", -5),
        ];
        for input in cases {
            let err = service
                .register_file(input.with_content(content(b"abc")))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "unexpected error: {err}");
        }

        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_but_non_empty_name_is_accepted() {
        let (service, _, _) = spy_service();

        let record = register_bytes(&service, "   ", b"abc").await;
        assert_eq!(record.original_name, "   ");
        assert!(record.storage_key.ends_with("/file"));
    }

    #[tokio::test]
    async fn unsafe_explicit_keys_are_rejected() {
        let (service, storage, repository) = spy_service();

        for key in ["../outside.txt", "/etc/passwd", "a\\b"] {
            let err = service
                .register_file(
                    RegisterFileInput::new("a.txt", "text/plain", 3)
                        .with_storage_key(key)
                        .with_content(content(b"abc")),
                )
                .await
                .unwrap_err();
            assert!(err.is_validation(), "{key} should be rejected");
        }

        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn traversal_in_name_stays_inside_uploads() {
        let (service, storage, _) = spy_service();

        let record = register_bytes(&service, "../../etc/passwd", b"root:x:0:0").await;
        assert!(record.storage_key.starts_with("uploads/"));
        assert!(record.storage_key.ends_with("/passwd"));
        assert!(record.storage_key.split('/').all(|s| s != ".."));
        assert_eq!(record.original_name, "../../etc/passwd");
        assert!(storage.contains(&record.storage_key));
    }

    #[tokio::test]
    async fn declared_size_over_limit_is_rejected_up_front() {
        let (service, storage, repository) = spy_service();
        let service = service.with_max_upload_bytes(16);

        let err = service
            .register_file(RegisterFileInput::new("big.bin", "application/octet-stream", 17).with_content(content(&[0u8; 17])))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_content_is_never_committed() {
        let (service, storage, repository) = spy_service();
        let service = service.with_max_upload_bytes(16);

        let err = service
            .register_file(
                RegisterFileInput::new("liar.bin", "application/octet-stream", 4)
                    .with_content(content(&[7u8; 64])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        assert_eq!(storage.deletes.load(Ordering::SeqCst), 0);
        assert!(storage.objects.lock().unwrap().is_empty());
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn content_at_limit_is_accepted() {
        let (service, _, _) = spy_service();
        let service = service.with_max_upload_bytes(16);

        let record = register_bytes(&service, "edge.bin", &[1u8; 16]).await;
        assert_eq!(record.size_bytes, 16);
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let (service, storage, repository) = spy_service();

        let err = service
            .register_file(RegisterFileInput::new("empty.txt", "text/plain", 1).with_content(content(b"")))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(storage.objects.lock().unwrap().is_empty());
        assert_eq!(storage.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_upload_keeps_existing_object_under_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
        let repository = Arc::new(MemoryFileRepository::new());
        let service = FileService::new(storage, repository.clone()).with_max_upload_bytes(16);

        let original = service
            .register_file(
                RegisterFileInput::new("doc.txt", "text/plain", 8)
                    .with_storage_key("shared/doc.txt")
                    .with_content(content(b"original")),
            )
            .await
            .unwrap();

        let err = service
            .register_file(
                RegisterFileInput::new("doc.txt", "text/plain", 8)
                    .with_storage_key("shared/doc.txt")
                    .with_content(content(&[b'x'; 64])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let err = service
            .register_file(
                RegisterFileInput::new("doc.txt", "text/plain", 8)
                    .with_storage_key("shared/doc.txt")
                    .with_content(content(b"")),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert_eq!(repository.len().await, 1);
        let (record, stream) = service.open_file(original.id).await.unwrap();
        assert_eq!(record.status, FileStatus::Stored);
        assert_eq!(collect(stream).await, b"original");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("shared"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("doc.txt")]);
    }

    #[tokio::test]
    async fn recorded_size_is_bytes_written() {
        let (service, _, _) = spy_service();

        let record = service
            .register_file(
                RegisterFileInput::new("short.txt", "text/plain", 100).with_content(content(b"12345")),
            )
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 5);
    }

    #[tokio::test]
    async fn storage_failure_skips_repository() {
        let storage = Arc::new(FailingStorage::default());
        let repository = Arc::new(SpyRepository::default());
        let service = FileService::new(storage.clone(), repository.clone());

        let err = service
            .register_file(RegisterFileInput::new("a.txt", "text/plain", 3).with_content(content(b"abc")))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Storage { transient: false, .. }));
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
        assert!(repository.inner.is_empty().await);
    }

    #[tokio::test]
    async fn repository_failure_after_write_is_returned() {
        let storage = Arc::new(SpyStorage::default());
        let repository = Arc::new(SpyRepository {
            fail_create: true,
            ..Default::default()
        });
        let service = FileService::new(storage.clone(), repository.clone());

        let err = service
            .register_file(RegisterFileInput::new("a.txt", "text/plain", 3).with_content(content(b"abc")))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(repository.creates.load(Ordering::SeqCst), 1);
        // Left behind for the orphan sweep
        assert_eq!(storage.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn metadata_and_checksum_are_kept() {
        let (service, _, _) = spy_service();
        let expires = Utc::now() + chrono::Duration::days(7);

        let record = service
            .register_file(
                RegisterFileInput::new("photo.jpg", "image/jpeg", 3)
                    .with_content(content(b"jpg"))
                    .with_checksum("sha256:0f00")
                    .with_metadata(HashMap::from([("album".to_string(), serde_json::json!("trip"))]))
                    .with_expires_at(expires),
            )
            .await
            .unwrap();

        let fetched = service.get_file(record.id).await.unwrap();
        assert_eq!(fetched.checksum.as_deref(), Some("sha256:0f00"));
        assert_eq!(fetched.metadata["album"], "trip");
        assert_eq!(fetched.expires_at, Some(expires));
    }

    #[tokio::test]
    async fn listing_excludes_deleted_by_default() {
        let (service, _, _) = spy_service();

        let kept = register_bytes(&service, "kept.txt", b"keep").await;
        let removed = register_bytes(&service, "removed.txt", b"remove").await;
        service.delete_file(removed.id).await.unwrap();

        let listed = service.list_files(ListFilesParams::default()).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![kept.id]);

        let deleted = service
            .list_files(ListFilesParams {
                statuses: vec![FileStatus::Deleted],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].id, removed.id);
        assert_eq!(deleted[0].status, FileStatus::Deleted);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (service, _, _) = spy_service();
        let id = Uuid::new_v4();

        assert!(service.get_file(id).await.unwrap_err().is_not_found());
        assert!(service.delete_file(id).await.unwrap_err().is_not_found());
        assert!(open_error(service.open_file(id).await).is_not_found());
        assert!(service
            .get_file_content("uploads/none")
            .await
            .err()
            .map(|e| e.is_not_found())
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn soft_delete_keeps_bytes_and_is_idempotent() {
        let (service, storage, _) = spy_service();
        let record = register_bytes(&service, "doc.txt", b"content").await;

        service.delete_file(record.id).await.unwrap();
        service.delete_file(record.id).await.unwrap();

        assert_eq!(service.get_file(record.id).await.unwrap().status, FileStatus::Deleted);
        assert!(storage.contains(&record.storage_key));
        assert_eq!(storage.deletes.load(Ordering::SeqCst), 0);
        assert!(open_error(service.open_file(record.id).await).is_not_found());
    }

    #[tokio::test]
    async fn concurrent_deletes_all_succeed() {
        let (service, _, _) = spy_service();
        let record = register_bytes(&service, "doc.txt", b"content").await;

        let deletes = (0..8).map(|_| {
            let service = service.clone();
            async move { service.delete_file(record.id).await }
        });
        for result in futures::future::join_all(deletes).await {
            result.unwrap();
        }
        assert_eq!(service.get_file(record.id).await.unwrap().status, FileStatus::Deleted);
    }

    #[tokio::test]
    async fn purge_delete_removes_bytes() {
        let (service, storage, _) = spy_service();
        let service = service.with_delete_policy(DeletePolicy::Purge);
        let record = register_bytes(&service, "doc.txt", b"content").await;

        service.delete_file(record.id).await.unwrap();
        service.delete_file(record.id).await.unwrap();

        assert!(!storage.contains(&record.storage_key));
        assert_eq!(storage.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_registrations_do_not_interfere() {
        let (service, storage, _) = spy_service();

        let uploads = (0..16u8).map(|i| {
            let service = service.clone();
            async move { register_bytes(&service, "same-name.bin", &[i; 32]).await }
        });
        let records = futures::future::join_all(uploads).await;

        let keys: std::collections::HashSet<_> = records.iter().map(|r| r.storage_key.clone()).collect();
        assert_eq!(keys.len(), records.len());
        for record in &records {
            let bytes = collect(service.get_file_content(&record.storage_key).await.unwrap()).await;
            assert_eq!(bytes.len(), 32);
        }
        assert_eq!(storage.writes.load(Ordering::SeqCst), 16);
    }
}
