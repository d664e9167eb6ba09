use crate::keys::normalize_key;
use crate::traits::{ByteStream, ContentReader, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, Result as ObjectResult};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible object store.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint with scheme (e.g. "http://localhost:9000" for MinIO).
    /// `None` targets AWS S3.
    pub endpoint_url: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Address objects as `{endpoint}/{bucket}/{key}` instead of `{bucket}.{endpoint}/{key}`
    pub path_style: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            access_key: String::new(),
            secret_key: String::new(),
            path_style: false,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.access_key = access_key.into();
        self.secret_key = secret_key.into();
        self
    }

    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }
}

/// S3 storage implementation
///
/// Object reads and writes go through `object_store`; writes are streamed
/// as a multipart upload that is only completed once the reader hits EOF.
/// The bucket is checked (and created if missing) through the AWS SDK on
/// first use.
#[derive(Clone)]
pub struct S3Storage {
    store: Arc<AmazonS3>,
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    bucket_ready: Arc<OnceCell<()>>,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// No network calls are made here; connectivity problems surface on the
    /// first operation.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::ConfigError("S3 bucket name is empty".to_string()));
        }

        let mut builder = AmazonS3Builder::new()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone())
            .with_virtual_hosted_style_request(!config.path_style);

        if !config.access_key.is_empty() {
            builder = builder
                .with_access_key_id(config.access_key.clone())
                .with_secret_access_key(config.secret_key.clone());
        }

        if let Some(ref endpoint) = config.endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if !config.access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "droplite",
            ));
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style);
        if let Some(ref endpoint) = config.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint.clone());
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config.build());

        Ok(S3Storage {
            store: Arc::new(store),
            client,
            bucket: config.bucket,
            region: config.region,
            endpoint_url: config.endpoint_url,
            bucket_ready: Arc::new(OnceCell::new()),
        })
    }

    /// Make sure the bucket exists, creating it on first use.
    ///
    /// Runs at most once successfully per instance; failures are retried by
    /// the next operation.
    async fn ensure_bucket(&self) -> StorageResult<()> {
        self.bucket_ready
            .get_or_try_init(|| self.create_bucket_if_missing())
            .await
            .map(|_| ())
    }

    async fn create_bucket_if_missing(&self) -> StorageResult<()> {
        let probe = self.client.head_bucket().bucket(&self.bucket).send().await;
        let Err(e) = probe else {
            return Ok(());
        };

        let missing = e
            .as_service_error()
            .map(|se| se.is_not_found())
            .unwrap_or(false);
        let status = e.raw_response().map(|response| response.status().as_u16());
        bucket_probe_outcome(
            missing,
            status,
            format!(
                "Failed to check bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ),
        )?;

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, region = %self.region, "Created S3 bucket");
                Ok(())
            }
            Err(e) => {
                let already_there = e
                    .as_service_error()
                    .map(|se| se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists())
                    .unwrap_or(false);
                if already_there {
                    Ok(())
                } else {
                    Err(StorageError::BackendError(format!(
                        "Failed to create bucket {}: {}",
                        self.bucket,
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    /// Generate public URL for S3 object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses the path-style form under the endpoint
    fn generate_url(&self, key: &str) -> String {
        match self.endpoint_url {
            Some(ref endpoint) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Decide what a failed `HeadBucket` means. `Ok` says the bucket is missing
/// and should be created. Rejected credentials are permanent; anything else
/// is treated as the endpoint being unreachable.
fn bucket_probe_outcome(missing: bool, status: Option<u16>, detail: String) -> StorageResult<()> {
    if missing {
        return Ok(());
    }
    match status {
        Some(404) => Ok(()),
        Some(401) | Some(403) => Err(StorageError::BackendError(detail)),
        _ => Err(StorageError::Unavailable(detail)),
    }
}

/// Classify an object store failure. Anything not clearly a missing object or
/// an auth problem is treated as the store being unreachable.
fn map_object_error(err: ObjectStoreError, key: &str) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
        ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
            StorageError::BackendError(err.to_string())
        }
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn write(&self, key: &str, mut reader: ContentReader) -> StorageResult<StoredObject> {
        let key = normalize_key(key)?;
        self.ensure_bucket().await?;

        let start = std::time::Instant::now();
        let store: Arc<dyn object_store::ObjectStore> = self.store.clone();
        let mut writer = BufWriter::new(store, Path::from(key.clone()));

        // Dropping `writer` before shutdown never completes the upload, so a
        // cancelled write leaves nothing visible under `key`.
        let copied = match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(bytes) => writer.shutdown().await.map(|_| bytes),
            Err(e) => Err(e),
        };

        let size_bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(
                        error = %abort_err,
                        bucket = %self.bucket,
                        key = %key,
                        "Failed to abort S3 multipart upload"
                    );
                }
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                return Err(StorageError::UploadFailed(e.to_string()));
            }
        };

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(StoredObject {
            location: self.location(&key),
            url: Some(self.generate_url(&key)),
            key,
            size_bytes,
        })
    }

    async fn read(&self, key: &str) -> StorageResult<ByteStream> {
        let key = normalize_key(key)?;
        self.ensure_bucket().await?;

        let start = std::time::Instant::now();
        let location = Path::from(key.clone());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| {
            let mapped = map_object_error(e, &key);
            if !mapped.is_not_found() {
                tracing::error!(
                    error = %mapped,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
            }
            mapped
        })?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = result.meta.size,
            "S3 download opened"
        );

        let stream = result
            .into_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::DownloadFailed(e.to_string())));

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = normalize_key(key)?;
        let start = std::time::Instant::now();
        let location = Path::from(key.clone());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
