use chrono::{DateTime, Utc};
use droplite_core::models::{FileRecord, FileStatus, ListFilesParams};
use droplite_core::AppError;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Trait for file metadata repository operations
///
/// Abstracts the persistence of [`FileRecord`]s so the ingestion service can
/// run against PostgreSQL in production and an in-memory map in tests.
#[async_trait::async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a record and return it as persisted, with server-assigned timestamps.
    async fn create(&self, record: &FileRecord) -> Result<FileRecord, AppError>;

    /// Fetch a record by id. Fails with [`AppError::NotFound`] when absent.
    async fn get_by_id(&self, id: Uuid) -> Result<FileRecord, AppError>;

    /// Newest first. See [`ListFilesParams`] for filter defaults.
    async fn list(&self, params: &ListFilesParams) -> Result<Vec<FileRecord>, AppError>;

    /// Set a record's status and bump `updated_at`.
    ///
    /// Only forward transitions are applied (see
    /// [`FileStatus::can_transition_to`]); anything else, including leaving
    /// `deleted`, fails with [`AppError::InvalidInput`].
    async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), AppError>;
}

const FILE_COLUMNS: &str = "id, original_name, mime_type, size_bytes, storage_key, checksum, \
     status, metadata, created_at, updated_at, expires_at";

#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    original_name: String,
    mime_type: String,
    size_bytes: i64,
    storage_key: String,
    checksum: Option<String>,
    status: String,
    metadata: Json<HashMap<String, serde_json::Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = AppError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(FileRecord {
            id: row.id,
            original_name: row.original_name,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes,
            storage_key: row.storage_key,
            checksum: row.checksum,
            status: row.status.parse()?,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

/// PostgreSQL-backed file repository
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FileRepository for PgFileRepository {
    #[tracing::instrument(skip(self, record), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "insert",
        file_id = %record.id
    ))]
    async fn create(&self, record: &FileRecord) -> Result<FileRecord, AppError> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            INSERT INTO files (
                id, original_name, mime_type, size_bytes, storage_key,
                checksum, status, metadata, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            FILE_COLUMNS
        ))
        .bind(record.id)
        .bind(&record.original_name)
        .bind(&record.mime_type)
        .bind(record.size_bytes)
        .bind(&record.storage_key)
        .bind(&record.checksum)
        .bind(record.status.as_str())
        .bind(Json(&record.metadata))
        .bind(record.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                file_id = %record.id,
                storage_key = %record.storage_key,
                "Failed to insert file record"
            );
            AppError::from(e)
        })?;

        row.try_into()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "select"
    ))]
    async fn get_by_id(&self, id: Uuid) -> Result<FileRecord, AppError> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files WHERE id = $1",
            FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(AppError::NotFound(format!("File {} not found", id))),
        }
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "select"
    ))]
    async fn list(&self, params: &ListFilesParams) -> Result<Vec<FileRecord>, AppError> {
        let statuses: Vec<String> = params
            .effective_statuses()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let rows = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            SELECT {}
            FROM files
            WHERE status = ANY($1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            FILE_COLUMNS
        ))
        .bind(&statuses)
        .bind(params.effective_limit())
        .bind(params.effective_offset())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "update"
    ))]
    async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), AppError> {
        let predecessors: Vec<String> = status
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&predecessors)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM files WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;

            return Err(match current {
                Some(current) => illegal_transition(id, current.parse()?, status),
                None => AppError::NotFound(format!("File {} not found", id)),
            });
        }

        tracing::debug!(file_id = %id, status = %status, "File status updated");
        Ok(())
    }
}

pub(crate) fn illegal_transition(id: Uuid, from: FileStatus, to: FileStatus) -> AppError {
    AppError::InvalidInput(format!(
        "File {} cannot move from {} to {}",
        id, from, to
    ))
}
