//! Process-local file repository.
//!
//! Mirrors [`PgFileRepository`](super::PgFileRepository) semantics (server
//! timestamps, newest-first listing, NotFound on missing ids) without a
//! database. Used by tests and by single-process tooling.

use chrono::Utc;
use droplite_core::models::{FileRecord, FileStatus, ListFilesParams};
use droplite_core::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::file::{illegal_transition, FileRepository};

#[derive(Default)]
pub struct MemoryFileRepository {
    records: RwLock<HashMap<Uuid, FileRecord>>,
}

impl MemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl FileRepository for MemoryFileRepository {
    async fn create(&self, record: &FileRecord) -> Result<FileRecord, AppError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AppError::Internal(format!(
                "File record {} already exists",
                record.id
            )));
        }

        let now = Utc::now();
        let mut stored = record.clone();
        stored.created_at = now;
        stored.updated_at = now;
        records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<FileRecord, AppError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }

    async fn list(&self, params: &ListFilesParams) -> Result<Vec<FileRecord>, AppError> {
        let statuses = params.effective_statuses();
        let records = self.records.read().await;

        let mut matching: Vec<&FileRecord> = records
            .values()
            .filter(|r| statuses.contains(&r.status))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(matching
            .into_iter()
            .skip(params.effective_offset() as usize)
            .take(params.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))?;
        if !record.status.can_transition_to(status) {
            return Err(illegal_transition(id, record.status, status));
        }
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }
}
