//! File metadata model: the durable record describing one stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle state of a file record.
///
/// `pending → stored`, `pending → failed`, and `→ deleted` are the only
/// transitions. `deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Stored,
    Failed,
    Deleted,
}

impl FileStatus {
    pub const ALL: [FileStatus; 4] = [
        FileStatus::Pending,
        FileStatus::Stored,
        FileStatus::Failed,
        FileStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Stored => "stored",
            FileStatus::Failed => "failed",
            FileStatus::Deleted => "deleted",
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Pending, FileStatus::Stored)
                | (FileStatus::Pending, FileStatus::Failed)
                | (FileStatus::Pending, FileStatus::Deleted)
                | (FileStatus::Stored, FileStatus::Deleted)
                | (FileStatus::Failed, FileStatus::Deleted)
        )
    }

    /// Statuses a record may hold immediately before moving to `self`.
    pub fn predecessors(&self) -> Vec<FileStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }
}

impl FromStr for FileStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(FileStatus::Pending),
            "stored" => Ok(FileStatus::Stored),
            "failed" => Ok(FileStatus::Failed),
            "deleted" => Ok(FileStatus::Deleted),
            other => Err(AppError::InvalidInput(format!(
                "Unknown file status: {}",
                other
            ))),
        }
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Metadata record for an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub status: FileStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_stored(&self) -> bool {
        self.status == FileStatus::Stored
    }
}

/// Filter and pagination for listing file records.
///
/// An empty `statuses` list means "default listing" (stored records only).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilesParams {
    pub statuses: Vec<FileStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListFilesParams {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    /// Page size after defaulting and capping.
    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit > 0 => limit.min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Statuses a listing actually matches. With no explicit filter, deleted,
    /// pending and failed records are all hidden.
    pub fn effective_statuses(&self) -> Vec<FileStatus> {
        if self.statuses.is_empty() {
            vec![FileStatus::Stored]
        } else {
            self.statuses.clone()
        }
    }
}
