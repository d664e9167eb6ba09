//! Shared key generation and validation for storage backends.
//!
//! Generated keys look like `uploads/{YYYY}/{MM}/{file_id}/{sanitized_name}`.
//! The year/month prefix keeps directory fan-out bounded; the file id keeps
//! keys unique even when two uploads share a name.

use crate::traits::{StorageError, StorageResult};
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

const KEY_PREFIX: &str = "uploads";
const FALLBACK_FILENAME: &str = "file";
const MAX_FILENAME_LENGTH: usize = 255;

/// Reduce an untrusted display name to a single safe path component.
///
/// Keeps only the final path component, replaces every run of characters
/// outside `[A-Za-z0-9._-]` with `_`, trims leading and trailing `.`, `_`
/// and `-`, and falls back to `"file"` when nothing is left. Every
/// caller-supplied name goes through here before it touches a key.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim();
    let last_component = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);

    let mut sanitized = String::with_capacity(last_component.len());
    let mut in_unsafe_run = false;
    for c in last_component.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            sanitized.push(c);
            in_unsafe_run = false;
        } else if !in_unsafe_run {
            sanitized.push('_');
            in_unsafe_run = true;
        }
    }

    let sanitized = sanitized.trim_matches(|c| c == '.' || c == '_' || c == '-');
    if sanitized.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    // Output is ASCII-only, so byte truncation cannot split a character.
    let mut sanitized = sanitized.to_string();
    sanitized.truncate(MAX_FILENAME_LENGTH);
    sanitized
}

/// Derive the storage key for a new upload.
pub fn default_storage_key(file_id: Uuid, original_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/{:04}/{:02}/{}/{}",
        KEY_PREFIX,
        at.year(),
        at.month(),
        file_id,
        sanitize_filename(original_name)
    )
}

/// Validate a caller-supplied key and return its canonical slash-separated form.
///
/// Empty and `.` segments are dropped. Keys that are empty, absolute,
/// contain `..` segments, backslashes or NUL bytes are rejected.
pub fn normalize_key(key: &str) -> StorageResult<String> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key must be relative".to_string(),
        ));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }

    let mut segments = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidKey(
                    "Storage key contains path traversal".to_string(),
                ))
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }

    Ok(segments.join("/"))
}
