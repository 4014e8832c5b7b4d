//! Backup files: a single JSON document carrying one backup's content plus
//! export metadata and a SHA-256 digest of the `data` payload.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::backup::{BackupEngine, BackupType};
use crate::schema::Table;
use crate::store::{missing_record, RecordKey, RecordStore};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data: Map<String, Value>,
    pub exported_at: String,
    pub export_version: u32,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportOutcome {
    pub accepted: bool,
    pub backup_id: Option<i64>,
    pub reason: Option<String>,
}

impl ImportOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "backup file rejected");
        Self { accepted: false, backup_id: None, reason: Some(reason) }
    }
}

/// SHA-256 hex digest over the compact JSON of a backup's `data`.
#[must_use]
pub fn data_digest(data: &Map<String, Value>) -> String {
    let canonical = Value::Object(data.clone()).to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Write backup `id` to `out_file` as a backup file.
///
/// # Errors
/// Returns an error when the backup does not exist, is malformed, or the file cannot be written.
pub fn export_backup(
    engine: &BackupEngine,
    store: &RecordStore,
    id: i64,
    out_file: &Path,
) -> Result<BackupFile> {
    let backup = engine
        .get_backup(store, id)?
        .ok_or_else(|| missing_record(Table::Backups, &RecordKey::Int(id)))?;

    let file = BackupFile {
        sha256: data_digest(&backup.data),
        timestamp: backup.timestamp,
        kind: backup.kind,
        description: backup.description,
        data: backup.data,
        exported_at: folder_kernel_core::now_rfc3339(),
        export_version: EXPORT_VERSION,
    };

    if let Some(parent) = out_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create parent directory for backup file {}", out_file.display())
        })?;
    }
    let bytes = serde_json::to_vec_pretty(&file).context("failed to encode backup file")?;
    fs::write(out_file, bytes)
        .with_context(|| format!("failed to write backup file {}", out_file.display()))?;
    tracing::info!(backup_id = id, path = %out_file.display(), "backup exported");
    Ok(file)
}

/// Validate a backup file and store its content as a new manual backup.
/// Malformed content yields a rejected outcome rather than an error.
///
/// # Errors
/// Returns an error only when the file cannot be read or the store write fails.
pub fn import_backup(
    engine: &BackupEngine,
    store: &mut RecordStore,
    in_file: &Path,
) -> Result<ImportOutcome> {
    let bytes = fs::read(in_file)
        .with_context(|| format!("failed to read backup file {}", in_file.display()))?;
    let document: Value = match serde_json::from_slice(&bytes) {
        Ok(document) => document,
        Err(err) => return Ok(ImportOutcome::rejected(format!("not valid JSON: {err}"))),
    };
    import_backup_value(engine, store, &document, &in_file.display().to_string())
}

/// Same as [`import_backup`] for an already parsed document.
///
/// # Errors
/// Returns an error only when the store write fails.
pub fn import_backup_value(
    engine: &BackupEngine,
    store: &mut RecordStore,
    document: &Value,
    source: &str,
) -> Result<ImportOutcome> {
    let Some(data) = document.get("data") else {
        return Ok(ImportOutcome::rejected("missing data"));
    };
    let Some(data) = data.as_object() else {
        return Ok(ImportOutcome::rejected("data is not an object"));
    };
    if document.get("timestamp").and_then(Value::as_str).is_none() {
        return Ok(ImportOutcome::rejected("missing timestamp"));
    }
    if let Some(expected) = document.get("sha256").and_then(Value::as_str) {
        let actual = data_digest(data);
        if actual != expected {
            return Ok(ImportOutcome::rejected(format!(
                "sha256 mismatch: file says {expected}, content hashes to {actual}"
            )));
        }
    }

    let description = document
        .get("description")
        .and_then(Value::as_str)
        .map_or_else(|| format!("imported from {source}"), str::to_string);
    let id = engine.store_backup(store, BackupType::Manual, Some(&description), data.clone())?;
    tracing::info!(backup_id = id, source, "backup file imported");
    Ok(ImportOutcome { accepted: true, backup_id: Some(id), reason: None })
}
