//! Snapshot backups of the managed record tables.
//!
//! A backup is a row in the backups table holding a deep copy of the
//! folders, favorites, settings, layouts and history tables. Its `checksum`
//! is the heuristic rolling hash of the change-detection composite (all of
//! those except favorites) and only answers "did anything change".
//!
//! Copies of legacy store entries taken by the migration pipeline live in the
//! separate migration backups table. They are never restored over the
//! managed tables and do not count against retention.

use anyhow::{anyhow, Context, Result};
use folder_kernel_core::checksum_json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::schema::Table;
use crate::store::{timestamp_order, RecordKey, RecordStore};

pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// Tables copied into every backup, in snapshot order.
pub const MANAGED_TABLES: [Table; 5] =
    [Table::Folders, Table::Favorites, Table::Settings, Table::Layouts, Table::History];

/// Tables whose content decides whether an automatic backup is needed.
pub const CHANGE_DETECTION_TABLES: [Table; 4] =
    [Table::Folders, Table::Settings, Table::Layouts, Table::History];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Manual,
    Auto,
    Scheduled,
    Cloud,
}

impl BackupType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Scheduled => "scheduled",
            Self::Cloud => "cloud",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "auto" => Some(Self::Auto),
            "scheduled" => Some(Self::Scheduled),
            "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub id: i64,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub data: Map<String, Value>,
}

impl BackupRecord {
    /// Whether the snapshot carries at least one managed table.
    #[must_use]
    pub fn has_table_snapshot(&self) -> bool {
        MANAGED_TABLES.iter().any(|table| self.data.get(table.as_str()).is_some_and(Value::is_array))
    }

    /// Records stored under `table` in this snapshot.
    #[must_use]
    pub fn table(&self, table: Table) -> &[Value] {
        self.data.get(table.as_str()).and_then(Value::as_array).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupIssue {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub issues: Vec<BackupIssue>,
}

impl VerificationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.invalid == 0
    }
}

/// Backup lifecycle over a [`RecordStore`], with a retention limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupEngine {
    max_backups: usize,
}

impl Default for BackupEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKUPS)
    }
}

impl BackupEngine {
    #[must_use]
    pub fn new(max_backups: usize) -> Self {
        Self { max_backups: max_backups.max(1) }
    }

    #[must_use]
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Snapshot the managed tables into a new backup, then apply retention.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or any read/write fails.
    pub fn create_backup(
        &self,
        store: &mut RecordStore,
        kind: BackupType,
        description: Option<&str>,
    ) -> Result<i64> {
        let data = snapshot(store)?;
        self.store_backup(store, kind, description, data)
    }

    /// Write an arbitrary snapshot as a backup, then apply retention.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the write fails.
    pub fn store_backup(
        &self,
        store: &mut RecordStore,
        kind: BackupType,
        description: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<i64> {
        let id = write_backup(store, Table::Backups, kind, description, data)?;
        tracing::info!(backup_id = id, kind = kind.as_str(), "backup created");

        let pruned = self.prune_backups(store)?;
        if pruned > 0 {
            tracing::info!(pruned, max_backups = self.max_backups, "pruned old backups");
        }
        Ok(id)
    }

    /// Keep a copy of legacy store entries for the migration pipeline.
    /// These rows sit outside retention and are never restored over the
    /// managed tables.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the write fails.
    pub fn store_migration_backup(
        &self,
        store: &mut RecordStore,
        description: &str,
        data: Map<String, Value>,
    ) -> Result<i64> {
        let id = write_backup(store, Table::MigrationBackups, BackupType::Manual, Some(description), data)?;
        tracing::info!(backup_id = id, description, "migration backup created");
        Ok(id)
    }

    /// Replace the managed tables with a backup's snapshot, keeping every
    /// record exactly as captured. Returns `false` when no such backup exists
    /// or it holds none of the managed tables. Tables are restored one after
    /// another; a failure part-way leaves the earlier tables restored.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or a write fails.
    pub fn restore_backup(&self, store: &mut RecordStore, id: i64) -> Result<bool> {
        let Some(backup) = self.get_backup(store, id)? else {
            tracing::warn!(backup_id = id, "restore requested for missing backup");
            return Ok(false);
        };
        if !backup.has_table_snapshot() {
            tracing::warn!(backup_id = id, "backup holds no table snapshot; restore refused");
            return Ok(false);
        }

        for table in MANAGED_TABLES {
            store.clear(table)?;
            for record in backup.table(table) {
                store
                    .put_verbatim(table, record.clone())
                    .with_context(|| format!("failed to restore {} from backup {id}", table.as_str()))?;
            }
        }
        tracing::info!(backup_id = id, "backup restored");
        Ok(true)
    }

    /// Fetch one backup; `Ok(None)` when absent.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the stored body is malformed.
    pub fn get_backup(&self, store: &RecordStore, id: i64) -> Result<Option<BackupRecord>> {
        read_backup(store, Table::Backups, id)
    }

    /// # Errors
    /// Returns an error when the store is not initialized or the stored body is malformed.
    pub fn get_migration_backup(&self, store: &RecordStore, id: i64) -> Result<Option<BackupRecord>> {
        read_backup(store, Table::MigrationBackups, id)
    }

    /// All well-formed backups, newest first. Malformed rows are skipped and logged.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or cannot be read.
    pub fn list_backups(&self, store: &RecordStore) -> Result<Vec<BackupRecord>> {
        list_newest_first(store, Table::Backups)
    }

    /// Migration backups, newest first.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or cannot be read.
    pub fn list_migration_backups(&self, store: &RecordStore) -> Result<Vec<BackupRecord>> {
        list_newest_first(store, Table::MigrationBackups)
    }

    /// # Errors
    /// Returns an error when the store is not initialized or the delete fails.
    pub fn delete_backup(&self, store: &mut RecordStore, id: i64) -> Result<()> {
        store.delete(Table::Backups, &RecordKey::Int(id))
    }

    /// Delete every backup beyond the newest `max_backups`. Returns how many
    /// were removed.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or a delete fails.
    pub fn prune_backups(&self, store: &mut RecordStore) -> Result<usize> {
        let stale: Vec<i64> = self
            .list_backups(store)?
            .into_iter()
            .skip(self.max_backups)
            .map(|backup| backup.id)
            .collect();
        for id in &stale {
            self.delete_backup(store, *id)?;
        }
        Ok(stale.len())
    }

    /// Whether the change-detection tables differ from the newest backup.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or cannot be read.
    pub fn should_create_backup(&self, store: &RecordStore) -> Result<bool> {
        let Some(latest) = self.list_backups(store)?.into_iter().next() else {
            return Ok(true);
        };
        let current = change_checksum(&snapshot(store)?);
        let previous = change_checksum(&latest.data);
        Ok(current != previous)
    }

    /// Check every stored backup for required fields and a matching checksum.
    /// Reports only; nothing is repaired.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or cannot be read.
    pub fn verify_backups(&self, store: &RecordStore) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        for body in store.get_all(Table::Backups)? {
            report.total += 1;
            let id = body.get("id").map_or_else(|| "unknown".to_string(), Value::to_string);
            match verify_body(&body) {
                Ok(()) => report.valid += 1,
                Err(reason) => {
                    tracing::warn!(backup_id = %id, reason = %reason, "backup failed verification");
                    report.invalid += 1;
                    report.issues.push(BackupIssue { id, reason });
                }
            }
        }
        Ok(report)
    }
}

fn write_backup(
    store: &mut RecordStore,
    table: Table,
    kind: BackupType,
    description: Option<&str>,
    data: Map<String, Value>,
) -> Result<i64> {
    let checksum = change_checksum(&data);
    let mut body = json!({
        "timestamp": folder_kernel_core::now_rfc3339(),
        "type": kind.as_str(),
        "checksum": checksum,
        "data": Value::Object(data),
    });
    if let (Some(description), Some(object)) = (description, body.as_object_mut()) {
        object.insert("description".to_string(), Value::String(description.to_string()));
    }

    match store.create(table, body).context("failed to write backup record")? {
        RecordKey::Int(id) => Ok(id),
        RecordKey::Text(other) => Err(anyhow!("backup key {other} is not numeric")),
    }
}

fn read_backup(store: &RecordStore, table: Table, id: i64) -> Result<Option<BackupRecord>> {
    store
        .read(table, &RecordKey::Int(id))?
        .map(|body| serde_json::from_value(body).with_context(|| format!("backup {id} is malformed")))
        .transpose()
}

fn list_newest_first(store: &RecordStore, table: Table) -> Result<Vec<BackupRecord>> {
    let mut backups = Vec::new();
    for body in store.get_all(table)? {
        match serde_json::from_value::<BackupRecord>(body) {
            Ok(backup) => backups.push(backup),
            Err(err) => tracing::warn!(error = %err, table = table.as_str(), "skipping malformed backup record"),
        }
    }
    backups.sort_by(|left, right| {
        timestamp_order(&right.timestamp)
            .cmp(&timestamp_order(&left.timestamp))
            .then(right.id.cmp(&left.id))
    });
    Ok(backups)
}

/// Deep copy of the managed tables keyed by logical table name.
///
/// # Errors
/// Returns an error when the store is not initialized or cannot be read.
pub fn snapshot(store: &RecordStore) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    for table in MANAGED_TABLES {
        data.insert(table.as_str().to_string(), Value::Array(store.get_all(table)?));
    }
    Ok(data)
}

/// Heuristic checksum of the change-detection composite of a snapshot.
#[must_use]
pub fn change_checksum(data: &Map<String, Value>) -> String {
    let mut composite = Map::new();
    for table in CHANGE_DETECTION_TABLES {
        let records = data.get(table.as_str()).cloned().unwrap_or_else(|| Value::Array(Vec::new()));
        composite.insert(table.as_str().to_string(), records);
    }
    checksum_json(&Value::Object(composite))
}

fn verify_body(body: &Value) -> std::result::Result<(), String> {
    let Some(data) = body.get("data") else {
        return Err("missing data".to_string());
    };
    let Some(data) = data.as_object() else {
        return Err("data is not an object".to_string());
    };
    if body.get("timestamp").and_then(Value::as_str).is_none() {
        return Err("missing timestamp".to_string());
    }
    if let Some(stored) = body.get("checksum").and_then(Value::as_str) {
        let computed = change_checksum(data);
        if computed != stored {
            return Err(format!("checksum mismatch: stored {stored}, computed {computed}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> Result<RecordStore> {
        let mut store = RecordStore::open_in_memory()?;
        store.initialize()?;
        Ok(store)
    }

    #[test]
    fn retention_keeps_the_newest_backups() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::new(10);
        let mut ids = Vec::new();
        for index in 0..10 {
            store.update(Table::Settings, json!({"key": "counter", "value": index}))?;
            ids.push(engine.create_backup(&mut store, BackupType::Auto, None)?);
        }
        assert_eq!(engine.list_backups(&store)?.len(), 10);

        engine.create_backup(&mut store, BackupType::Manual, Some("one more"))?;
        let remaining = engine.list_backups(&store)?;
        assert_eq!(remaining.len(), 10);
        assert!(engine.get_backup(&store, ids[0])?.is_none());
        assert_eq!(remaining[0].description.as_deref(), Some("one more"));
        Ok(())
    }

    #[test]
    fn restore_replaces_managed_tables() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::default();
        store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        store.create(Table::History, json!({"type": "CREATE", "timestamp": "t"}))?;
        let id = engine.create_backup(&mut store, BackupType::Manual, None)?;

        store.delete(Table::Folders, &RecordKey::Text("a".into()))?;
        store.create(Table::Folders, json!({"id": "b", "name": "Stray"}))?;

        assert!(engine.restore_backup(&mut store, id)?);
        let folders = store.get_all(Table::Folders)?;
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0]["id"], "a");
        assert_eq!(store.count(Table::History)?, 1);
        assert!(!engine.restore_backup(&mut store, 9_999)?);
        Ok(())
    }

    #[test]
    fn change_detection_skips_identical_state() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::default();
        assert!(engine.should_create_backup(&store)?);

        store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        engine.create_backup(&mut store, BackupType::Auto, None)?;
        assert!(!engine.should_create_backup(&store)?);

        store.create(Table::Favorites, json!({"id": "f", "folderId": "a"}))?;
        assert!(!engine.should_create_backup(&store)?);

        store.update(Table::Folders, json!({"id": "a", "name": "Accounting"}))?;
        assert!(engine.should_create_backup(&store)?);
        Ok(())
    }

    #[test]
    fn verification_flags_tampered_and_incomplete_records() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::default();
        engine.create_backup(&mut store, BackupType::Manual, None)?;
        store.create(Table::Backups, json!({"timestamp": "2024-01-01T00:00:00Z"}))?;
        store.create(
            Table::Backups,
            json!({"timestamp": "2024-01-01T00:00:00Z", "checksum": "1", "data": {"folders": [{"id": "x"}]}}),
        )?;

        let report = engine.verify_backups(&store)?;
        assert_eq!(report.total, 3);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 2);
        assert!(report.issues.iter().any(|issue| issue.reason == "missing data"));
        assert!(report.issues.iter().any(|issue| issue.reason.starts_with("checksum mismatch")));
        assert!(!report.is_clean());
        Ok(())
    }

    #[test]
    fn migration_backups_stay_outside_retention_and_restore() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::new(2);
        store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        engine.create_backup(&mut store, BackupType::Manual, None)?;

        let mut legacy = Map::new();
        legacy.insert("legacy".to_string(), json!({"appTitle": "Acme Co"}));
        let safety_net = engine.store_migration_backup(&mut store, "full legacy snapshot", legacy)?;
        assert!(!engine.should_create_backup(&store)?);

        for _ in 0..3 {
            engine.create_backup(&mut store, BackupType::Auto, None)?;
        }
        assert_eq!(engine.list_backups(&store)?.len(), 2);
        let kept = engine.list_migration_backups(&store)?;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, safety_net);
        assert_eq!(kept[0].data["legacy"]["appTitle"], "Acme Co");
        assert_eq!(store.count(Table::Folders)?, 1);
        Ok(())
    }

    #[test]
    fn restore_refuses_snapshots_without_managed_tables() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::default();
        store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        let mut legacy = Map::new();
        legacy.insert("legacy".to_string(), json!({"appTitle": "Acme Co"}));
        let id = engine.store_backup(&mut store, BackupType::Manual, Some("imported"), legacy)?;

        assert!(!engine.restore_backup(&mut store, id)?);
        assert_eq!(store.count(Table::Folders)?, 1);
        Ok(())
    }

    #[test]
    fn restore_keeps_records_exactly_as_captured() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::default();
        store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        store.update(Table::Settings, json!({"key": "theme", "value": "dark"}))?;
        let captured = snapshot(&store)?;
        let id = engine.create_backup(&mut store, BackupType::Manual, None)?;

        assert!(engine.restore_backup(&mut store, id)?);
        assert_eq!(snapshot(&store)?, captured);
        assert!(!engine.should_create_backup(&store)?);
        Ok(())
    }

    #[test]
    fn list_is_newest_first_and_delete_removes() -> Result<()> {
        let mut store = store()?;
        let engine = BackupEngine::default();
        let first = engine.create_backup(&mut store, BackupType::Manual, None)?;
        let second = engine.create_backup(&mut store, BackupType::Scheduled, None)?;
        let listed: Vec<i64> = engine.list_backups(&store)?.iter().map(|backup| backup.id).collect();
        assert_eq!(listed, vec![second, first]);

        engine.delete_backup(&mut store, second)?;
        engine.delete_backup(&mut store, second)?;
        assert_eq!(engine.list_backups(&store)?.len(), 1);
        Ok(())
    }
}
