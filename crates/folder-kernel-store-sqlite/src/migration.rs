//! Incremental, validated migration from the legacy flat store.
//!
//! Each legacy key moves `NotMigrated -> BackedUp -> Written -> Validated`.
//! A key counts as migrated only once its record is validated by reading the
//! written value back and comparing it byte for byte with the source. The
//! legacy store is never modified here; it stays the source of truth until
//! every present key is validated.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::backup::BackupEngine;
use crate::legacy::{LegacyStore, LEGACY_KEYS};
use crate::schema::Table;
use crate::store::{RecordKey, RecordStore};

pub const ORIGINAL_SOURCE: &str = "legacy-store";

const FULL_SNAPSHOT_DESCRIPTION: &str = "full legacy snapshot";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStep {
    NotMigrated,
    BackedUp,
    Written,
    Validated,
}

impl MigrationStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotMigrated => "NOT_MIGRATED",
            Self::BackedUp => "BACKED_UP",
            Self::Written => "WRITTEN",
            Self::Validated => "VALIDATED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub key: String,
    pub value: String,
    pub original_source: String,
    pub migrated_at: String,
    pub validated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyCheck {
    pub safe: bool,
    pub reason: Option<String>,
    pub present_keys: Vec<String>,
    pub already_complete: bool,
}

impl SafetyCheck {
    fn refuse(reason: impl Into<String>, present_keys: Vec<String>, already_complete: bool) -> Self {
        Self { safe: false, reason: Some(reason.into()), present_keys, already_complete }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationResult {
    pub success: bool,
    pub items_migrated: usize,
    pub errors: Vec<String>,
    pub backup_id: Option<i64>,
    pub migration_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationStatus {
    pub is_complete: bool,
    pub validated_keys: Vec<String>,
    pub pending_keys: Vec<String>,
}

pub struct MigrationPipeline<'a> {
    store: &'a mut RecordStore,
    legacy: &'a dyn LegacyStore,
    backups: BackupEngine,
}

impl<'a> MigrationPipeline<'a> {
    pub fn new(store: &'a mut RecordStore, legacy: &'a dyn LegacyStore, backups: BackupEngine) -> Self {
        Self { store, legacy, backups }
    }

    /// Precondition gate for [`Self::migrate_all`].
    #[must_use]
    pub fn is_safe_to_migrate(&self) -> SafetyCheck {
        if !self.store.is_initialized() {
            return SafetyCheck::refuse("record store is not initialized", Vec::new(), false);
        }
        let present = match self.present_keys() {
            Ok(present) => present,
            Err(err) => {
                return SafetyCheck::refuse(format!("failed to read legacy store: {err:#}"), Vec::new(), false)
            }
        };
        if present.is_empty() {
            return SafetyCheck::refuse("no legacy data found to migrate", present, false);
        }
        match self.validated_keys() {
            Ok(validated) if present.iter().all(|key| validated.contains(key)) => {
                SafetyCheck::refuse("migration already complete", present, true)
            }
            Ok(_) => SafetyCheck { safe: true, reason: None, present_keys: present, already_complete: false },
            Err(err) => SafetyCheck::refuse(format!("failed to read migration records: {err:#}"), present, false),
        }
    }

    /// Copy every legacy key, not only the migrated ones, into one backup.
    ///
    /// # Errors
    /// Returns an error when the legacy store cannot be read or the backup cannot be written.
    pub fn create_backup(&mut self) -> Result<i64> {
        let mut entries = Map::new();
        for key in self.legacy.keys()? {
            if let Some(value) = self.legacy.get(&key)? {
                entries.insert(key, Value::String(value));
            }
        }
        let count = entries.len();
        let mut data = Map::new();
        data.insert("legacy".to_string(), Value::Object(entries));
        let id = self.backups.store_migration_backup(&mut *self.store, FULL_SNAPSHOT_DESCRIPTION, data)?;
        tracing::info!(backup_id = id, keys = count, "legacy snapshot backup created");
        Ok(id)
    }

    /// Migrate one key. A key absent from the legacy store fails before
    /// anything is written.
    pub fn migrate_single_key(&mut self, key: &str) -> MigrationResult {
        match self.migrate_key(key) {
            Ok(backup_id) => MigrationResult {
                success: true,
                items_migrated: 1,
                errors: Vec::new(),
                backup_id: Some(backup_id),
                migration_complete: self.migration_complete(),
            },
            Err(err) => {
                tracing::warn!(key, error = %format!("{err:#}"), "legacy key migration failed");
                MigrationResult {
                    success: false,
                    items_migrated: 0,
                    errors: vec![format!("{key}: {err:#}")],
                    backup_id: None,
                    migration_complete: self.migration_complete(),
                }
            }
        }
    }

    /// Gate, snapshot, then migrate every pending key in fixed order,
    /// stopping at the first failure. Keys absent from the legacy store are
    /// skipped; keys already validated are not migrated again.
    pub fn migrate_all(&mut self) -> MigrationResult {
        let safety = self.is_safe_to_migrate();
        if !safety.safe {
            if safety.already_complete {
                tracing::info!("legacy migration already complete; nothing to do");
                return MigrationResult {
                    success: true,
                    items_migrated: 0,
                    errors: Vec::new(),
                    backup_id: None,
                    migration_complete: true,
                };
            }
            let reason = safety.reason.unwrap_or_else(|| "migration is not safe".to_string());
            tracing::warn!(reason = %reason, "legacy migration refused");
            return MigrationResult {
                success: false,
                items_migrated: 0,
                errors: vec![reason],
                backup_id: None,
                migration_complete: self.migration_complete(),
            };
        }

        let backup_id = match self.create_backup() {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "legacy snapshot backup failed; migration aborted");
                return MigrationResult {
                    success: false,
                    items_migrated: 0,
                    errors: vec![format!("snapshot backup failed: {err:#}")],
                    backup_id: None,
                    migration_complete: self.migration_complete(),
                };
            }
        };

        let validated = self.validated_keys().unwrap_or_default();
        let mut items_migrated = 0;
        let mut errors = Vec::new();
        for key in LEGACY_KEYS {
            if !safety.present_keys.iter().any(|present| present == key) || validated.contains(key) {
                continue;
            }
            match self.migrate_key(key) {
                Ok(_) => items_migrated += 1,
                Err(err) => {
                    tracing::warn!(key, error = %format!("{err:#}"), "stopping migration at first failing key");
                    errors.push(format!("{key}: {err:#}"));
                    break;
                }
            }
        }

        MigrationResult {
            success: errors.is_empty(),
            items_migrated,
            errors,
            backup_id: Some(backup_id),
            migration_complete: self.migration_complete(),
        }
    }

    /// Status over the full fixed key set; complete only when all seven keys
    /// have validated records.
    ///
    /// # Errors
    /// Returns an error when the migration records cannot be read.
    pub fn check_existing_migration(&self) -> Result<MigrationStatus> {
        let validated = self.validated_keys()?;
        let (validated_keys, pending_keys): (Vec<String>, Vec<String>) =
            LEGACY_KEYS.iter().map(|key| (*key).to_string()).partition(|key| validated.contains(key));
        Ok(MigrationStatus { is_complete: pending_keys.is_empty(), validated_keys, pending_keys })
    }

    /// Observed step of one key.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn key_state(&self, key: &str) -> Result<MigrationStep> {
        if let Some(record) = self.read_record(key)? {
            return Ok(if record.validated { MigrationStep::Validated } else { MigrationStep::Written });
        }
        let description = key_backup_description(key);
        let backed_up = self
            .backups
            .list_migration_backups(&*self.store)?
            .iter()
            .any(|backup| backup.description.as_deref() == Some(description.as_str()));
        Ok(if backed_up { MigrationStep::BackedUp } else { MigrationStep::NotMigrated })
    }

    /// Delete every migration record so migration can start over. Backups
    /// and the legacy store are left alone.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the delete fails.
    pub fn rollback_migration(&mut self) -> Result<usize> {
        let removed = self.store.clear(Table::LegacyMigrations)?;
        tracing::info!(removed, "legacy migration rolled back");
        Ok(removed)
    }

    fn migrate_key(&mut self, key: &str) -> Result<i64> {
        if !LEGACY_KEYS.contains(&key) {
            return Err(anyhow!("{key} is not a migratable legacy key"));
        }
        let value = self
            .legacy
            .get(key)
            .with_context(|| format!("failed to read legacy key {key}"))?
            .ok_or_else(|| anyhow!("legacy store has no value for {key}"))?;

        let mut entries = Map::new();
        entries.insert(key.to_string(), Value::String(value.clone()));
        let mut data = Map::new();
        data.insert("legacy".to_string(), Value::Object(entries));
        let backup_id =
            self.backups.store_migration_backup(&mut *self.store, &key_backup_description(key), data)?;
        log_step(key, MigrationStep::BackedUp);

        let mut record = MigrationRecord {
            key: key.to_string(),
            value: value.clone(),
            original_source: ORIGINAL_SOURCE.to_string(),
            migrated_at: folder_kernel_core::now_rfc3339(),
            validated: false,
        };
        self.store.update(Table::LegacyMigrations, serde_json::to_value(&record)?)?;
        log_step(key, MigrationStep::Written);

        let written = self.read_record(key)?.map(|stored| stored.value);
        if written.as_deref() != Some(value.as_str()) {
            return Err(anyhow!("read-back of {key} does not match the legacy value"));
        }

        record.validated = true;
        self.store.update(Table::LegacyMigrations, serde_json::to_value(&record)?)?;
        log_step(key, MigrationStep::Validated);
        Ok(backup_id)
    }

    fn read_record(&self, key: &str) -> Result<Option<MigrationRecord>> {
        self.store
            .read(Table::LegacyMigrations, &RecordKey::Text(key.to_string()))?
            .map(|body| {
                serde_json::from_value(body)
                    .with_context(|| format!("migration record for {key} is malformed"))
            })
            .transpose()
    }

    fn present_keys(&self) -> Result<Vec<String>> {
        let mut present = Vec::new();
        for key in LEGACY_KEYS {
            if self.legacy.get(key)?.is_some() {
                present.push(key.to_string());
            }
        }
        Ok(present)
    }

    fn validated_keys(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .search_by_index(Table::LegacyMigrations, "validated", &json!(true))?
            .iter()
            .filter_map(|body| body.get("key").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// No key present in the legacy store is left without a validated record.
    fn migration_complete(&self) -> bool {
        match (self.present_keys(), self.validated_keys()) {
            (Ok(present), Ok(validated)) => present.iter().all(|key| validated.contains(key)),
            _ => false,
        }
    }
}

fn key_backup_description(key: &str) -> String {
    format!("legacy key {key}")
}

fn log_step(key: &str, step: MigrationStep) {
    tracing::debug!(key, step = step.as_str(), "legacy key migration step");
}
