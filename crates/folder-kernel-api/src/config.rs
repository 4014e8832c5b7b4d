use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::rate_limit::{OperationKind, Quota};

pub const DEFAULT_DATABASE_PATH: &str = "folder-kernel.sqlite3";
pub const DEFAULT_LEGACY_PATH: &str = "legacy-store.json";

/// Kernel settings, read from YAML. Every field has a default, so a partial
/// file (or no file at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KernelConfig {
    pub database_path: PathBuf,
    pub legacy_path: PathBuf,
    pub backup: BackupConfig,
    pub history: HistoryConfig,
    pub rate_limits: RateLimitConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            legacy_path: PathBuf::from(DEFAULT_LEGACY_PATH),
            backup: BackupConfig::default(),
            history: HistoryConfig::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    pub max_backups: usize,
    pub auto_backup_enabled: bool,
    pub interval_minutes: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { max_backups: 10, auto_backup_enabled: false, interval_minutes: 30 }
    }
}

impl BackupConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1).saturating_mul(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: folder_kernel_core::DEFAULT_HISTORY_LIMIT }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub upload: Quota,
    pub folder_operation: Quota,
    pub export: Quota,
    pub import: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            upload: Quota::new(10, 60),
            folder_operation: Quota::new(60, 60),
            export: Quota::new(5, 300),
            import: Quota::new(3, 600),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn quota(&self, kind: OperationKind) -> Quota {
        match kind {
            OperationKind::Upload => self.upload,
            OperationKind::FolderOperation => self.folder_operation,
            OperationKind::Export => self.export,
            OperationKind::Import => self.import,
        }
    }
}

impl KernelConfig {
    /// Load from a YAML file. `None` or a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// # Errors
    /// Returns an error when `text` is not a valid config document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("failed to parse config YAML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = KernelConfig::default();
        assert_eq!(config.backup.max_backups, 10);
        assert!(!config.backup.auto_backup_enabled);
        assert_eq!(config.backup.interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.history.max_entries, 50);
        assert_eq!(config.rate_limits.quota(OperationKind::Import), Quota::new(3, 600));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() -> Result<()> {
        let config = KernelConfig::from_yaml(
            "database_path: /tmp/fk.sqlite3\nbackup:\n  auto_backup_enabled: true\n  interval_minutes: 5\n",
        )?;
        assert_eq!(config.database_path, PathBuf::from("/tmp/fk.sqlite3"));
        assert!(config.backup.auto_backup_enabled);
        assert_eq!(config.backup.interval_minutes, 5);
        assert_eq!(config.backup.max_backups, 10);
        assert_eq!(config.legacy_path, PathBuf::from(DEFAULT_LEGACY_PATH));
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults_and_bad_yaml_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(KernelConfig::load(Some(&dir.path().join("absent.yaml")))?, KernelConfig::default());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "backup: [not, a, map]")?;
        assert!(KernelConfig::load(Some(&bad)).is_err());
        Ok(())
    }
}
