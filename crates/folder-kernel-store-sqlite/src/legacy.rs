//! The flat key/string store that predates the record store.
//!
//! Values are opaque strings. The migration pipeline only copies and
//! compares them, it never parses them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Keys migrated into the record store, in migration order.
pub const LEGACY_KEYS: [&str; 7] = [
    "favorite-folders",
    "color-settings",
    "appTitle",
    "appLogo",
    "folderNavigatorTitle",
    "folder-monitoring-settings",
    "folder-monitorings",
];

pub trait LegacyStore: Send {
    /// # Errors
    /// Returns an error when the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// # Errors
    /// Returns an error when the backend cannot be written.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// # Errors
    /// Returns an error when the backend cannot be written.
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Every key currently present, sorted.
    ///
    /// # Errors
    /// Returns an error when the backend cannot be read.
    fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLegacyStore {
    entries: BTreeMap<String, String>,
}

impl MemoryLegacyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self { entries: entries.into_iter().map(|(key, value)| (key.into(), value.into())).collect() }
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// A JSON object of string values kept in one file. Every write replaces
/// the file through a temporary sibling and a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFileLegacyStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileLegacyStore {
    /// Load the file at `path`; a missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error when the file exists but is unreadable or is not a
    /// JSON object of strings.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read legacy store {}", path.display()))?;
            serde_json::from_slice(&bytes).with_context(|| {
                format!("legacy store {} is not a JSON object of strings", path.display())
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path: path.to_path_buf(), entries })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for {}", self.path.display())
            })?;
        }
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("legacy store path has no file name: {}", self.path.display()))?;
        let mut temp_name = file_name.to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        let bytes = serde_json::to_vec_pretty(&self.entries).context("failed to encode legacy store")?;
        fs::write(&temp_path, bytes)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!("failed to move {} into place at {}", temp_path.display(), self.path.display())
        })
    }
}

impl LegacyStore for JsonFileLegacyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_store_round_trips_through_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("legacy.json");

        let mut store = JsonFileLegacyStore::open(&path)?;
        assert!(store.keys()?.is_empty());
        store.set("appTitle", "Acme Co")?;
        store.set("appLogo", "data:image/png;base64,AAAA")?;
        store.remove("appLogo")?;

        let reopened = JsonFileLegacyStore::open(&path)?;
        assert_eq!(reopened.get("appTitle")?.as_deref(), Some("Acme Co"));
        assert_eq!(reopened.get("appLogo")?, None);
        assert!(!dir.path().join("legacy.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("legacy.json");
        fs::write(&path, "[1, 2, 3]")?;
        assert!(JsonFileLegacyStore::open(&path).is_err());
        Ok(())
    }

    #[test]
    fn memory_store_lists_sorted_keys() -> Result<()> {
        let store = MemoryLegacyStore::with_entries([("b", "2"), ("a", "1")]);
        assert_eq!(store.keys()?, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }
}
