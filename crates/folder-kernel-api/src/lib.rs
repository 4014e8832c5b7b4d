//! Orchestration over the folder kernel: one caller-owned handle bundling the
//! record store, the undo/redo history, the legacy store and the background
//! backup machinery.

pub mod config;
pub mod health;
pub mod rate_limit;
pub mod scheduler;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use folder_kernel_core::{
    folders_to_csv, folders_to_json, parse_folder_csv, parse_folder_json, ActionId, ErrorReporter,
    Folder, FolderId, FolderTree, HistoryAction, HistoryEngine, TracingReporter,
};
use folder_kernel_store_sqlite::{
    BackupEngine, BackupRecord, ImportOutcome, JsonFileLegacyStore, LegacyStore, MigrationPipeline,
    MigrationResult, MigrationStatus, MigrationStep, RecordKey, RecordStore, SafetyCheck, SearchHit,
    Table, VerificationReport,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use config::KernelConfig;
pub use health::{HealthReport, HealthStatus};
pub use rate_limit::{OperationKind, Quota, RateLimited, RateLimiter};
pub use scheduler::{
    AutoBackupOutcome, AutoBackupScheduler, BackupCoordinator, BackupStats, PeriodicTask,
};

pub const KERNEL_API_VERSION: &str = "kernel.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FolderFormat {
    Json,
    Csv,
}

impl FolderFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub action_id: ActionId,
    pub roots: usize,
    pub folders: usize,
}

pub struct FolderKernel {
    config: KernelConfig,
    store: Arc<Mutex<RecordStore>>,
    backups: Arc<BackupCoordinator>,
    history: HistoryEngine,
    legacy: Box<dyn LegacyStore>,
    limiter: Arc<RateLimiter>,
    reporter: Arc<dyn ErrorReporter>,
}

impl std::fmt::Debug for FolderKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderKernel")
            .field("config", &self.config)
            .field("history", &self.history)
            .field("backups", &self.backups)
            .finish_non_exhaustive()
    }
}

impl FolderKernel {
    /// Open the database and legacy store named by `config`, initialize the
    /// schema, and load the folder tree.
    ///
    /// # Errors
    /// Returns an error when either store cannot be opened or initialized.
    pub fn open(config: KernelConfig) -> Result<Self> {
        let store = RecordStore::open(&config.database_path)?;
        let legacy = JsonFileLegacyStore::open(&config.legacy_path)?;
        Self::with_parts(config, store, Box::new(legacy), Arc::new(TracingReporter))
    }

    /// Assemble a kernel from already opened parts.
    ///
    /// # Errors
    /// Returns an error when the store cannot be initialized or the folder tree cannot be loaded.
    pub fn with_parts(
        config: KernelConfig,
        mut store: RecordStore,
        legacy: Box<dyn LegacyStore>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        store.initialize().context("failed to initialize record store")?;
        let store = Arc::new(Mutex::new(store));
        let engine = BackupEngine::new(config.backup.max_backups);
        let backups = Arc::new(BackupCoordinator::new(Arc::clone(&store), engine, Arc::clone(&reporter)));
        let history = HistoryEngine::with_limit(config.history.max_entries, Arc::clone(&reporter));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let mut kernel = Self { config, store, backups, history, legacy, limiter, reporter };
        kernel.load_tree()?;
        Ok(kernel)
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub fn history(&self) -> &HistoryEngine {
        &self.history
    }

    #[must_use]
    pub fn tree(&self) -> &FolderTree {
        self.history.present()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Run `f` with exclusive access to the record store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut RecordStore) -> R) -> R {
        f(&mut self.store.lock())
    }

    /// # Errors
    /// Returns an error when the connection cannot be closed.
    pub fn close(&self) -> Result<()> {
        self.store.lock().close()
    }

    /// Replace the present tree with the folders table. Both history stacks
    /// are dropped.
    ///
    /// # Errors
    /// Returns an error when the folders table cannot be read or holds duplicate ids.
    pub fn load_tree(&mut self) -> Result<usize> {
        let rows = self.store.lock().get_all(Table::Folders)?;
        let total = rows.len();
        let tree = tree_from_rows(rows)?;
        if tree.len() < total {
            self.reporter.report_warning(&format!(
                "{} folder rows were unreachable from any root and were not loaded",
                total - tree.len()
            ));
        }
        let loaded = tree.len();
        self.history.reset(tree);
        tracing::info!(folders = loaded, "folder tree loaded");
        Ok(loaded)
    }

    /// Write the present tree to the folders table, replacing its content.
    ///
    /// # Errors
    /// Returns an error when the table cannot be cleared or written.
    pub fn save_tree(&self) -> Result<usize> {
        write_tree(&mut self.store.lock(), self.history.present())
    }

    /// # Errors
    /// Returns an error when the quota is spent, the name is empty, the id is
    /// taken, or the parent does not exist.
    pub fn create_folder(&mut self, folder: Folder, parent: Option<&FolderId>) -> Result<ActionId> {
        self.admit(OperationKind::FolderOperation)?;
        let result = self.history.create_folder(folder, parent);
        self.finish_edit("create_folder", result)
    }

    /// # Errors
    /// Returns an error when the quota is spent, the name is empty, or the folder does not exist.
    pub fn update_folder(&mut self, folder: &Folder) -> Result<ActionId> {
        self.admit(OperationKind::FolderOperation)?;
        let result = self.history.update_folder(folder);
        self.finish_edit("update_folder", result)
    }

    /// # Errors
    /// Returns an error when the quota is spent or the folder does not exist.
    pub fn delete_folder(&mut self, id: &FolderId) -> Result<ActionId> {
        self.admit(OperationKind::FolderOperation)?;
        let result = self.history.delete_folder(id);
        self.finish_edit("delete_folder", result)
    }

    /// # Errors
    /// Returns an error when the quota is spent, a folder is missing, or the
    /// move would create a cycle.
    pub fn move_folder(&mut self, id: &FolderId, new_parent: Option<&FolderId>) -> Result<ActionId> {
        self.admit(OperationKind::FolderOperation)?;
        let result = self.history.move_folder(id, new_parent);
        self.finish_edit("move_folder", result)
    }

    /// Undo the latest edit and persist the resulting tree.
    pub fn undo(&mut self) -> bool {
        let undone = self.history.undo();
        if undone {
            self.persist_tree();
        }
        undone
    }

    /// Redo the latest undone edit and persist the resulting tree.
    pub fn redo(&mut self) -> bool {
        let redone = self.history.redo();
        if redone {
            self.persist_tree();
        }
        redone
    }

    /// Parse a folder import document and add its folders under `parent` as
    /// one undoable step.
    ///
    /// # Errors
    /// Returns an error when the quota is spent, the document is invalid, or
    /// the folders cannot be inserted.
    pub fn import_folders(
        &mut self,
        format: FolderFormat,
        input: &str,
        parent: Option<&FolderId>,
    ) -> Result<ImportSummary> {
        self.admit(OperationKind::Import)?;
        let parsed = match format {
            FolderFormat::Json => parse_folder_json(input),
            FolderFormat::Csv => parse_folder_csv(input),
        };
        let folders = match parsed {
            Ok(folders) => folders,
            Err(err) => {
                self.report("import_folders", &err, &[("format", format.as_str())]);
                return Err(anyhow::Error::new(err).context(format!("invalid {} import", format.as_str())));
            }
        };
        let roots = folders.len();
        let count = folders.iter().map(Folder::subtree_len).sum();
        let result = self.history.import_folders(folders, parent);
        let action_id = self.finish_edit("import_folders", result)?;
        Ok(ImportSummary { action_id, roots, folders: count })
    }

    /// Render the present tree in an import-compatible format.
    ///
    /// # Errors
    /// Returns an error when the quota is spent or encoding fails.
    pub fn export_folders(&self, format: FolderFormat) -> Result<String> {
        self.admit(OperationKind::Export)?;
        let folders = self.history.present().to_folders();
        let rendered = match format {
            FolderFormat::Json => folders_to_json(&folders),
            FolderFormat::Csv => folders_to_csv(&folders),
        };
        rendered.with_context(|| format!("failed to export folders as {}", format.as_str()))
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        self.store.lock().full_text_search(term)
    }

    /// Manual backup; change detection is not consulted.
    ///
    /// # Errors
    /// Returns an error when another backup is in flight or the write fails.
    pub fn create_backup(&self, description: Option<&str>) -> Result<i64> {
        self.backups.create_manual_backup(description)
    }

    /// One automatic backup run, skipped when nothing changed.
    #[must_use]
    pub fn run_auto_backup(&self) -> AutoBackupOutcome {
        self.backups.run_auto_backup()
    }

    #[must_use]
    pub fn backup_stats(&self) -> BackupStats {
        self.backups.stats()
    }

    /// # Errors
    /// Returns an error when the backups table cannot be read.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.backups.engine().list_backups(&self.store.lock())
    }

    /// Restore a backup and reload the folder tree from it. Returns `false`
    /// when no backup has that id.
    ///
    /// # Errors
    /// Returns an error when the restore or the reload fails.
    pub fn restore_backup(&mut self, id: i64) -> Result<bool> {
        let restored = self.backups.engine().restore_backup(&mut self.store.lock(), id)?;
        if restored {
            self.load_tree()?;
        }
        Ok(restored)
    }

    /// # Errors
    /// Returns an error when the backups table cannot be read.
    pub fn verify_backups(&self) -> Result<VerificationReport> {
        self.backups.engine().verify_backups(&self.store.lock())
    }

    /// # Errors
    /// Returns an error when the backups table cannot be read or written.
    pub fn prune_backups(&self) -> Result<usize> {
        self.backups.engine().prune_backups(&mut self.store.lock())
    }

    /// # Errors
    /// Returns an error when the quota is spent, the backup is missing, or the file cannot be written.
    pub fn export_backup_file(&self, id: i64, out_file: &Path) -> Result<folder_kernel_store_sqlite::BackupFile> {
        self.admit(OperationKind::Export)?;
        folder_kernel_store_sqlite::export_backup(&self.backups.engine(), &self.store.lock(), id, out_file)
    }

    /// # Errors
    /// Returns an error when the quota is spent, the file cannot be read, or the store write fails.
    pub fn import_backup_file(&self, in_file: &Path) -> Result<ImportOutcome> {
        self.admit(OperationKind::Import)?;
        let outcome =
            folder_kernel_store_sqlite::import_backup(&self.backups.engine(), &mut self.store.lock(), in_file)?;
        if let Some(reason) = outcome.reason.as_deref().filter(|_| !outcome.accepted) {
            self.reporter.report_warning(&format!("backup file {} rejected: {reason}", in_file.display()));
        }
        Ok(outcome)
    }

    #[must_use]
    pub fn migration_safety(&self) -> SafetyCheck {
        self.with_pipeline(|pipeline| pipeline.is_safe_to_migrate())
    }

    /// Migrate every pending legacy key. Failures come back in the result and
    /// are reported as warnings.
    pub fn migrate_all(&mut self) -> MigrationResult {
        let result = self.with_pipeline(|pipeline| pipeline.migrate_all());
        if !result.success {
            self.reporter.report_warning(&format!("legacy migration failed: {}", result.errors.join("; ")));
        }
        result
    }

    pub fn migrate_key(&mut self, key: &str) -> MigrationResult {
        let result = self.with_pipeline(|pipeline| pipeline.migrate_single_key(key));
        if !result.success {
            self.reporter.report_warning(&format!("legacy key {key} failed to migrate: {}", result.errors.join("; ")));
        }
        result
    }

    /// # Errors
    /// Returns an error when the migration records cannot be read.
    pub fn migration_status(&self) -> Result<MigrationStatus> {
        self.with_pipeline(|pipeline| pipeline.check_existing_migration())
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn migration_key_state(&self, key: &str) -> Result<MigrationStep> {
        self.with_pipeline(|pipeline| pipeline.key_state(key))
    }

    /// # Errors
    /// Returns an error when the migration records cannot be deleted.
    pub fn rollback_migration(&mut self) -> Result<usize> {
        self.with_pipeline(|pipeline| pipeline.rollback_migration())
    }

    /// # Errors
    /// Returns an error when the legacy store cannot be read or the backup cannot be written.
    pub fn migration_snapshot(&mut self) -> Result<i64> {
        self.with_pipeline(|pipeline| pipeline.create_backup())
    }

    /// Legacy entry copies taken by the migration pipeline, newest first.
    ///
    /// # Errors
    /// Returns an error when the migration backups table cannot be read.
    pub fn migration_backups(&self) -> Result<Vec<BackupRecord>> {
        self.backups.engine().list_migration_backups(&self.store.lock())
    }

    /// Combine integrity, backup verification and migration status. A
    /// degraded result is also reported as a warning.
    #[must_use]
    pub fn health_check(&self) -> HealthReport {
        let store = self.store.lock();
        let integrity = store.integrity_check().map_err(|err| format!("{err:#}"));
        let backups = self.backups.engine().verify_backups(&store).map_err(|err| format!("{err:#}"));
        drop(store);
        let (migration, safety) = self.with_pipeline(|pipeline| {
            (pipeline.check_existing_migration().map_err(|err| format!("{err:#}")), pipeline.is_safe_to_migrate())
        });

        let report = health::assess(health::Probes {
            integrity,
            backups,
            migration,
            safety,
            backup_stats: self.backups.stats(),
        });
        if report.is_healthy() {
            tracing::info!("health check passed");
        } else {
            self.reporter.report_warning(&format!("health check degraded: {}", report.issues.join("; ")));
        }
        report
    }

    /// Start the auto-backup scheduler when the configuration enables it.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start_auto_backup(&self) -> Option<AutoBackupScheduler> {
        if !self.config.backup.auto_backup_enabled {
            tracing::debug!("auto-backup disabled by configuration");
            return None;
        }
        Some(AutoBackupScheduler::spawn(Arc::clone(&self.backups), self.config.backup.interval()))
    }

    /// Periodically drop expired rate-limit entries. Must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn start_rate_limit_cleanup(&self, every: Duration) -> PeriodicTask {
        scheduler::spawn_rate_limit_cleanup(Arc::clone(&self.limiter), every)
    }

    fn with_pipeline<R>(&self, f: impl FnOnce(&mut MigrationPipeline<'_>) -> R) -> R {
        let mut store = self.store.lock();
        let mut pipeline = MigrationPipeline::new(&mut store, self.legacy.as_ref(), self.backups.engine());
        f(&mut pipeline)
    }

    fn admit(&self, kind: OperationKind) -> Result<()> {
        self.limiter.check(kind).map_err(|limited| {
            self.reporter.report_warning(&limited.to_string());
            anyhow::Error::new(limited)
        })
    }

    fn report(&self, operation: &str, err: &dyn std::error::Error, extra: &[(&str, &str)]) {
        let mut context = BTreeMap::new();
        context.insert("operation".to_string(), operation.to_string());
        for (key, value) in extra {
            context.insert((*key).to_string(), (*value).to_string());
        }
        self.reporter.report_exception(err, &context);
    }

    fn finish_edit(
        &mut self,
        operation: &str,
        result: Result<ActionId, folder_kernel_core::HistoryError>,
    ) -> Result<ActionId> {
        match result {
            Ok(action_id) => {
                self.persist_edit();
                Ok(action_id)
            }
            Err(err) => {
                self.report(operation, &err, &[]);
                Err(anyhow::Error::new(err).context(format!("{operation} rejected")))
            }
        }
    }

    fn persist_edit(&self) {
        if let Some(action) = self.history.past().back() {
            let mut store = self.store.lock();
            if let Err(err) = append_history(&mut store, action, self.config.history.max_entries) {
                self.reporter.report_warning(&format!("failed to record history action {}: {err:#}", action.id));
            }
        }
        self.persist_tree();
    }

    /// The in-memory tree stays authoritative when the write fails.
    fn persist_tree(&self) {
        if let Err(err) = self.save_tree() {
            self.reporter.report_warning(&format!("failed to save folder tree: {err:#}"));
        }
    }
}

/// Flat rows for the folders table: each node without children, plus its
/// `parentId` and sibling `position`.
fn tree_rows(tree: &FolderTree) -> Vec<Value> {
    let mut rows = Vec::with_capacity(tree.len());
    collect_rows(tree, None, &mut rows);
    rows
}

fn collect_rows(tree: &FolderTree, parent: Option<&FolderId>, rows: &mut Vec<Value>) {
    let Some(children) = tree.children(parent) else {
        return;
    };
    for (position, id) in children.iter().enumerate() {
        let Some(folder) = tree.get(id) else {
            continue;
        };
        let Ok(Value::Object(mut body)) = serde_json::to_value(folder.detached()) else {
            continue;
        };
        body.remove("subFolders");
        body.insert(
            "parentId".to_string(),
            parent.map_or(Value::Null, |parent| Value::String(parent.as_str().to_string())),
        );
        body.insert("position".to_string(), Value::from(position));
        rows.push(Value::Object(body));
        collect_rows(tree, Some(id), rows);
    }
}

fn write_tree(store: &mut RecordStore, tree: &FolderTree) -> Result<usize> {
    let rows = tree_rows(tree);
    let count = rows.len();
    store.clear(Table::Folders)?;
    for row in rows {
        store.put_verbatim(Table::Folders, row)?;
    }
    tracing::debug!(folders = count, "folder tree saved");
    Ok(count)
}

/// Rebuild the forest from flat rows. Rows naming an unknown parent become
/// roots; rows caught in a parent cycle are unreachable and left out.
fn tree_from_rows(rows: Vec<Value>) -> Result<FolderTree> {
    let mut known = HashSet::new();
    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows {
        let parent = row.get("parentId").and_then(Value::as_str).map(str::to_string);
        let position = row.get("position").and_then(Value::as_u64).unwrap_or(u64::MAX);
        let folder: Folder = serde_json::from_value(row).context("malformed folder row")?;
        known.insert(folder.id.as_str().to_string());
        parsed.push((parent, position, folder));
    }

    let mut groups: HashMap<Option<String>, Vec<(u64, Folder)>> = HashMap::new();
    for (parent, position, folder) in parsed {
        let parent = parent.filter(|parent| known.contains(parent));
        groups.entry(parent).or_default().push((position, folder));
    }
    for siblings in groups.values_mut() {
        siblings.sort_by_key(|(position, _)| *position);
    }

    let roots = assemble(&mut groups, None);
    FolderTree::from_folders(roots).map_err(|err| anyhow!("folders table is inconsistent: {err}"))
}

fn assemble(groups: &mut HashMap<Option<String>, Vec<(u64, Folder)>>, parent: Option<String>) -> Vec<Folder> {
    let siblings = groups.remove(&parent).unwrap_or_default();
    siblings
        .into_iter()
        .map(|(_, folder)| {
            let children = assemble(groups, Some(folder.id.as_str().to_string()));
            folder.with_children(children)
        })
        .collect()
}

/// Append `action` to the history table and keep only the newest `keep` rows.
fn append_history(store: &mut RecordStore, action: &HistoryAction, keep: usize) -> Result<()> {
    let mut body = serde_json::to_value(action).context("failed to encode history action")?;
    if let Value::Object(map) = &mut body {
        if let Some(action_id) = map.remove("id") {
            map.insert("actionId".to_string(), action_id);
        }
    }
    store.create(Table::History, body)?;

    let rows = store.get_all(Table::History)?;
    let excess = rows.len().saturating_sub(keep.max(1));
    for row in rows.iter().take(excess) {
        if let Some(key) = row.get("id").and_then(|id| RecordKey::from_json(Table::History, id)) {
            store.delete(Table::History, &key)?;
        }
    }
    Ok(())
}
