//! `SQLite` persistence for the folder taxonomy kernel.
//!
//! [`RecordStore`] provides timestamped CRUD and indexed lookup over named
//! logical tables. [`BackupEngine`] snapshots and restores the managed
//! tables, [`MigrationPipeline`] moves data out of a [`LegacyStore`], and
//! the `export` module reads and writes standalone backup files.

pub mod backup;
pub mod error;
pub mod export;
pub mod legacy;
pub mod migration;
pub mod schema;
pub mod search;
pub mod store;

pub use backup::{
    BackupEngine, BackupIssue, BackupRecord, BackupType, VerificationReport, DEFAULT_MAX_BACKUPS,
    MANAGED_TABLES,
};
pub use error::{is_not_initialized, StoreError};
pub use export::{export_backup, import_backup, BackupFile, ImportOutcome};
pub use legacy::{JsonFileLegacyStore, LegacyStore, MemoryLegacyStore, LEGACY_KEYS};
pub use migration::{
    MigrationPipeline, MigrationRecord, MigrationResult, MigrationStatus, MigrationStep,
    SafetyCheck,
};
pub use schema::{SchemaStatus, Table, LATEST_SCHEMA_VERSION};
pub use search::SearchHit;
pub use store::{IntegrityReport, RecordKey, RecordStore};
