use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const LATEST_SCHEMA_VERSION: i64 = 3;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS folders (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS favorites (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS layouts (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS history (
  record_key INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monitoring (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backups (
  record_key INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_sync (
  record_key INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search_index (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_folders_name ON folders(json_extract(body_json, '$.name'));
CREATE INDEX IF NOT EXISTS idx_folders_responsible ON folders(json_extract(body_json, '$.responsible'));
CREATE INDEX IF NOT EXISTS idx_folders_parent_id ON folders(json_extract(body_json, '$.parentId'));
CREATE INDEX IF NOT EXISTS idx_folders_updated_at ON folders(json_extract(body_json, '$.updatedAt'));
CREATE INDEX IF NOT EXISTS idx_favorites_folder_id ON favorites(json_extract(body_json, '$.folderId'));
CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(json_extract(body_json, '$.timestamp'));
CREATE INDEX IF NOT EXISTS idx_history_type ON history(json_extract(body_json, '$.type'));
CREATE INDEX IF NOT EXISTS idx_monitoring_folder_id ON monitoring(json_extract(body_json, '$.folderId'));
CREATE INDEX IF NOT EXISTS idx_backups_type ON backups(json_extract(body_json, '$.type'));
CREATE INDEX IF NOT EXISTS idx_pending_sync_timestamp ON pending_sync(json_extract(body_json, '$.timestamp'));
CREATE INDEX IF NOT EXISTS idx_search_index_term ON search_index(json_extract(body_json, '$.term'));
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS legacy_migrations (
  record_key TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_legacy_migrations_validated ON legacy_migrations(json_extract(body_json, '$.validated'));
CREATE INDEX IF NOT EXISTS idx_legacy_migrations_migrated_at ON legacy_migrations(json_extract(body_json, '$.migratedAt'));
CREATE INDEX IF NOT EXISTS idx_backups_timestamp ON backups(json_extract(body_json, '$.timestamp'));
";

const MIGRATION_003_SQL: &str = r"
CREATE TABLE IF NOT EXISTS migration_backups (
  record_key INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_migration_backups_timestamp ON migration_backups(json_extract(body_json, '$.timestamp'));
";

/// Logical tables of the record store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "camelCase")]
pub enum Table {
    Folders,
    Favorites,
    Settings,
    Layouts,
    History,
    Monitoring,
    Backups,
    PendingSync,
    SearchIndex,
    LegacyMigrations,
    MigrationBackups,
}

impl Table {
    pub const ALL: [Table; 11] = [
        Table::Folders,
        Table::Favorites,
        Table::Settings,
        Table::Layouts,
        Table::History,
        Table::Monitoring,
        Table::Backups,
        Table::PendingSync,
        Table::SearchIndex,
        Table::LegacyMigrations,
        Table::MigrationBackups,
    ];

    /// Logical name used by callers and inside backup snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folders => "folders",
            Self::Favorites => "favorites",
            Self::Settings => "settings",
            Self::Layouts => "layouts",
            Self::History => "history",
            Self::Monitoring => "monitoring",
            Self::Backups => "backups",
            Self::PendingSync => "pendingSync",
            Self::SearchIndex => "searchIndex",
            Self::LegacyMigrations => "legacyMigrations",
            Self::MigrationBackups => "migrationBackups",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.as_str() == value)
    }

    pub(crate) fn sql_name(self) -> &'static str {
        match self {
            Self::PendingSync => "pending_sync",
            Self::SearchIndex => "search_index",
            Self::LegacyMigrations => "legacy_migrations",
            Self::MigrationBackups => "migration_backups",
            other => other.as_str(),
        }
    }

    /// Body field holding the primary key, or `None` for auto-increment tables.
    #[must_use]
    pub fn key_field(self) -> Option<&'static str> {
        match self {
            Self::Settings | Self::LegacyMigrations => Some("key"),
            Self::History | Self::Backups | Self::PendingSync | Self::MigrationBackups => None,
            Self::Folders | Self::Favorites | Self::Layouts | Self::Monitoring | Self::SearchIndex => {
                Some("id")
            }
        }
    }

    #[must_use]
    pub fn is_auto_increment(self) -> bool {
        self.key_field().is_none()
    }

    /// Named secondary indexes; each name is also the JSON body field it covers.
    #[must_use]
    pub fn indexes(self) -> &'static [&'static str] {
        match self {
            Self::Folders => &["name", "responsible", "parentId", "updatedAt"],
            Self::Favorites | Self::Monitoring => &["folderId"],
            Self::History | Self::Backups => &["timestamp", "type"],
            Self::PendingSync | Self::MigrationBackups => &["timestamp"],
            Self::SearchIndex => &["term"],
            Self::LegacyMigrations => &["validated", "migratedAt"],
            Self::Settings | Self::Layouts => &[],
        }
    }

    #[must_use]
    pub fn has_index(self, index: &str) -> bool {
        self.indexes().contains(&index)
    }
}

impl std::str::FromStr for Table {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| StoreError::UnknownTable(value.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// Report current and target schema versions without applying anything.
///
/// # Errors
/// Returns an error when schema metadata cannot be read.
pub fn schema_status(conn: &Connection) -> Result<SchemaStatus> {
    conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
        .context("failed to apply schema_migrations table")?;
    let current_version = current_schema_version(conn)?;
    let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
        ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
}

/// Apply every pending schema version, each in its own transaction.
///
/// # Errors
/// Returns an error when any migration step fails or the database is newer
/// than this build supports.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
        .context("failed to apply schema_migrations table")?;

    let mut version = current_schema_version(conn)?;
    if version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
        ));
    }

    while version < LATEST_SCHEMA_VERSION {
        let next = version + 1;
        let sql = match next {
            1 => MIGRATION_001_SQL,
            2 => MIGRATION_002_SQL,
            3 => MIGRATION_003_SQL,
            other => return Err(anyhow!("no migration defined for schema version {other}")),
        };

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply schema migration {next}"))?;
        record_schema_version(&tx, next)?;
        tx.commit().with_context(|| format!("failed to commit schema migration {next}"))?;

        tracing::info!(version = next, "applied record store schema migration");
        version = next;
    }

    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = folder_kernel_core::now_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reports_all_versions_pending() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        let status = schema_status(&conn)?;
        assert_eq!(status.current_version, 0);
        assert_eq!(status.pending_versions, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent_and_creates_every_table() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        migrate(&mut conn)?;

        let status = schema_status(&conn)?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        for table in Table::ALL {
            assert!(table_exists(&conn, table.sql_name())?, "missing table {}", table.as_str());
        }
        Ok(())
    }

    #[test]
    fn version_one_database_upgrades_to_latest() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        conn.execute_batch(MIGRATION_001_SQL)?;
        record_schema_version(&conn, 1)?;
        assert!(!table_exists(&conn, "legacy_migrations")?);

        migrate(&mut conn)?;
        assert!(table_exists(&conn, "legacy_migrations")?);
        assert!(table_exists(&conn, "migration_backups")?);
        assert_eq!(schema_status(&conn)?.current_version, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::parse(table.as_str()), Some(table));
        }
        assert_eq!(Table::parse("nope"), None);
        assert_eq!("nope".parse::<Table>(), Err(StoreError::UnknownTable("nope".to_string())));
        assert_eq!("migrationBackups".parse::<Table>(), Ok(Table::MigrationBackups));
        assert!(Table::Folders.has_index("parentId"));
        assert!(!Table::Settings.has_index("name"));
        assert!(Table::Backups.is_auto_increment());
    }
}
