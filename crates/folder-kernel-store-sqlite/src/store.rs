use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::schema::{self, SchemaStatus, Table};

/// Primary key of a record: a text id or an auto-increment integer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Interpret a JSON key value for `table`.
    #[must_use]
    pub fn from_json(table: Table, value: &Value) -> Option<Self> {
        match (table.is_auto_increment(), value) {
            (true, Value::Number(number)) => number.as_i64().map(Self::Int),
            (true, Value::String(text)) => text.parse().ok().map(Self::Int),
            (false, Value::String(text)) => Some(Self::Text(text.clone())),
            (false, Value::Number(number)) => Some(Self::Text(number.to_string())),
            _ => None,
        }
    }

    /// Interpret a key typed on a command line for `table`.
    #[must_use]
    pub fn parse_for(table: Table, raw: &str) -> Option<Self> {
        if table.is_auto_increment() {
            raw.parse().ok().map(Self::Int)
        } else {
            Some(Self::Text(raw.to_string()))
        }
    }

    fn to_sql(&self) -> SqlValue {
        match self {
            Self::Int(value) => SqlValue::Integer(*value),
            Self::Text(value) => SqlValue::Text(value.clone()),
        }
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: usize,
    pub schema_status: SchemaStatus,
}

/// Table-oriented store over a single `SQLite` connection.
///
/// The handle is caller-owned: `open` connects, `initialize` applies the
/// schema and makes the store usable, `close` drops the connection. Every
/// data operation fails with [`StoreError::NotInitialized`] outside that
/// window.
pub struct RecordStore {
    location: PathBuf,
    conn: Option<Connection>,
    initialized: bool,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("location", &self.location)
            .field("open", &self.conn.is_some())
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl RecordStore {
    /// Open a `SQLite` database file and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for {}", path.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        Self::configure(conn, path.to_path_buf())
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error when `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::configure(conn, PathBuf::from(":memory:"))
    }

    fn configure(conn: Connection, location: PathBuf) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;
        tracing::debug!(location = %location.display(), "record store opened");
        Ok(Self { location, conn: Some(conn), initialized: false })
    }

    /// Apply pending schema migrations. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns [`StoreError::NotInitialized`] after `close`, or an error when a migration fails.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let conn = self.conn.as_mut().ok_or(StoreError::NotInitialized)?;
        schema::migrate(conn)?;
        self.initialized = true;
        tracing::info!(location = %self.location.display(), "record store initialized");
        Ok(())
    }

    /// Drop the connection; every later call fails with `NotInitialized`.
    ///
    /// # Errors
    /// Returns an error when `SQLite` refuses to close the connection.
    pub fn close(&mut self) -> Result<()> {
        self.initialized = false;
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| err).context("failed to close sqlite connection")?;
            tracing::info!(location = %self.location.display(), "record store closed");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized && self.conn.is_some()
    }

    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    fn conn(&self) -> Result<&Connection> {
        match (&self.conn, self.initialized) {
            (Some(conn), true) => Ok(conn),
            _ => Err(StoreError::NotInitialized.into()),
        }
    }

    /// Insert a new record; `createdAt` is kept when present and `updatedAt`
    /// is refreshed. Auto-increment keys are written back into `id`.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized, the body is not an
    /// object, its key field is missing, or the key already exists.
    pub fn create(&mut self, table: Table, data: Value) -> Result<RecordKey> {
        let conn = self.conn()?;
        let mut body = into_object(table, data)?;
        let now = folder_kernel_core::now_rfc3339();
        let created_at = stamp(&mut body, &now, None);

        let key = match table.key_field() {
            Some(field) => {
                let key = key_from_body(table, field, &body)?;
                conn.execute(
                    &format!(
                        "INSERT INTO {}(record_key, created_at, updated_at, body_json) VALUES (?1, ?2, ?3, ?4)",
                        table.sql_name()
                    ),
                    params![key.to_sql(), created_at, now, Value::Object(body).to_string()],
                )
                .with_context(|| format!("failed to insert {} record {key}", table.as_str()))?;
                key
            }
            None => {
                let explicit = body.get("id").and_then(|id| RecordKey::from_json(table, id));
                if let Some(RecordKey::Int(id)) = explicit {
                    conn.execute(
                        &format!(
                            "INSERT INTO {}(record_key, created_at, updated_at, body_json) VALUES (?1, ?2, ?3, ?4)",
                            table.sql_name()
                        ),
                        params![id, created_at, now, Value::Object(body).to_string()],
                    )
                    .with_context(|| format!("failed to insert {} record {id}", table.as_str()))?;
                    RecordKey::Int(id)
                } else {
                    body.remove("id");
                    conn.execute(
                        &format!(
                            "INSERT INTO {}(created_at, updated_at, body_json) VALUES (?1, ?2, ?3)",
                            table.sql_name()
                        ),
                        params![created_at, now, Value::Object(body.clone()).to_string()],
                    )
                    .with_context(|| format!("failed to insert {} record", table.as_str()))?;
                    let id = conn.last_insert_rowid();
                    body.insert("id".to_string(), Value::from(id));
                    conn.execute(
                        &format!("UPDATE {} SET body_json = ?1 WHERE record_key = ?2", table.sql_name()),
                        params![Value::Object(body).to_string(), id],
                    )
                    .with_context(|| format!("failed to write key back into {} record {id}", table.as_str()))?;
                    RecordKey::Int(id)
                }
            }
        };

        Ok(key)
    }

    /// Fetch one record; a missing key is `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the row cannot be decoded.
    pub fn read(&self, table: Table, key: &RecordKey) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body_json FROM {} WHERE record_key = ?1", table.sql_name()),
                params![key.to_sql()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read {} record {key}", table.as_str()))?;
        body.map(|body| decode_body(table, &body)).transpose()
    }

    /// Overwrite a record by its key, inserting it when absent. The original
    /// `createdAt` of an existing record is preserved.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the body carries no key.
    pub fn update(&mut self, table: Table, data: Value) -> Result<RecordKey> {
        let conn = self.conn()?;
        let mut body = into_object(table, data)?;
        let field = table.key_field().unwrap_or("id");
        let key = key_from_body(table, field, &body)?;

        let existing_created_at: Option<String> = conn
            .query_row(
                &format!("SELECT created_at FROM {} WHERE record_key = ?1", table.sql_name()),
                params![key.to_sql()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to look up {} record {key}", table.as_str()))?;

        let now = folder_kernel_core::now_rfc3339();
        let created_at = stamp(&mut body, &now, existing_created_at);
        conn.execute(
            &format!(
                "INSERT INTO {}(record_key, created_at, updated_at, body_json) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(record_key) DO UPDATE SET
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   body_json = excluded.body_json",
                table.sql_name()
            ),
            params![key.to_sql(), created_at, now, Value::Object(body).to_string()],
        )
        .with_context(|| format!("failed to upsert {} record {key}", table.as_str()))?;

        Ok(key)
    }

    /// Write a record exactly as given, inserting or overwriting by key.
    /// Unlike [`RecordStore::update`], `createdAt` and `updatedAt` already in
    /// the body are kept and only filled in when missing. Auto-increment
    /// bodies without an `id` are inserted through [`RecordStore::create`].
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the body carries no key.
    pub fn put_verbatim(&mut self, table: Table, data: Value) -> Result<RecordKey> {
        let mut body = into_object(table, data)?;
        let field = table.key_field().unwrap_or("id");
        if table.is_auto_increment() && !body.contains_key(field) {
            return self.create(table, Value::Object(body));
        }
        let key = key_from_body(table, field, &body)?;
        let conn = self.conn()?;

        let now = folder_kernel_core::now_rfc3339();
        let created_at = body_timestamp(&body, "createdAt").unwrap_or_else(|| now.clone());
        let updated_at = body_timestamp(&body, "updatedAt").unwrap_or(now);
        body.insert("createdAt".to_string(), Value::String(created_at.clone()));
        body.insert("updatedAt".to_string(), Value::String(updated_at.clone()));
        conn.execute(
            &format!(
                "INSERT INTO {}(record_key, created_at, updated_at, body_json) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(record_key) DO UPDATE SET
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   body_json = excluded.body_json",
                table.sql_name()
            ),
            params![key.to_sql(), created_at, updated_at, Value::Object(body).to_string()],
        )
        .with_context(|| format!("failed to write {} record {key}", table.as_str()))?;

        Ok(key)
    }

    /// Remove a record. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the delete fails.
    pub fn delete(&mut self, table: Table, key: &RecordKey) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE record_key = ?1", table.sql_name()),
            params![key.to_sql()],
        )
        .with_context(|| format!("failed to delete {} record {key}", table.as_str()))?;
        Ok(())
    }

    /// Every record of a table, in key order.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or a row cannot be decoded.
    pub fn get_all(&self, table: Table) -> Result<Vec<Value>> {
        self.query_bodies(
            table,
            &format!("SELECT body_json FROM {} ORDER BY record_key", table.sql_name()),
            &[],
        )
    }

    /// Exact-match lookup through a named secondary index.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownIndex`] when the table has no such index.
    pub fn search_by_index(&self, table: Table, index: &str, value: &Value) -> Result<Vec<Value>> {
        let expression = index_expression(table, index)?;
        self.query_bodies(
            table,
            &format!(
                "SELECT body_json FROM {} WHERE {expression} = ?1 ORDER BY record_key",
                table.sql_name()
            ),
            &[json_to_sql(value)],
        )
    }

    /// Inclusive range lookup through a named secondary index.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownIndex`] when the table has no such index.
    pub fn search_by_range(
        &self,
        table: Table,
        index: &str,
        low: &Value,
        high: &Value,
    ) -> Result<Vec<Value>> {
        let expression = index_expression(table, index)?;
        self.query_bodies(
            table,
            &format!(
                "SELECT body_json FROM {} WHERE {expression} BETWEEN ?1 AND ?2 ORDER BY {expression}, record_key",
                table.sql_name()
            ),
            &[json_to_sql(low), json_to_sql(high)],
        )
    }

    /// Remove every record of a table.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the delete fails.
    pub fn clear(&mut self, table: Table) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(&format!("DELETE FROM {}", table.sql_name()), [])
            .with_context(|| format!("failed to clear table {}", table.as_str()))
    }

    /// Number of records in a table.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or the count fails.
    pub fn count(&self, table: Table) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table.sql_name()), [], |row| row.get(0))
            .with_context(|| format!("failed to count table {}", table.as_str()))?;
        usize::try_from(count).context("record count does not fit in usize")
    }

    /// Current and target schema versions.
    ///
    /// # Errors
    /// Returns an error when the connection is closed or metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let conn = self.conn.as_ref().ok_or(StoreError::NotInitialized)?;
        schema::schema_status(conn)
    }

    /// Run quick-check, foreign-key-check, and schema status probes.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or a probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let conn = self.conn()?;
        let quick_check_message: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt =
            conn.prepare("PRAGMA foreign_key_check").context("failed to prepare PRAGMA foreign_key_check")?;
        let mut rows = stmt.query([])?;
        let mut foreign_key_violations = 0_usize;
        while rows.next()?.is_some() {
            foreign_key_violations += 1;
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status: self.schema_status()?,
        })
    }

    fn query_bodies(&self, table: Table, sql: &str, args: &[SqlValue]) -> Result<Vec<Value>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(sql).with_context(|| format!("failed to prepare query on {}", table.as_str()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| row.get::<_, String>(0))
            .with_context(|| format!("failed to query {}", table.as_str()))?;

        let mut bodies = Vec::new();
        for row in rows {
            bodies.push(decode_body(table, &row?)?);
        }
        Ok(bodies)
    }
}

fn into_object(table: Table, data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject(table.as_str().to_string()).into()),
    }
}

fn key_from_body(table: Table, field: &str, body: &Map<String, Value>) -> Result<RecordKey> {
    body.get(field).and_then(|value| RecordKey::from_json(table, value)).ok_or_else(|| {
        StoreError::MissingKey { table: table.as_str().to_string(), field: field.to_string() }.into()
    })
}

/// Set `createdAt`/`updatedAt` on a body and return the effective creation time.
fn stamp(body: &mut Map<String, Value>, now: &str, existing: Option<String>) -> String {
    let created_at = existing
        .or_else(|| body.get("createdAt").and_then(Value::as_str).map(str::to_string))
        .filter(|created_at| !created_at.is_empty())
        .unwrap_or_else(|| now.to_string());
    body.insert("createdAt".to_string(), Value::String(created_at.clone()));
    body.insert("updatedAt".to_string(), Value::String(now.to_string()));
    created_at
}

fn body_timestamp(body: &Map<String, Value>, field: &str) -> Option<String> {
    body.get(field).and_then(Value::as_str).filter(|value| !value.is_empty()).map(str::to_string)
}

fn decode_body(table: Table, body: &str) -> Result<Value> {
    serde_json::from_str(body)
        .with_context(|| format!("failed to decode stored {} record body", table.as_str()))
}

fn index_expression(table: Table, index: &str) -> Result<String> {
    if !table.has_index(index) {
        return Err(StoreError::UnknownIndex {
            table: table.as_str().to_string(),
            index: index.to_string(),
        }
        .into());
    }
    Ok(format!("json_extract(body_json, '$.{index}')"))
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Parse an RFC 3339 timestamp for ordering; unparseable values sort first.
pub(crate) fn timestamp_order(value: &str) -> i128 {
    time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_or(i128::MIN, time::OffsetDateTime::unix_timestamp_nanos)
}

pub(crate) fn missing_record(table: Table, key: &RecordKey) -> anyhow::Error {
    anyhow!("{} record {key} not found", table.as_str())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::is_not_initialized;

    fn store() -> Result<RecordStore> {
        let mut store = RecordStore::open_in_memory()?;
        store.initialize()?;
        Ok(store)
    }

    #[test]
    fn operations_fail_before_initialize_and_after_close() -> Result<()> {
        let mut store = RecordStore::open_in_memory()?;
        let err = store
            .get_all(Table::Folders)
            .err()
            .ok_or_else(|| anyhow!("expected NotInitialized before initialize"))?;
        assert!(is_not_initialized(&err));

        store.initialize()?;
        store.initialize()?;
        assert!(store.is_initialized());
        store.create(Table::Folders, json!({"id": "a", "name": "A"}))?;

        store.close()?;
        let err = store
            .read(Table::Folders, &RecordKey::Text("a".into()))
            .err()
            .ok_or_else(|| anyhow!("expected NotInitialized after close"))?;
        assert!(is_not_initialized(&err));
        Ok(())
    }

    #[test]
    fn create_stamps_timestamps_and_update_preserves_created_at() -> Result<()> {
        let mut store = store()?;
        let key = store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        assert_eq!(key, RecordKey::Text("a".into()));

        let first = store.read(Table::Folders, &key)?.ok_or_else(|| anyhow!("missing record"))?;
        let created_at = first["createdAt"].clone();
        assert!(created_at.is_string());
        assert!(first["updatedAt"].is_string());

        store.update(
            Table::Folders,
            json!({"id": "a", "name": "Accounting", "createdAt": "1999-01-01T00:00:00Z"}),
        )?;
        let second = store.read(Table::Folders, &key)?.ok_or_else(|| anyhow!("missing record"))?;
        assert_eq!(second["name"], "Accounting");
        assert_eq!(second["createdAt"], created_at);
        Ok(())
    }

    #[test]
    fn put_verbatim_keeps_body_timestamps() -> Result<()> {
        let mut store = store()?;
        let body = json!({
            "id": "a",
            "name": "Finance",
            "createdAt": "2020-01-01T00:00:00Z",
            "updatedAt": "2020-01-02T00:00:00Z",
        });
        let key = store.put_verbatim(Table::Folders, body.clone())?;
        store.put_verbatim(Table::Folders, body.clone())?;
        assert_eq!(store.read(Table::Folders, &key)?, Some(body));

        let history = store.put_verbatim(Table::History, json!({"id": 7, "type": "CREATE"}))?;
        assert_eq!(history, RecordKey::Int(7));
        let fresh = store.put_verbatim(Table::History, json!({"type": "DELETE"}))?;
        assert_eq!(fresh, RecordKey::Int(8));

        let stamped = store.put_verbatim(Table::Settings, json!({"key": "theme"}))?;
        let stored = store.read(Table::Settings, &stamped)?.ok_or_else(|| anyhow!("missing record"))?;
        assert!(stored["updatedAt"].is_string());
        Ok(())
    }

    #[test]
    fn update_inserts_when_missing_and_delete_is_idempotent() -> Result<()> {
        let mut store = store()?;
        store.update(Table::Settings, json!({"key": "theme", "value": "dark"}))?;
        assert_eq!(store.count(Table::Settings)?, 1);

        let key = RecordKey::Text("theme".into());
        store.delete(Table::Settings, &key)?;
        store.delete(Table::Settings, &key)?;
        assert_eq!(store.read(Table::Settings, &key)?, None);
        Ok(())
    }

    #[test]
    fn auto_increment_key_is_written_back_into_body() -> Result<()> {
        let mut store = store()?;
        let first = store.create(Table::History, json!({"type": "CREATE", "timestamp": "t1"}))?;
        let second = store.create(Table::History, json!({"type": "DELETE", "timestamp": "t2"}))?;
        assert_eq!(first, RecordKey::Int(1));
        assert_eq!(second, RecordKey::Int(2));

        let body = store.read(Table::History, &second)?.ok_or_else(|| anyhow!("missing record"))?;
        assert_eq!(body["id"], 2);
        Ok(())
    }

    #[test]
    fn create_rejects_missing_key_and_duplicates() -> Result<()> {
        let mut store = store()?;
        let err = store
            .create(Table::Folders, json!({"name": "no id"}))
            .err()
            .ok_or_else(|| anyhow!("expected missing key error"))?;
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::MissingKey { .. })));

        store.create(Table::Folders, json!({"id": "a", "name": "A"}))?;
        assert!(store.create(Table::Folders, json!({"id": "a", "name": "A again"})).is_err());
        Ok(())
    }

    #[test]
    fn index_and_range_lookups() -> Result<()> {
        let mut store = store()?;
        store.create(Table::Folders, json!({"id": "a", "name": "A", "parentId": null, "responsible": "Dana"}))?;
        store.create(Table::Folders, json!({"id": "b", "name": "B", "parentId": "a", "responsible": "Lee"}))?;
        store.create(Table::Folders, json!({"id": "c", "name": "C", "parentId": "a", "responsible": "Dana"}))?;

        let children = store.search_by_index(Table::Folders, "parentId", &json!("a"))?;
        assert_eq!(children.len(), 2);

        let dana = store.search_by_index(Table::Folders, "responsible", &json!("Dana"))?;
        let ids: Vec<&str> = dana.iter().filter_map(|body| body["id"].as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let range = store.search_by_range(Table::Folders, "name", &json!("B"), &json!("C"))?;
        let names: Vec<&str> = range.iter().filter_map(|body| body["name"].as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);

        let err = store
            .search_by_index(Table::Settings, "name", &json!("x"))
            .err()
            .ok_or_else(|| anyhow!("expected unknown index"))?;
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::UnknownIndex { .. })));
        Ok(())
    }

    #[test]
    fn boolean_index_matches_json_true() -> Result<()> {
        let mut store = store()?;
        store.update(Table::LegacyMigrations, json!({"key": "appTitle", "validated": true}))?;
        store.update(Table::LegacyMigrations, json!({"key": "appLogo", "validated": false}))?;
        let validated = store.search_by_index(Table::LegacyMigrations, "validated", &json!(true))?;
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0]["key"], "appTitle");
        Ok(())
    }

    #[test]
    fn clear_and_integrity_check() -> Result<()> {
        let mut store = store()?;
        store.create(Table::Layouts, json!({"id": "grid"}))?;
        assert_eq!(store.clear(Table::Layouts)?, 1);
        assert_eq!(store.count(Table::Layouts)?, 0);

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert_eq!(report.foreign_key_violations, 0);
        assert!(report.schema_status.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn file_backed_store_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("kernel.sqlite3");
        {
            let mut store = RecordStore::open(&path)?;
            store.initialize()?;
            store.create(Table::Favorites, json!({"id": "fav-1", "folderId": "a"}))?;
            store.close()?;
        }
        let mut store = RecordStore::open(&path)?;
        store.initialize()?;
        let favorites = store.search_by_index(Table::Favorites, "folderId", &json!("a"))?;
        assert_eq!(favorites.len(), 1);
        Ok(())
    }
}
