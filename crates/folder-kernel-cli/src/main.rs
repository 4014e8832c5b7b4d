use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use folder_kernel_api::{FolderFormat, FolderKernel, KernelConfig};
use folder_kernel_core::{Folder, FolderId};
use folder_kernel_store_sqlite::{BackupRecord, RecordKey, RecordStore, Table};
use serde_json::{json, Value};

mod logging;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "fk")]
#[command(about = "Folder Kernel CLI")]
struct Cli {
    /// Database file; overrides the config file.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Legacy flat store (a JSON object of strings); overrides the config file.
    #[arg(long)]
    legacy: Option<PathBuf>,

    /// YAML config file. Missing files fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Record {
        #[command(subcommand)]
        command: Box<RecordCommand>,
    },
    /// Weighted full-text search over folders.
    Search(SearchArgs),
    Folders {
        #[command(subcommand)]
        command: Box<FoldersCommand>,
    },
    Backup {
        #[command(subcommand)]
        command: Box<BackupCommand>,
    },
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
    Health,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Init,
    SchemaVersion,
    IntegrityCheck,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    /// Insert or overwrite a record given as a JSON object.
    Put(RecordPutArgs),
    Get(RecordKeyArgs),
    Delete(RecordKeyArgs),
    List(TableArgs),
    SearchIndex(SearchIndexArgs),
    SearchRange(SearchRangeArgs),
}

#[derive(Debug, Args)]
struct TableArgs {
    table: String,
}

#[derive(Debug, Args)]
struct RecordPutArgs {
    table: String,
    #[arg(long)]
    json: String,
}

#[derive(Debug, Args)]
struct RecordKeyArgs {
    table: String,
    key: String,
}

#[derive(Debug, Args)]
struct SearchIndexArgs {
    table: String,
    index: String,
    /// JSON literal, or a bare string.
    value: String,
}

#[derive(Debug, Args)]
struct SearchRangeArgs {
    table: String,
    index: String,
    low: String,
    high: String,
}

#[derive(Debug, Args)]
struct SearchArgs {
    term: String,
}

#[derive(Debug, Subcommand)]
enum FoldersCommand {
    Import(FoldersImportArgs),
    Export(FoldersExportArgs),
    Tree,
    Add(FoldersAddArgs),
    Delete { id: String },
    Move(FoldersMoveArgs),
}

#[derive(Debug, Args)]
struct FoldersImportArgs {
    #[arg(long, conflicts_with = "csv", required_unless_present = "csv")]
    json: Option<PathBuf>,
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long)]
    parent: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

impl From<ExportFormat> for FolderFormat {
    fn from(value: ExportFormat) -> Self {
        match value {
            ExportFormat::Json => Self::Json,
            ExportFormat::Csv => Self::Csv,
        }
    }
}

#[derive(Debug, Args)]
struct FoldersExportArgs {
    #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
    format: ExportFormat,
}

#[derive(Debug, Args)]
struct FoldersAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    responsible: Option<String>,
    #[arg(long, value_delimiter = ';')]
    tags: Vec<String>,
}

#[derive(Debug, Args)]
struct FoldersMoveArgs {
    id: String,
    /// New parent; omit to move to the top level.
    #[arg(long)]
    parent: Option<String>,
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    Create {
        #[arg(long)]
        description: Option<String>,
    },
    /// One automatic run; skipped when nothing changed.
    Auto,
    List,
    Restore {
        id: i64,
    },
    Verify,
    Prune,
    Export {
        id: i64,
        #[arg(long)]
        out: PathBuf,
    },
    Import {
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum MigrateCommand {
    Safety,
    Run,
    Key { key: String },
    Status,
    Rollback,
    Snapshot,
    Backups,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let mut kernel = FolderKernel::open(config)?;
    match cli.command {
        Command::Db { command } => run_db(&command, &kernel),
        Command::Record { command } => run_record(*command, &kernel),
        Command::Search(args) => {
            let hits = kernel.search(&args.term)?;
            emit_json(json!({ "term": args.term, "count": hits.len(), "hits": hits }))
        }
        Command::Folders { command } => run_folders(*command, &mut kernel),
        Command::Backup { command } => run_backup(*command, &mut kernel),
        Command::Migrate { command } => run_migrate(&command, &mut kernel),
        Command::Health => {
            let report = kernel.health_check();
            emit_json(serde_json::to_value(&report).context("failed to serialize health report")?)
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<KernelConfig> {
    let mut config = KernelConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database_path.clone_from(db);
    }
    if let Some(legacy) = &cli.legacy {
        config.legacy_path.clone_from(legacy);
    }
    Ok(config)
}

fn run_db(command: &DbCommand, kernel: &FolderKernel) -> Result<()> {
    match command {
        DbCommand::Init | DbCommand::SchemaVersion => {
            let status = kernel.with_store(|store| store.schema_status())?;
            emit_json(json!({
                "database": kernel.config().database_path,
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = kernel.with_store(|store| store.integrity_check())?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn run_record(command: RecordCommand, kernel: &FolderKernel) -> Result<()> {
    match command {
        RecordCommand::Put(args) => {
            let table = parse_table(&args.table)?;
            let body: Value = serde_json::from_str(&args.json).context("--json is not valid JSON")?;
            let key = kernel.with_store(|store| put_record(store, table, body))?;
            emit_json(json!({ "table": table.as_str(), "key": key }))
        }
        RecordCommand::Get(args) => {
            let table = parse_table(&args.table)?;
            let key = parse_key(table, &args.key)?;
            let record = kernel.with_store(|store| store.read(table, &key))?;
            emit_json(json!({
                "table": table.as_str(),
                "key": key,
                "found": record.is_some(),
                "record": record
            }))
        }
        RecordCommand::Delete(args) => {
            let table = parse_table(&args.table)?;
            let key = parse_key(table, &args.key)?;
            kernel.with_store(|store| store.delete(table, &key))?;
            emit_json(json!({ "table": table.as_str(), "key": key, "deleted": true }))
        }
        RecordCommand::List(args) => {
            let table = parse_table(&args.table)?;
            let records = kernel.with_store(|store| store.get_all(table))?;
            emit_json(json!({ "table": table.as_str(), "count": records.len(), "records": records }))
        }
        RecordCommand::SearchIndex(args) => {
            let table = parse_table(&args.table)?;
            let value = parse_json_arg(&args.value);
            let records = kernel.with_store(|store| store.search_by_index(table, &args.index, &value))?;
            emit_json(json!({
                "table": table.as_str(),
                "index": args.index,
                "count": records.len(),
                "records": records
            }))
        }
        RecordCommand::SearchRange(args) => {
            let table = parse_table(&args.table)?;
            let low = parse_json_arg(&args.low);
            let high = parse_json_arg(&args.high);
            let records =
                kernel.with_store(|store| store.search_by_range(table, &args.index, &low, &high))?;
            emit_json(json!({
                "table": table.as_str(),
                "index": args.index,
                "count": records.len(),
                "records": records
            }))
        }
    }
}

fn run_folders(command: FoldersCommand, kernel: &mut FolderKernel) -> Result<()> {
    match command {
        FoldersCommand::Import(args) => {
            let (format, path) = match (args.json, args.csv) {
                (Some(path), _) => (FolderFormat::Json, path),
                (None, Some(path)) => (FolderFormat::Csv, path),
                (None, None) => return Err(anyhow!("one of --json or --csv is required")),
            };
            let input = fs::read_to_string(&path)
                .with_context(|| format!("failed to read import file {}", path.display()))?;
            let parent = args.parent.map(FolderId::from);
            let summary = kernel.import_folders(format, &input, parent.as_ref())?;
            emit_json(json!({
                "format": format.as_str(),
                "source": path,
                "summary": summary,
                "total_folders": kernel.tree().len()
            }))
        }
        FoldersCommand::Export(args) => {
            let format = FolderFormat::from(args.format);
            let rendered = kernel.export_folders(format)?;
            let content = match format {
                FolderFormat::Json => serde_json::from_str(&rendered).context("exported JSON is malformed")?,
                FolderFormat::Csv => Value::String(rendered),
            };
            emit_json(json!({ "format": format.as_str(), "content": content }))
        }
        FoldersCommand::Tree => emit_tree(kernel),
        FoldersCommand::Add(args) => {
            let id = args.id.map_or_else(FolderId::generate, FolderId::from);
            let mut folder = Folder::new(id, args.name);
            folder.color = args.color.unwrap_or_default();
            folder.responsible = args.responsible.unwrap_or_default();
            folder.set_tags(&args.tags);
            let folder_id = folder.id.clone();
            let parent = args.parent.map(FolderId::from);
            let action_id = kernel.create_folder(folder, parent.as_ref())?;
            emit_json(json!({ "action_id": action_id, "folder_id": folder_id }))
        }
        FoldersCommand::Delete { id } => {
            let action_id = kernel.delete_folder(&FolderId::from(id.as_str()))?;
            emit_json(json!({ "action_id": action_id, "folder_id": id }))
        }
        FoldersCommand::Move(args) => {
            let parent = args.parent.map(FolderId::from);
            let action_id = kernel.move_folder(&FolderId::from(args.id.as_str()), parent.as_ref())?;
            emit_json(json!({ "action_id": action_id, "folder_id": args.id, "parent_id": parent }))
        }
    }
}

fn emit_tree(kernel: &FolderKernel) -> Result<()> {
    let folders = kernel.tree().to_folders();
    emit_json(json!({ "count": kernel.tree().len(), "folders": folders }))
}

fn run_backup(command: BackupCommand, kernel: &mut FolderKernel) -> Result<()> {
    match command {
        BackupCommand::Create { description } => {
            let id = kernel.create_backup(description.as_deref())?;
            emit_json(json!({ "backup_id": id, "type": "manual" }))
        }
        BackupCommand::Auto => {
            let outcome = kernel.run_auto_backup();
            emit_json(serde_json::to_value(&outcome).context("failed to serialize backup outcome")?)
        }
        BackupCommand::List => {
            let backups = kernel.list_backups()?;
            let summaries: Vec<Value> = backups.iter().map(backup_summary).collect();
            emit_json(json!({ "count": summaries.len(), "backups": summaries }))
        }
        BackupCommand::Restore { id } => {
            let restored = kernel.restore_backup(id)?;
            emit_json(json!({
                "backup_id": id,
                "restored": restored,
                "folders": kernel.tree().len()
            }))
        }
        BackupCommand::Verify => {
            let report = kernel.verify_backups()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize verification report")?)
        }
        BackupCommand::Prune => {
            let removed = kernel.prune_backups()?;
            emit_json(json!({ "removed": removed, "max_backups": kernel.config().backup.max_backups }))
        }
        BackupCommand::Export { id, out } => {
            let file = kernel.export_backup_file(id, &out)?;
            emit_json(json!({
                "backup_id": id,
                "out_file": out,
                "sha256": file.sha256,
                "export_version": file.export_version
            }))
        }
        BackupCommand::Import { file } => {
            let outcome = kernel.import_backup_file(&file)?;
            emit_json(json!({ "in_file": file, "outcome": outcome }))
        }
    }
}

fn backup_summary(backup: &BackupRecord) -> Value {
    let tables: serde_json::Map<String, Value> = backup
        .data
        .iter()
        .map(|(name, rows)| (name.clone(), Value::from(rows.as_array().map_or(0, Vec::len))))
        .collect();
    json!({
        "id": backup.id,
        "timestamp": backup.timestamp,
        "type": backup.kind,
        "description": backup.description,
        "checksum": backup.checksum,
        "tables": tables
    })
}

fn run_migrate(command: &MigrateCommand, kernel: &mut FolderKernel) -> Result<()> {
    let value = match command {
        MigrateCommand::Safety => serde_json::to_value(kernel.migration_safety())?,
        MigrateCommand::Run => serde_json::to_value(kernel.migrate_all())?,
        MigrateCommand::Key { key } => {
            let result = kernel.migrate_key(key);
            let state = kernel.migration_key_state(key)?;
            json!({ "key": key, "state": state, "result": result })
        }
        MigrateCommand::Status => serde_json::to_value(kernel.migration_status()?)?,
        MigrateCommand::Rollback => json!({ "removed": kernel.rollback_migration()? }),
        MigrateCommand::Snapshot => json!({ "backup_id": kernel.migration_snapshot()? }),
        MigrateCommand::Backups => {
            let backups: Vec<Value> = kernel
                .migration_backups()?
                .iter()
                .map(|backup| {
                    let keys =
                        backup.data.get("legacy").and_then(Value::as_object).map_or(0, serde_json::Map::len);
                    json!({
                        "id": backup.id,
                        "timestamp": backup.timestamp,
                        "description": backup.description,
                        "keys": keys
                    })
                })
                .collect();
            json!({ "count": backups.len(), "backups": backups })
        }
    };
    emit_json(value)
}

fn parse_table(raw: &str) -> Result<Table> {
    raw.parse::<Table>().with_context(|| {
        let known: Vec<&str> = Table::ALL.iter().map(|table| table.as_str()).collect();
        format!("expected one of: {}", known.join(", "))
    })
}

fn parse_key(table: Table, raw: &str) -> Result<RecordKey> {
    RecordKey::parse_for(table, raw)
        .ok_or_else(|| anyhow!("`{raw}` is not a valid key for table {}", table.as_str()))
}

fn parse_json_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Overwrite when the body names its key, otherwise insert (auto-increment tables).
fn put_record(store: &mut RecordStore, table: Table, body: Value) -> Result<RecordKey> {
    let field = table.key_field().unwrap_or("id");
    let has_key = body.get(field).is_some_and(|value| RecordKey::from_json(table, value).is_some());
    if has_key {
        store.update(table, body)
    } else {
        store.create(table, body)
    }
}
