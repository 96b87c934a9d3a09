//! Command-line entry point for category path transfers.
//!
//! # Responsibility
//! - Load activity records from a JSON file into a database.
//! - Run one transfer over an activity and print its summary.
//! - Print the category tree for inspection.

use cattransfer_core::db::open_db;
use cattransfer_core::{
    default_log_level, init_logging, ActivityId, CategoryId, SqliteActivityRepository,
    SqliteCategoryRepository, SqliteTransactionManager, TransactionManager, TransferConfig,
    TransferEngine, DEFAULT_ROOT_CATEGORY_ID,
};
use clap::{Parser, Subcommand};
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "cattransfer",
    version,
    about = "Transfer path-described categories from activity records"
)]
struct Cli {
    /// SQLite database file (created and migrated on first use)
    #[arg(long, value_name = "PATH")]
    db: PathBuf,

    /// Directory for rolling log files; logging stays off when omitted
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Load(LoadArgs),
    Transfer(TransferArgs),
    Tree(TreeArgs),
}

/// Create an activity and append records from a JSON array file
#[derive(Parser)]
struct LoadArgs {
    /// JSON file: `[{"entity_identifier": "...", "data": {...}}, ...]`
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Activity label
    #[arg(long, default_value = "import")]
    label: String,
}

/// Run one transfer over the records of an activity
#[derive(Parser)]
struct TransferArgs {
    /// Activity id returned by `load`
    #[arg(long)]
    activity: ActivityId,

    /// Transfer config JSON file
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// Transferor label used in logs and errors
    #[arg(long, default_value = "categories_by_path")]
    transferor: String,
}

/// Print the category subtree below a node
#[derive(Parser)]
struct TreeArgs {
    #[arg(long, default_value_t = DEFAULT_ROOT_CATEGORY_ID)]
    root: CategoryId,
}

#[derive(Deserialize)]
struct RecordInput {
    entity_identifier: String,
    #[serde(default)]
    data: Value,
}

fn main() {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = absolute_dir(log_dir).and_then(|dir| init_logging(level, &dir)) {
            eprintln!("logging init failed: {err}");
            std::process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Load(args) => run_load(&cli.db, args),
        Commands::Transfer(args) => run_transfer(&cli.db, args),
        Commands::Tree(args) => run_tree(&cli.db, args),
    };

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run_load(db: &Path, args: LoadArgs) -> Result<(), String> {
    let raw = std::fs::read_to_string(&args.input)
        .map_err(|err| format!("cannot read {}: {err}", args.input.display()))?;
    let records: Vec<RecordInput> = serde_json::from_str(&raw)
        .map_err(|err| format!("invalid records file {}: {err}", args.input.display()))?;

    let conn = open_db(db).map_err(|err| err.to_string())?;
    let activities = SqliteActivityRepository::try_new(&conn).map_err(|err| err.to_string())?;

    // The whole file loads atomically.
    let transactions = SqliteTransactionManager::new(&conn);
    transactions.begin().map_err(|err| err.to_string())?;
    let loaded = load_records(&activities, &args.label, &records);
    match loaded {
        Ok(activity_id) => {
            transactions.commit().map_err(|err| err.to_string())?;
            info!(
                "event=records_load module=cli status=ok activity_id={activity_id} records={}",
                records.len()
            );
            println!("activity_id={activity_id}");
            println!("records={}", records.len());
            Ok(())
        }
        Err(err) => match transactions.rollback() {
            Ok(()) => Err(err),
            Err(rollback_err) => Err(format!("{err}; rollback failed: {rollback_err}")),
        },
    }
}

fn load_records(
    activities: &SqliteActivityRepository<'_>,
    label: &str,
    records: &[RecordInput],
) -> Result<ActivityId, String> {
    let activity_id = activities
        .create_activity(label)
        .map_err(|err| err.to_string())?;
    for record in records {
        activities
            .append_record(activity_id, &record.entity_identifier, &record.data)
            .map_err(|err| err.to_string())?;
    }
    Ok(activity_id)
}

fn run_transfer(db: &Path, args: TransferArgs) -> Result<(), String> {
    let config = TransferConfig::load(&args.config).map_err(|err| err.to_string())?;
    let conn = open_db(db).map_err(|err| err.to_string())?;

    let activities = SqliteActivityRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let categories = SqliteCategoryRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let transactions = SqliteTransactionManager::new(&conn);

    let engine = TransferEngine::try_new(&activities, &categories, &transactions, &activities, config)
        .map_err(|err| err.to_string())?;
    let summary = engine
        .execute(args.activity, &args.transferor)
        .map_err(|err| err.to_string())?;

    println!("ok={}", summary.ok);
    println!("ko={}", summary.ko);
    Ok(())
}

fn run_tree(db: &Path, args: TreeArgs) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| err.to_string())?;
    let categories = SqliteCategoryRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let root = categories
        .get_node(args.root)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("category not found: {}", args.root))?;

    println!("{} [{}]", root.name, root.id);
    print_children(&categories, root.id, 1)
}

fn print_children(
    categories: &SqliteCategoryRepository<'_>,
    parent_id: CategoryId,
    depth: usize,
) -> Result<(), String> {
    for child in categories
        .list_children(parent_id)
        .map_err(|err| err.to_string())?
    {
        println!("{}{} [{}]", "  ".repeat(depth), child.name, child.id);
        print_children(categories, child.id, depth + 1)?;
    }
    Ok(())
}

fn absolute_dir(dir: &Path) -> Result<String, String> {
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| format!("cannot resolve current dir: {err}"))?
            .join(dir)
    };
    absolute
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| format!("log dir is not valid UTF-8: {}", absolute.display()))
}
