use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use filterdb_core::{FilterCompiler, FilterSpec, SchemaRegistry, SqlValue};
use filterdb_db::{DumpDocument, StoreConfig};
use filterdb_sqlite::{MigrationEngine, QueryExecutor, introspect, open_connection};
use rusqlite::Connection;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "filterdb")]
#[command(version, about = "Inspect, query, dump and restore filterdb databases")]
struct Cli {
    /// Database file. Overrides `database.path` from the config file.
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// YAML store configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output to stderr. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write schema and data as a JSON dump document.
    Dump(DumpArgs),
    /// Replay a dump document into the database.
    Restore(RestoreArgs),
    /// Print the SQL and bound values a filter spec compiles to.
    Compile(SpecArgs),
    /// Print the rows matching a filter spec as JSON.
    Query(SpecArgs),
    /// Print the number of rows matching a filter spec.
    Count(CountArgs),
    /// Delete the rows matching a filter spec.
    Delete(SpecArgs),
    /// Show the schema version ledger and table row counts.
    Status,
}

#[derive(Debug, Args)]
struct DumpArgs {
    /// Output file; a `.gz` suffix compresses it. Prints to stdout if omitted.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Dump document (`.json` or `.json.gz`).
    input: PathBuf,
}

#[derive(Debug, Args)]
struct SpecArgs {
    /// Table to search.
    table: String,
    /// Filter spec as JSON, or `@path` to read it from a file.
    spec: String,
}

#[derive(Debug, Args)]
struct CountArgs {
    /// Table to count.
    table: String,
    /// Filter spec as JSON, or `@path`. Counts every row if omitted.
    spec: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match load_config(cli.config.as_deref(), cli.database) {
        Ok(config) => match cli.command {
            Command::Dump(args) => run_dump(&config, args),
            Command::Restore(args) => run_restore(&config, args),
            Command::Compile(args) => run_compile(&config, args),
            Command::Query(args) => run_query(&config, args),
            Command::Count(args) => run_count(&config, args),
            Command::Delete(args) => run_delete(&config, args),
            Command::Status => run_status(&config),
        },
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("filterdb=debug,filterdb_core=debug,filterdb_sqlite=debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn load_config(config: Option<&Path>, database: Option<PathBuf>) -> Result<StoreConfig, String> {
    let mut store_config = match config {
        Some(path) => StoreConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => StoreConfig::default(),
    };
    if database.is_some() {
        store_config.database.path = database;
    }
    if store_config.database.path.is_none() {
        return Err(
            "No database given: pass --database or set database.path in --config".to_string(),
        );
    }
    Ok(store_config)
}

fn run_dump(config: &StoreConfig, args: DumpArgs) -> Result<(), String> {
    let conn = open(config)?;
    let document = filterdb_sqlite::dump(&conn).map_err(|e| format!("Dump failed: {e}"))?;
    match args.output {
        Some(path) => {
            document
                .save(&path)
                .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
            println!(
                "Dumped {} table(s), {} row(s) to '{}'.",
                document.tables.len(),
                document.row_count(),
                path.display()
            );
        }
        None => {
            let json = document
                .to_json_string()
                .map_err(|e| format!("JSON serialization failed: {e}"))?;
            println!("{json}");
        }
    }
    Ok(())
}

fn run_restore(config: &StoreConfig, args: RestoreArgs) -> Result<(), String> {
    let document = DumpDocument::load(&args.input)
        .map_err(|e| format!("Failed to read dump '{}': {e}", args.input.display()))?;
    let mut conn = open(config)?;
    let outcome =
        filterdb_sqlite::restore(&mut conn, &document).map_err(|e| format!("Restore failed: {e}"))?;

    let restored = document.data.len().saturating_sub(outcome.errors.len());
    println!("Restored {restored} of {} table(s).", document.data.len());
    if outcome.errors.is_empty() {
        return Ok(());
    }
    for (table, reason) in &outcome.errors {
        eprintln!("  {table}: {reason}");
    }
    Err(format!("{} table(s) failed to restore", outcome.errors.len()))
}

fn run_compile(config: &StoreConfig, args: SpecArgs) -> Result<(), String> {
    let conn = open(config)?;
    let registry = registry(config, &conn)?;
    let spec = parse_spec(&args.spec)?;
    let query = FilterCompiler::new(&registry)
        .compile_select(&args.table, &spec)
        .map_err(|e| e.to_string())?;
    println!("{}", query.sql);
    println!("{}", values_json(&query.values));
    Ok(())
}

fn run_query(config: &StoreConfig, args: SpecArgs) -> Result<(), String> {
    let conn = open(config)?;
    let registry = registry(config, &conn)?;
    let spec = parse_spec(&args.spec)?;
    let query = FilterCompiler::new(&registry)
        .compile_select(&args.table, &spec)
        .map_err(|e| e.to_string())?;
    let rows = QueryExecutor::new(&conn)
        .execute(&query)
        .map_err(|e| format!("Query failed: {e}"))?
        .into_records(&registry, &args.table);
    let json = serde_json::Value::Array(rows.iter().map(|r| r.to_json()).collect());
    let text =
        serde_json::to_string_pretty(&json).map_err(|e| format!("JSON serialization failed: {e}"))?;
    println!("{text}");
    Ok(())
}

fn run_count(config: &StoreConfig, args: CountArgs) -> Result<(), String> {
    let conn = open(config)?;
    let registry = registry(config, &conn)?;
    let spec = match &args.spec {
        Some(raw) => parse_spec(raw)?,
        None => FilterSpec::new(),
    };
    println!("{}", count_rows(&conn, &registry, &args.table, &spec)?);
    Ok(())
}

fn run_delete(config: &StoreConfig, args: SpecArgs) -> Result<(), String> {
    let conn = open(config)?;
    let registry = registry(config, &conn)?;
    let spec = parse_spec(&args.spec)?;
    let query = FilterCompiler::new(&registry)
        .compile_delete(&args.table, &spec)
        .map_err(|e| e.to_string())?;
    let result = QueryExecutor::new(&conn)
        .execute(&query)
        .map_err(|e| format!("Delete failed: {e}"))?;
    println!("Deleted {} row(s) from '{}'.", result.rows_affected, args.table);
    Ok(())
}

fn run_status(config: &StoreConfig) -> Result<(), String> {
    let conn = open(config)?;
    let registry = registry(config, &conn)?;
    let engine = MigrationEngine::from_config(config).map_err(|e| e.to_string())?;
    let versions = engine
        .applied_versions(&conn)
        .map_err(|e| format!("Failed to read version ledger: {e}"))?;

    println!("Database Status:");
    if let Some(path) = &config.database.path {
        println!("  Path: {}", path.display());
    }
    match versions.last() {
        Some(version) => println!("  Schema version: {version}"),
        None => println!("  Schema version: none ({} missing)", engine.version_table()),
    }
    if !versions.is_empty() {
        let applied: Vec<String> = versions.iter().map(i64::to_string).collect();
        println!("  Applied versions: {}", applied.join(", "));
    }
    println!("  Tables:");
    for table in registry.tables() {
        if table.name.eq_ignore_ascii_case(engine.version_table()) {
            continue;
        }
        let rows = count_rows(&conn, &registry, &table.name, &FilterSpec::new())?;
        println!("    {}: {rows} row(s)", table.name);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open(config: &StoreConfig) -> Result<Connection, String> {
    debug!(path = ?config.database.path, "opening database");
    open_connection(&config.database).map_err(|e| {
        format!(
            "Failed to open database '{}': {e}",
            config
                .database
                .path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        )
    })
}

/// The schema of the live database.
fn registry(config: &StoreConfig, conn: &Connection) -> Result<SchemaRegistry, String> {
    introspect(conn, config.registry_options()).map_err(|e| format!("Failed to read schema: {e}"))
}

fn count_rows(
    conn: &Connection,
    registry: &SchemaRegistry,
    table: &str,
    spec: &FilterSpec,
) -> Result<i64, String> {
    let query = FilterCompiler::new(registry)
        .compile_count(table, spec)
        .map_err(|e| e.to_string())?;
    match QueryExecutor::new(conn)
        .execute_one_value(&query)
        .map_err(|e| format!("Count failed: {e}"))?
    {
        SqlValue::Integer(n) => Ok(n),
        other => Err(format!("COUNT(*) returned {other:?}")),
    }
}

/// Parses a spec argument: inline JSON, or `@path` naming a JSON file.
fn parse_spec(raw: &str) -> Result<FilterSpec, String> {
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("Failed to read spec file '{path}': {e}"))?,
        None => raw.to_string(),
    };
    let json: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("Invalid spec JSON: {e}"))?;
    FilterSpec::try_from(json).map_err(|e| format!("Invalid filter spec: {e}"))
}

fn values_json(values: &[SqlValue]) -> serde_json::Value {
    serde_json::Value::Array(values.iter().map(SqlValue::to_json).collect())
}
