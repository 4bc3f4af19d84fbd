//! Dump and restore of a live database through [`DumpDocument`].
//!
//! A dump records the DDL of every user table, view, trigger and index, the
//! column list of every table, and every row. Restore replays the DDL with
//! `IF NOT EXISTS` and loads each table in its own transaction with
//! `INSERT OR IGNORE`. A table whose recorded columns do not match the live
//! table, or whose insert fails, is rolled back and reported in the
//! returned document's `errors`; the other tables still load.

use std::sync::LazyLock;

use filterdb_core::SqlValue;
use filterdb_db::DumpDocument;
use regex::Regex;
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info, warn};

use crate::convert::{from_engine, to_engine};
use crate::error::{Result, WithSql};

static CREATE_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(\s*CREATE\s+(?:(?:TEMP|TEMPORARY|UNIQUE)\s+)?(?:TABLE|INDEX|TRIGGER|VIEW)\s+)(?:IF\s+NOT\s+EXISTS\s+)?",
    )
    .ok()
});

const MASTER_SQL: &str = "SELECT type, name, sql FROM sqlite_master \
     WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' ORDER BY rowid";

/// Reads schema and data of every user table.
pub fn dump(conn: &Connection) -> Result<DumpDocument> {
    let mut doc = DumpDocument::new();
    let mut stmt = conn.prepare(MASTER_SQL).with_sql(MASTER_SQL)?;
    let objects = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .with_sql(MASTER_SQL)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(MASTER_SQL)?;

    let mut tables = Vec::new();
    for (kind, name, sql) in objects {
        match kind.as_str() {
            "table" => {
                doc.sql.tables.push(sql);
                tables.push(name);
            }
            "view" => doc.sql.views.push(sql),
            "trigger" => doc.sql.triggers.push(sql),
            "index" => doc.sql.indexes.push(sql),
            _ => {}
        }
    }

    for table in tables {
        let columns = table_columns(conn, &table)?;
        let select = format!(
            "SELECT {} FROM {}",
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            quote(&table)
        );
        let mut stmt = conn.prepare(&select).with_sql(&select)?;
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|idx| Ok(from_engine(row.get_ref(idx)?).to_json()))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .with_sql(&select)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_sql(&select)?;
        debug!(table = %table, rows = rows.len(), "dumped table");
        doc.tables.insert(table.clone(), columns);
        doc.data.insert(table, rows);
    }

    info!(
        tables = doc.tables.len(),
        rows = doc.row_count(),
        "database dumped"
    );
    Ok(doc)
}

/// Replays `document` into `conn` and returns a copy whose `errors` name
/// every table that failed to load.
///
/// # Errors
///
/// Fails as a whole only if the DDL cannot be replayed. Data failures are
/// reported per table.
pub fn restore(conn: &mut Connection, document: &DumpDocument) -> Result<DumpDocument> {
    let mut outcome = document.clone();
    outcome.errors.clear();

    let tx = conn.transaction()?;
    for sql in document.sql.replay_order() {
        let sql = if_not_exists(sql);
        tx.execute_batch(&sql).with_sql(&sql)?;
    }
    tx.commit()?;

    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    let loaded = load_tables(conn, document, &mut outcome);
    if foreign_keys != 0 {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
    }
    loaded?;

    info!(
        tables = document.data.len(),
        failed = outcome.errors.len(),
        "dump restored"
    );
    Ok(outcome)
}

fn load_tables(
    conn: &mut Connection,
    document: &DumpDocument,
    outcome: &mut DumpDocument,
) -> Result<()> {
    for (table, rows) in &document.data {
        let live = table_columns(conn, table)?;
        let recorded = document.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        if let Err(reason) = check_columns(table, recorded, &live, rows) {
            warn!(table = %table, %reason, "skipping table");
            outcome.errors.insert(table.clone(), reason);
            continue;
        }
        if rows.is_empty() {
            continue;
        }

        let insert = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            quote(table),
            recorded.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            vec!["?"; recorded.len()].join(", ")
        );
        let tx = conn.transaction()?;
        let inserted = insert_rows(&tx, &insert, rows);
        match inserted {
            Ok(count) => {
                tx.commit()?;
                debug!(table = %table, rows = count, "restored table");
            }
            Err(err) => {
                drop(tx);
                warn!(table = %table, error = %err, "table restore failed");
                outcome.errors.insert(table.clone(), err.to_string());
            }
        }
    }
    Ok(())
}

fn insert_rows(conn: &Connection, insert: &str, rows: &[Vec<serde_json::Value>]) -> Result<usize> {
    let mut stmt = conn.prepare(insert).with_sql(insert)?;
    let mut count = 0;
    for row in rows {
        let params = row.iter().map(|v| to_engine(&SqlValue::from_json(v)));
        count += stmt.execute(params_from_iter(params)).with_sql(insert)?;
    }
    Ok(count)
}

fn check_columns(
    table: &str,
    recorded: &[String],
    live: &[String],
    rows: &[Vec<serde_json::Value>],
) -> std::result::Result<(), String> {
    if live.is_empty() {
        return Err(format!("table '{table}' does not exist"));
    }
    if recorded.len() != live.len() {
        return Err(format!(
            "table '{table}' has {} columns but the dump records {}",
            live.len(),
            recorded.len()
        ));
    }
    if let Some(missing) = recorded
        .iter()
        .find(|c| !live.iter().any(|l| l.eq_ignore_ascii_case(c)))
    {
        return Err(format!("table '{table}' has no column '{missing}'"));
    }
    if let Some(idx) = rows.iter().position(|row| row.len() != recorded.len()) {
        return Err(format!(
            "row {idx} of table '{table}' has {} values, expected {}",
            rows[idx].len(),
            recorded.len()
        ));
    }
    Ok(())
}

/// Column names of a live table in declaration order; empty if the table
/// does not exist.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    const SQL: &str = "SELECT name FROM pragma_table_info(?1) ORDER BY cid";
    let mut stmt = conn.prepare(SQL).with_sql(SQL)?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .with_sql(SQL)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(SQL)?;
    Ok(columns)
}

/// Rewrites `CREATE <kind> name` as `CREATE <kind> IF NOT EXISTS name`.
fn if_not_exists(sql: &str) -> String {
    match CREATE_PREFIX.as_ref() {
        Some(re) => re.replace(sql, "${1}IF NOT EXISTS ").into_owned(),
        None => sql.to_string(),
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
