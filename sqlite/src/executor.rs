//! Runs compiled queries and materializes their results.
//!
//! Every result is fully read into a [`ResultSet`] before it is returned;
//! no live cursor escapes. Failures carry the statement text.

use filterdb_core::{CompiledQuery, Record, SchemaRegistry, SqlValue};
use rusqlite::{Connection, Transaction, params_from_iter};
use tracing::debug;

use crate::convert::{from_engine, to_engine_params};
use crate::error::{Result, WithSql};

/// Materialized outcome of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Result column names; empty for statements that return no rows.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by an `INSERT`, `UPDATE`, or `DELETE`.
    pub rows_affected: usize,
    /// Row id of the last inserted row, for `INSERT` statements.
    pub insert_id: Option<i64>,
}

impl ResultSet {
    /// Row 0, column 0, or `NULL` when there are no rows.
    pub fn first_value(&self) -> SqlValue {
        self.rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(SqlValue::Null)
    }

    /// Converts the rows to records, decoding temporal columns of `table`.
    pub fn into_records(self, registry: &SchemaRegistry, table: &str) -> Vec<Record> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| registry.decode_row(table, &columns, row))
            .collect()
    }
}

/// Executes compiled queries against one connection.
#[derive(Clone, Copy)]
pub struct QueryExecutor<'c> {
    conn: &'c Connection,
}

impl<'c> QueryExecutor<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Runs the query inside its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::Engine`](crate::SqliteError::Engine) with the
    /// statement text if the engine rejects it; the transaction is rolled
    /// back.
    pub fn execute(&self, query: &CompiledQuery) -> Result<ResultSet> {
        let tx = self.conn.unchecked_transaction().with_sql("BEGIN")?;
        let result = run_statement(&tx, query)?;
        tx.commit().with_sql("COMMIT")?;
        Ok(result)
    }

    /// Runs the query and returns row 0, column 0 (`NULL` without rows).
    pub fn execute_one_value(&self, query: &CompiledQuery) -> Result<SqlValue> {
        Ok(self.execute(query)?.first_value())
    }

    /// Runs the query inside a transaction the caller already opened, so
    /// that several statements commit or roll back together.
    pub fn execute_in_transaction(
        tx: &Transaction<'_>,
        query: &CompiledQuery,
    ) -> Result<ResultSet> {
        run_statement(tx, query)
    }
}

/// Prepares, binds, and runs one statement on `conn` without opening a
/// transaction.
pub(crate) fn run_statement(conn: &Connection, query: &CompiledQuery) -> Result<ResultSet> {
    let sql = query.sql.as_str();
    debug!(sql, values = query.values.len(), "executing statement");

    let mut stmt = conn.prepare(sql).with_sql(sql)?;
    let params = to_engine_params(&query.values);
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    if columns.is_empty() {
        let rows_affected = stmt.execute(params_from_iter(params.iter())).with_sql(sql)?;
        let insert_id = is_insert(sql).then(|| conn.last_insert_rowid());
        return Ok(ResultSet {
            columns,
            rows: Vec::new(),
            rows_affected,
            insert_id,
        });
    }

    let width = columns.len();
    let mut rows = stmt.query(params_from_iter(params.iter())).with_sql(sql)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().with_sql(sql)? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(from_engine(row.get_ref(idx).with_sql(sql)?));
        }
        out.push(values);
    }
    Ok(ResultSet {
        columns,
        rows: out,
        rows_affected: 0,
        insert_id: None,
    })
}

fn is_insert(sql: &str) -> bool {
    let head = sql.trim_start();
    ["INSERT", "REPLACE"].iter().any(|kw| {
        head.get(..kw.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(kw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::configure;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure(&conn).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn
    }

    fn query(sql: &str, values: Vec<SqlValue>) -> CompiledQuery {
        CompiledQuery {
            sql: sql.to_string(),
            values,
        }
    }

    #[test]
    fn test_insert_reports_id_and_changes() {
        let conn = conn();
        let exec = QueryExecutor::new(&conn);
        let rs = exec
            .execute(&query(
                "INSERT INTO t (name) VALUES (?)",
                vec![SqlValue::Text("a".into())],
            ))
            .unwrap();
        assert_eq!(rs.rows_affected, 1);
        assert_eq!(rs.insert_id, Some(1));
        assert!(rs.columns.is_empty());
    }

    #[test]
    fn test_select_materializes_rows() {
        let conn = conn();
        conn.execute_batch("INSERT INTO t (name) VALUES ('a'), ('b'), (NULL)")
            .unwrap();
        let rs = QueryExecutor::new(&conn)
            .execute(&CompiledQuery::plain("SELECT id, name FROM t ORDER BY id"))
            .unwrap();
        assert_eq!(rs.columns, ["id", "name"]);
        assert_eq!(rs.rows.len(), 3);
        assert_eq!(rs.rows[2], vec![SqlValue::Integer(3), SqlValue::Null]);
        assert_eq!(rs.insert_id, None);
    }

    #[test]
    fn test_execute_one_value() {
        let conn = conn();
        let exec = QueryExecutor::new(&conn);
        assert_eq!(
            exec.execute_one_value(&CompiledQuery::plain("SELECT COUNT(*) FROM t"))
                .unwrap(),
            SqlValue::Integer(0)
        );
        assert_eq!(
            exec.execute_one_value(&CompiledQuery::plain("SELECT name FROM t"))
                .unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_failure_carries_sql_and_rolls_back() {
        let conn = conn();
        let exec = QueryExecutor::new(&conn);
        let err = exec
            .execute(&CompiledQuery::plain("INSERT INTO nope VALUES (1)"))
            .unwrap_err();
        let engine = err.engine().unwrap();
        assert_eq!(engine.sql.as_deref(), Some("INSERT INTO nope VALUES (1)"));
        assert!(conn.is_autocommit());
        // A new transaction can start, so the failed one was closed.
        exec.execute(&CompiledQuery::plain("INSERT INTO t (name) VALUES ('ok')"))
            .unwrap();
    }

    #[test]
    fn test_execute_in_transaction_is_atomic() {
        let mut conn = conn();
        {
            let tx = conn.transaction().unwrap();
            QueryExecutor::execute_in_transaction(
                &tx,
                &CompiledQuery::plain("INSERT INTO t (name) VALUES ('x')"),
            )
            .unwrap();
            // dropped without commit
        }
        let count = QueryExecutor::new(&conn)
            .execute_one_value(&CompiledQuery::plain("SELECT COUNT(*) FROM t"))
            .unwrap();
        assert_eq!(count, SqlValue::Integer(0));
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("  insert or ignore into t values (1)"));
        assert!(is_insert("REPLACE INTO t VALUES (1)"));
        assert!(!is_insert("UPDATE t SET a = 1"));
    }
}
