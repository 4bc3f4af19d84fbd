//! The database handle: lazy open, engine setup, explicit close.
//!
//! Every connection gets foreign keys enabled and a `regexp()` function
//! installed so that `REGEXP`/`RLIKE` filters run.

use std::sync::Arc;

use filterdb_db::DatabaseConfig;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use tracing::debug;

use crate::error::{Result, SqliteError};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

enum ConnectionState {
    Pending,
    Open(Connection),
    Closed,
}

/// A single lazily-opened connection.
///
/// The first call to [`connection`](Self::connection) opens the database.
/// After [`close`](Self::close), every call fails with
/// [`SqliteError::NotOpen`] until [`open`](Self::open) is called again.
pub struct Database {
    config: DatabaseConfig,
    state: ConnectionState,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Pending,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::default())
    }

    /// Wraps an already-open connection, applying the standard setup.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        Ok(Self {
            config: DatabaseConfig::default(),
            state: ConnectionState::Open(conn),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open(_))
    }

    /// Opens the database if it is not open, including after a close.
    pub fn open(&mut self) -> Result<&mut Connection> {
        if !self.is_open() {
            self.state = ConnectionState::Open(open_connection(&self.config)?);
        }
        self.current()
    }

    /// The open connection, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::NotOpen`] after an explicit [`close`](Self::close).
    pub fn connection(&mut self) -> Result<&mut Connection> {
        if matches!(self.state, ConnectionState::Pending) {
            self.state = ConnectionState::Open(open_connection(&self.config)?);
        }
        self.current()
    }

    /// Closes the connection. Closing a handle that is not open is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Open(conn) => {
                conn.close().map_err(|(conn, err)| {
                    self.state = ConnectionState::Open(conn);
                    SqliteError::from(err)
                })?;
                debug!(name = %self.config.name, "database closed");
                Ok(())
            }
            ConnectionState::Pending => {
                self.state = ConnectionState::Pending;
                Ok(())
            }
            ConnectionState::Closed => Ok(()),
        }
    }

    fn current(&mut self) -> Result<&mut Connection> {
        match &mut self.state {
            ConnectionState::Open(conn) => Ok(conn),
            _ => Err(SqliteError::NotOpen),
        }
    }
}

/// Opens and configures a connection for `config`.
pub fn open_connection(config: &DatabaseConfig) -> Result<Connection> {
    let conn = match &config.path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    configure(&conn)?;
    debug!(
        name = %config.name,
        path = ?config.path,
        version = %config.version,
        "database opened"
    );
    Ok(conn)
}

/// Applies pragmas and registers engine functions on a connection.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    register_regexp(conn)?;
    Ok(())
}

/// `regexp(pattern, text)`, the function behind `text REGEXP pattern`.
/// A NULL operand yields NULL.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            if matches!(ctx.get_raw(0), ValueRef::Null) {
                return Ok(None);
            }
            let pattern: Arc<Regex> =
                ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                    Ok(Regex::new(vr.as_str()?)?)
                })?;
            let is_match = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(None),
                ValueRef::Integer(i) => pattern.is_match(&i.to_string()),
                ValueRef::Real(f) => pattern.is_match(&f.to_string()),
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    pattern.is_match(&String::from_utf8_lossy(bytes))
                }
            };
            Ok(Some(is_match))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_open_and_reuse() {
        let mut db = Database::in_memory();
        assert!(!db.is_open());
        db.connection()
            .unwrap()
            .execute_batch("CREATE TABLE t (a INTEGER)")
            .unwrap();
        assert!(db.is_open());
        // Same connection: the table is still there.
        db.connection()
            .unwrap()
            .execute_batch("INSERT INTO t VALUES (1)")
            .unwrap();
    }

    #[test]
    fn test_close_then_not_open_until_reopened() {
        let mut db = Database::in_memory();
        db.connection().unwrap();
        db.close().unwrap();
        assert!(matches!(db.connection(), Err(SqliteError::NotOpen)));
        assert!(db.open().is_ok());
        assert!(db.connection().is_ok());
    }

    #[test]
    fn test_close_before_open_keeps_lazy_open() {
        let mut db = Database::in_memory();
        db.close().unwrap();
        assert!(db.connection().is_ok());
    }

    #[test]
    fn test_regexp_function() {
        let mut db = Database::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        let conn = db.connection().unwrap();
        let regexp =
            |sql: &str| -> Option<bool> { conn.query_row(sql, [], |row| row.get(0)).unwrap() };
        assert_eq!(regexp("SELECT 'Berlin' REGEXP '^B.r'"), Some(true));
        assert_eq!(regexp("SELECT 'Paris' REGEXP '^B'"), Some(false));
        assert_eq!(regexp("SELECT 42 REGEXP '^4'"), Some(true));
        assert_eq!(regexp("SELECT NULL REGEXP 'x'"), None);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let mut db = Database::in_memory();
        let on: i64 = db
            .connection()
            .unwrap()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(on, 1);
    }
}
