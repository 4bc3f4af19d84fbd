//! Error types for execution, migration, and dump/restore.
//!
//! Every rusqlite failure is normalized into an [`EngineError`] carrying
//! the engine's result code, its message, and the statement that failed
//! when it is known.

use std::fmt;

use filterdb_core::CoreError;
use filterdb_db::DatabaseError;
use thiserror::Error;

/// A failure reported by the embedded engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Extended result code, when the failure came from the engine itself.
    pub code: Option<i32>,
    pub message: String,
    /// Statement that was executing.
    pub sql: Option<String>,
}

impl EngineError {
    pub fn from_rusqlite(err: &rusqlite::Error, sql: Option<&str>) -> Self {
        let code = match err {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
            _ => None,
        };
        Self {
            code,
            message: err.to_string(),
            sql: sql.map(String::from),
        }
    }

    /// Whether the engine reported a missing table.
    pub fn is_no_such_table(&self) -> bool {
        self.message.contains("no such table")
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "engine error {code}: {}", self.message)?,
            None => write!(f, "engine error: {}", self.message)?,
        }
        if let Some(sql) = &self.sql {
            write!(f, " (while executing: {sql})")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Errors raised by the SQLite layer.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Schema or filter validation failure, raised before anything executes.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration or dump document failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The engine rejected a statement.
    #[error("{0}")]
    Engine(EngineError),

    /// An explicit update version did not exceed every earlier one.
    #[error("update version {version} must be greater than the latest registered version {latest}")]
    NonMonotonicVersion { version: i64, latest: i64 },

    /// Migration functions can only be registered before the engine runs.
    #[error("cannot register {kind} function: migration engine is in state {state}")]
    RegistrationClosed { kind: &'static str, state: String },

    /// An operation was called in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The connection was closed explicitly.
    #[error("database is not open")]
    NotOpen,
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        SqliteError::Engine(EngineError::from_rusqlite(&err, None))
    }
}

impl SqliteError {
    /// The engine error, if this is one.
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            SqliteError::Engine(err) => Some(err),
            _ => None,
        }
    }
}

/// Attaches the failing statement to rusqlite errors.
pub(crate) trait WithSql<T> {
    fn with_sql(self, sql: &str) -> Result<T>;
}

impl<T> WithSql<T> for rusqlite::Result<T> {
    fn with_sql(self, sql: &str) -> Result<T> {
        self.map_err(|err| SqliteError::Engine(EngineError::from_rusqlite(&err, Some(sql))))
    }
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
