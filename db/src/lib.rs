//! Store configuration and the dump/restore interchange document.
//!
//! This crate has no engine dependency. It provides:
//!
//! - [`StoreConfig`]: YAML configuration for the database location, the
//!   version ledger table, timestamp columns, and migration re-execution.
//! - [`DumpDocument`]: the JSON dump format, read and written as plain or
//!   gzip-compressed files.
//!
//! # Quick start
//!
//! ```no_run
//! use filterdb_db::{DumpDocument, StoreConfig};
//!
//! let config = StoreConfig::load("filterdb.yml").unwrap();
//! println!("ledger table: {}", config.version_table);
//!
//! let dump = DumpDocument::load("backup.json.gz").unwrap();
//! println!("{} rows in {} tables", dump.row_count(), dump.tables.len());
//! ```
//!
//! # Feature flags
//!
//! - **`gzip`** (default): read and write `.gz` dump files via `flate2`.

mod config;
mod dump;
mod error;

pub use config::{DatabaseConfig, MigrationConfig, StoreConfig, TimestampConfig};
pub use dump::{DumpDocument, DumpSql, is_gzip_path};
pub use error::{DatabaseError, Result};
