//! SQLite execution layer for filterdb.
//!
//! This crate runs what [`filterdb_core`] compiles. It owns the connection,
//! executes compiled queries in transactions, drives versioned schema
//! migrations, and dumps and restores whole databases.
//!
//! # Architecture
//!
//! - **`connection`**: lazily opened handle with engine setup (foreign
//!   keys, `regexp()`)
//! - **`executor`**: runs a [`CompiledQuery`](filterdb_core::CompiledQuery)
//!   and materializes the rows
//! - **`migration`**: init/update/ready state machine over a version ledger
//! - **`store`**: the facade tying registry, migrations and queries together
//! - **`dump`**: dump/restore through [`DumpDocument`](filterdb_db::DumpDocument)
//! - **`introspect`**: rebuilds a registry from an existing database
//!
//! # Quick start
//!
//! ```
//! use filterdb_core::{FilterSpec, Record};
//! use filterdb_sqlite::Store;
//!
//! let mut store = Store::in_memory().unwrap();
//! store
//!     .registry_mut()
//!     .add_table(
//!         "user",
//!         vec![("id", "INTEGER", "PRIMARY KEY"), ("age", "INTEGER", ""), ("city", "TEXT", "")],
//!         Vec::new(),
//!     )
//!     .unwrap();
//! store.migrations_mut().add_init_function(|ctx| ctx.create_tables()).unwrap();
//! store.migrate().unwrap();
//!
//! store.insert("user", &Record::new().with("age", 30).with("city", "Berlin")).unwrap();
//! store.insert("user", &Record::new().with("age", 12).with("city", "Berlin")).unwrap();
//!
//! let spec = FilterSpec::new().clause("age", ">", 18).clause("city", "=", "Berlin");
//! let rows = store.search("user", &spec).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

mod connection;
mod convert;
mod dump;
mod error;
mod executor;
mod introspect;
mod migration;
mod store;

pub use connection::{Database, configure, open_connection};
pub use dump::{dump, restore};
pub use error::{EngineError, Result, SqliteError};
pub use executor::{QueryExecutor, ResultSet};
pub use introspect::introspect;
pub use migration::{
    DEFAULT_VERSION_TABLE, MigrationContext, MigrationEngine, MigrationEvent, MigrationPath,
    MigrationReport, MigrationState,
};
pub use store::{RecordHook, SaveOutcome, Session, Store};
