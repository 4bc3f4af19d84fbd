//! The store facade: one database, one schema registry, one migration
//! engine.
//!
//! Reads and writes go through a [`Session`], which binds the registry to
//! either the plain connection (each statement in its own transaction) or
//! to a transaction opened by [`Store::transaction`].

use std::collections::BTreeMap;

use filterdb_core::{
    CompiledQuery, FilterCompiler, FilterSpec, Record, SchemaRegistry, SqlValue, Value,
};
use filterdb_db::{DumpDocument, StoreConfig};
use rusqlite::Connection;
use tracing::debug;

use crate::connection::Database;
use crate::dump;
use crate::error::{Result, SqliteError};
use crate::executor::{QueryExecutor, ResultSet, run_statement};
use crate::migration::{MigrationEngine, MigrationReport};

/// Record transforms applied around writes and reads of one table.
///
/// Both methods default to doing nothing.
pub trait RecordHook {
    /// Runs before a record is inserted or updated. An error aborts the
    /// write.
    fn before_write(&self, _record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Runs on every record returned by a search.
    fn after_read(&self, _record: &mut Record) {}
}

type Hooks = BTreeMap<String, Box<dyn RecordHook>>;

/// What [`Session::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new row was inserted with this row id.
    Inserted(i64),
    /// This many existing rows matched the key and were updated.
    Updated(usize),
}

pub struct Store {
    config: StoreConfig,
    database: Database,
    registry: SchemaRegistry,
    migrations: MigrationEngine,
    hooks: Hooks,
}

impl Store {
    /// Builds a store from validated configuration. Nothing is opened
    /// until the first statement runs.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            database: Database::new(config.database.clone()),
            registry: SchemaRegistry::new(config.registry_options()),
            migrations: MigrationEngine::from_config(&config)?,
            hooks: Hooks::new(),
            config,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Mutable registry for schema bootstrap. Mutations fail once
    /// migrations have run.
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    pub fn migrations(&self) -> &MigrationEngine {
        &self.migrations
    }

    pub fn migrations_mut(&mut self) -> &mut MigrationEngine {
        &mut self.migrations
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// The open connection, opening it on first use.
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.database.connection()
    }

    pub fn open(&mut self) -> Result<()> {
        self.database.open().map(|_| ())
    }

    /// Closes the connection. Every later statement fails with
    /// [`SqliteError::NotOpen`] until [`open`](Self::open) is called.
    pub fn close(&mut self) -> Result<()> {
        self.database.close()
    }

    /// Installs a hook for `table`, replacing any earlier one.
    pub fn set_hook(&mut self, table: &str, hook: impl RecordHook + 'static) {
        self.hooks
            .insert(table.trim().to_ascii_lowercase(), Box::new(hook));
    }

    /// Runs the migration engine. Locks the registry.
    pub fn migrate(&mut self) -> Result<MigrationReport> {
        let Self {
            database,
            registry,
            migrations,
            ..
        } = self;
        migrations.execute(database.connection()?, registry)
    }

    /// Runs the migration engine again after it completed.
    pub fn re_migrate(&mut self) -> Result<MigrationReport> {
        let Self {
            database,
            registry,
            migrations,
            ..
        } = self;
        migrations.re_execute(database.connection()?, registry)
    }

    pub fn compiler(&self) -> FilterCompiler<'_> {
        FilterCompiler::new(&self.registry)
    }

    /// A session on the plain connection: every statement commits on its
    /// own.
    pub fn session(&mut self) -> Result<Session<'_>> {
        let conn = self.database.connection()?;
        Ok(Session {
            conn,
            registry: &self.registry,
            hooks: &self.hooks,
            in_transaction: false,
        })
    }

    /// Runs `f` inside one transaction, committed when `f` returns `Ok` and
    /// rolled back otherwise.
    ///
    /// # Examples
    ///
    /// ```
    /// use filterdb_core::{FilterSpec, Record};
    /// use filterdb_sqlite::Store;
    ///
    /// let mut store = Store::in_memory().unwrap();
    /// store
    ///     .registry_mut()
    ///     .add_table(
    ///         "tag",
    ///         vec![("id", "INTEGER", "PRIMARY KEY"), ("label", "TEXT", "")],
    ///         Vec::new(),
    ///     )
    ///     .unwrap();
    /// store.migrations_mut().add_init_function(|ctx| ctx.create_tables()).unwrap();
    /// store.migrate().unwrap();
    ///
    /// let ids = store
    ///     .transaction(|tx| {
    ///         let a = tx.insert("tag", &Record::new().with("label", "red"))?;
    ///         let b = tx.insert("tag", &Record::new().with("label", "blue"))?;
    ///         Ok((a, b))
    ///     })
    ///     .unwrap();
    /// assert_eq!(ids, (1, 2));
    /// assert_eq!(store.count("tag", &FilterSpec::new()).unwrap(), 2);
    /// ```
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        let conn = self.database.connection()?;
        let tx = conn.transaction()?;
        let out = {
            let session = Session {
                conn: &tx,
                registry: &self.registry,
                hooks: &self.hooks,
                in_transaction: true,
            };
            f(&session)?
        };
        tx.commit()?;
        Ok(out)
    }

    pub fn search(&mut self, table: &str, spec: &FilterSpec) -> Result<Vec<Record>> {
        self.session()?.search(table, spec)
    }

    pub fn count(&mut self, table: &str, spec: &FilterSpec) -> Result<u64> {
        self.session()?.count(table, spec)
    }

    pub fn delete_search(&mut self, table: &str, spec: &FilterSpec) -> Result<usize> {
        self.session()?.delete_search(table, spec)
    }

    pub fn insert(&mut self, table: &str, record: &Record) -> Result<i64> {
        self.session()?.insert(table, record)
    }

    pub fn update(&mut self, table: &str, record: &Record, spec: &FilterSpec) -> Result<usize> {
        self.session()?.update(table, record, spec)
    }

    /// [`Session::save`] inside its own transaction, so the update and the
    /// fallback insert are atomic.
    pub fn save(&mut self, table: &str, record: &Record, key: &str) -> Result<SaveOutcome> {
        self.transaction(|tx| tx.save(table, record, key))
    }

    pub fn execute(&mut self, query: &CompiledQuery) -> Result<ResultSet> {
        self.session()?.execute(query)
    }

    /// Serializes the live database into a dump document.
    pub fn dump(&mut self) -> Result<DumpDocument> {
        dump::dump(self.database.connection()?)
    }

    /// Replays a dump document. Per-table failures are reported in the
    /// returned document's `errors`.
    pub fn restore(&mut self, document: &DumpDocument) -> Result<DumpDocument> {
        dump::restore(self.database.connection()?, document)
    }
}

/// The read/write surface bound to one connection or transaction.
pub struct Session<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    hooks: &'a Hooks,
    in_transaction: bool,
}

impl<'a> Session<'a> {
    pub fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    pub fn compiler(&self) -> FilterCompiler<'a> {
        FilterCompiler::new(self.registry)
    }

    pub fn is_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Runs a compiled query in this session.
    pub fn execute(&self, query: &CompiledQuery) -> Result<ResultSet> {
        if self.in_transaction {
            run_statement(self.conn, query)
        } else {
            QueryExecutor::new(self.conn).execute(query)
        }
    }

    /// Row 0, column 0 of the result, or `NULL` without rows.
    pub fn execute_one_value(&self, query: &CompiledQuery) -> Result<SqlValue> {
        Ok(self.execute(query)?.first_value())
    }

    /// Matching rows with temporal columns decoded to dates.
    ///
    /// # Errors
    ///
    /// Validation failures are raised before anything executes; engine
    /// failures carry the statement text.
    pub fn search(&self, table: &str, spec: &FilterSpec) -> Result<Vec<Record>> {
        let query = self.compiler().compile_select(table, spec)?;
        let mut records = self.execute(&query)?.into_records(self.registry, table);
        if let Some(hook) = self.hook(table) {
            for record in &mut records {
                hook.after_read(record);
            }
        }
        debug!(table, rows = records.len(), "search finished");
        Ok(records)
    }

    pub fn count(&self, table: &str, spec: &FilterSpec) -> Result<u64> {
        let query = self.compiler().compile_count(table, spec)?;
        match self.execute_one_value(&query)? {
            SqlValue::Integer(n) => Ok(u64::try_from(n).unwrap_or(0)),
            other => Err(SqliteError::InvalidState(format!(
                "COUNT(*) returned a non-integer value: {other:?}"
            ))),
        }
    }

    /// Deletes matching rows and returns how many went. An empty filter
    /// deletes every row.
    pub fn delete_search(&self, table: &str, spec: &FilterSpec) -> Result<usize> {
        let query = self.compiler().compile_delete(table, spec)?;
        Ok(self.execute(&query)?.rows_affected)
    }

    /// Inserts a record and returns its row id.
    pub fn insert(&self, table: &str, record: &Record) -> Result<i64> {
        let record = self.prepare_write(table, record)?;
        let query = self.compiler().compile_insert(table, &record)?;
        let result = self.execute(&query)?;
        Ok(result
            .insert_id
            .unwrap_or_else(|| self.conn.last_insert_rowid()))
    }

    /// Sets the record's columns on every matching row.
    pub fn update(&self, table: &str, record: &Record, spec: &FilterSpec) -> Result<usize> {
        let record = self.prepare_write(table, record)?;
        let query = self.compiler().compile_update(table, &record, spec)?;
        Ok(self.execute(&query)?.rows_affected)
    }

    /// Updates the row whose `key` column equals the record's key value,
    /// or inserts the record if it has no key value or no row matches.
    pub fn save(&self, table: &str, record: &Record, key: &str) -> Result<SaveOutcome> {
        let key = key.trim();
        self.registry.check_columns(table, &[key])?;
        match record.get(key) {
            Some(value) if !value.is_null() => {
                let spec = FilterSpec::new().clause(key, "=", value.clone());
                let mut changes = record.clone();
                changes.remove(key);
                if changes.is_empty() {
                    // Nothing to set; the row either exists or gets inserted.
                    if self.count(table, &spec)? > 0 {
                        return Ok(SaveOutcome::Updated(0));
                    }
                    return self.insert(table, record).map(SaveOutcome::Inserted);
                }
                match self.update(table, &changes, &spec)? {
                    0 => self.insert(table, record).map(SaveOutcome::Inserted),
                    n => Ok(SaveOutcome::Updated(n)),
                }
            }
            _ => self.insert(table, record).map(SaveOutcome::Inserted),
        }
    }

    /// Fetches the first row whose `key` column equals `value`.
    pub fn find(&self, table: &str, key: &str, value: impl Into<Value>) -> Result<Option<Record>> {
        let value: Value = value.into();
        let spec = FilterSpec::new().clause(key, "=", value).limit(1);
        Ok(self.search(table, &spec)?.into_iter().next())
    }

    fn hook(&self, table: &str) -> Option<&'a dyn RecordHook> {
        self.hooks
            .get(&table.trim().to_ascii_lowercase())
            .map(|hook| &**hook)
    }

    fn prepare_write(&self, table: &str, record: &Record) -> Result<Record> {
        let mut record = record.clone();
        if let Some(hook) = self.hook(table) {
            hook.before_write(&mut record)?;
        }
        Ok(record)
    }
}
