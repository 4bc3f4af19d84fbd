//! Versioned schema migrations with a ledger table.
//!
//! The engine moves through four states:
//!
//! - `Init`: functions may be registered.
//! - `Execute`: registration is closed; schema functions are running.
//! - `Ready`: schema functions are done; ready functions are running.
//! - `Done`: terminal. Only [`MigrationEngine::re_execute`] leaves it.
//!
//! [`execute`](MigrationEngine::execute) reads `MAX(version)` from the
//! ledger table and picks a path:
//!
//! - **Init** (no ledger table): every init function runs in registration
//!   order in one transaction, and one ledger row records the highest
//!   registered update version. Init functions create the latest schema
//!   directly.
//! - **Update** (ledger has a version): every update function above the
//!   stored version runs in ascending order, each in its own transaction
//!   together with its ledger row, so completed steps survive a later
//!   failure.
//! - **Corrupt** (ledger exists but has no usable version): the ledger is
//!   dropped and the init path runs.
//!
//! # Example
//!
//! ```
//! use filterdb_core::SchemaRegistry;
//! use filterdb_sqlite::{MigrationEngine, MigrationPath, open_connection};
//!
//! let mut registry = SchemaRegistry::default();
//! registry
//!     .add_table("note", vec![("id", "INTEGER", "PRIMARY KEY"), ("body", "TEXT", "")], Vec::new())
//!     .unwrap();
//!
//! let mut engine = MigrationEngine::new();
//! engine.add_init_function(|ctx| ctx.create_tables()).unwrap();
//! engine
//!     .add_update_function(1, |ctx| ctx.execute_batch("ALTER TABLE note ADD COLUMN tag TEXT"))
//!     .unwrap();
//!
//! let mut conn = open_connection(&Default::default()).unwrap();
//! let report = engine.execute(&mut conn, &mut registry).unwrap();
//! assert_eq!(report.path, Some(MigrationPath::Init));
//! assert_eq!(report.current_version, 1);
//! assert!(registry.is_locked());
//! ```

use std::fmt;

use filterdb_core::{CompiledQuery, CoreError, SchemaRegistry, SqlValue, validate_identifier};
use filterdb_db::StoreConfig;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Result, SqliteError, WithSql};
use crate::executor::{ResultSet, run_statement};

/// Default name of the ledger table.
pub const DEFAULT_VERSION_TABLE: &str = "_dbVersion";

/// Lifecycle state of a [`MigrationEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Init,
    Execute,
    Ready,
    Done,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationState::Init => "INIT",
            MigrationState::Execute => "EXECUTE",
            MigrationState::Ready => "READY",
            MigrationState::Done => "DONE",
        })
    }
}

/// Which route an execution took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPath {
    Init,
    Update,
}

/// Lifecycle notifications delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    Started { path: MigrationPath },
    /// One update version committed; `applied` of `total` pending versions.
    Progress {
        version: i64,
        applied: usize,
        total: usize,
    },
    Ready,
    Done,
}

/// Outcome of one [`execute`](MigrationEngine::execute).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// `None` if the run failed before a path was chosen.
    pub path: Option<MigrationPath>,
    /// Ledger version found before running; `None` without a usable ledger.
    pub previous_version: Option<i64>,
    /// Update versions applied by this run, in order.
    pub applied: Vec<i64>,
    /// Ledger version after the run.
    pub current_version: i64,
    /// A corrupt ledger was dropped and rebuilt.
    pub recovered: bool,
    /// An error handler received a failure and the run stopped.
    pub halted: bool,
}

type SchemaFn = Box<dyn FnMut(&mut MigrationContext<'_>) -> Result<()>>;
type ReadyFn = Box<dyn FnMut(&Connection, &SchemaRegistry) -> Result<()>>;
type Listener = Box<dyn FnMut(&MigrationEvent)>;
type ErrorHandler = Box<dyn FnMut(SqliteError)>;

/// What migration functions see: the open transaction and the registry.
pub struct MigrationContext<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    version: Option<i64>,
}

impl<'a> MigrationContext<'a> {
    fn new(conn: &'a Connection, registry: &'a SchemaRegistry, version: Option<i64>) -> Self {
        Self {
            conn,
            registry,
            version,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    /// Connection bound to the migration's transaction.
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Version being applied; `None` inside init functions.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Runs one statement with bound values.
    pub fn execute(&mut self, sql: &str, values: Vec<SqlValue>) -> Result<ResultSet> {
        run_statement(
            self.conn,
            &CompiledQuery {
                sql: sql.to_string(),
                values,
            },
        )
    }

    /// Runs one or more statements without bound values.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).with_sql(sql)
    }

    /// Creates every registered table, then indexes, then triggers.
    pub fn create_tables(&mut self) -> Result<()> {
        for sql in self.registry.create_statements() {
            self.execute_batch(&sql)?;
        }
        Ok(())
    }

    /// Creates one registered table with its indexes and triggers.
    pub fn create_table(&mut self, table: &str) -> Result<()> {
        for sql in self.registry.create_statements_for(table)? {
            self.execute_batch(&sql)?;
        }
        Ok(())
    }

    /// Adds a registered column to an existing table.
    ///
    /// The engine rejects added columns whose default is not constant, so
    /// timestamp columns cannot be added this way.
    pub fn add_column(&mut self, table: &str, column: &str) -> Result<()> {
        let def = self
            .registry
            .table(table)
            .ok_or_else(|| CoreError::UnknownTable(table.to_string()))?;
        let col = def.column(column).ok_or_else(|| CoreError::UnknownColumn {
            table: def.name.clone(),
            column: column.to_string(),
        })?;
        let sql = format!("ALTER TABLE {} ADD COLUMN {}", def.name, col.sql());
        self.execute_batch(&sql)
    }

    /// Creates a registered index by name.
    pub fn create_index(&mut self, name: &str) -> Result<()> {
        let sql = self
            .registry
            .indexes()
            .find(|i| i.name.eq_ignore_ascii_case(name.trim()))
            .map(|i| i.create_sql())
            .ok_or_else(|| SqliteError::InvalidState(format!("index '{name}' is not registered")))?;
        self.execute_batch(&sql)
    }

    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        let table = table.trim();
        validate_identifier("table", table)?;
        self.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))
    }
}

enum Ledger {
    Missing,
    Corrupt,
    Version(i64),
}

/// Registers and runs init, update, and ready functions.
pub struct MigrationEngine {
    version_table: String,
    trigger_events_on_reexecute: bool,
    recall_ready_functions_on_reexecute: bool,
    state: MigrationState,
    reexecuting: bool,
    init_functions: Vec<SchemaFn>,
    update_functions: Vec<(i64, SchemaFn)>,
    ready_functions: Vec<ReadyFn>,
    listeners: Vec<Listener>,
    error_handler: Option<ErrorHandler>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self {
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            trigger_events_on_reexecute: false,
            recall_ready_functions_on_reexecute: false,
            state: MigrationState::Init,
            reexecuting: false,
            init_functions: Vec::new(),
            update_functions: Vec::new(),
            ready_functions: Vec::new(),
            listeners: Vec::new(),
            error_handler: None,
        }
    }

    /// Engine using the configured ledger table and re-execution flags.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let mut engine = Self::new().with_version_table(&config.version_table)?;
        engine.trigger_events_on_reexecute = config.migration.trigger_events_on_reexecute;
        engine.recall_ready_functions_on_reexecute =
            config.migration.recall_ready_functions_on_reexecute;
        Ok(engine)
    }

    pub fn with_version_table(mut self, table: &str) -> Result<Self> {
        let table = table.trim();
        validate_identifier("table", table)?;
        self.version_table = table.to_string();
        Ok(self)
    }

    pub fn version_table(&self) -> &str {
        &self.version_table
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Highest registered update version, or 0.
    pub fn latest_version(&self) -> i64 {
        self.update_functions.last().map_or(0, |(v, _)| *v)
    }

    /// Registered update versions in ascending order.
    pub fn update_versions(&self) -> Vec<i64> {
        self.update_functions.iter().map(|(v, _)| *v).collect()
    }

    pub fn add_init_function<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&mut MigrationContext<'_>) -> Result<()> + 'static,
    {
        self.ensure_registration_open("init")?;
        self.init_functions.push(Box::new(f));
        Ok(())
    }

    /// Registers an update function and returns its version.
    ///
    /// A `version` of 0 or below takes the next version after the latest
    /// registered one.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::NonMonotonicVersion`] if an explicit version
    /// does not exceed every registered one, and
    /// [`SqliteError::RegistrationClosed`] once the engine has started.
    pub fn add_update_function<F>(&mut self, version: i64, f: F) -> Result<i64>
    where
        F: FnMut(&mut MigrationContext<'_>) -> Result<()> + 'static,
    {
        self.ensure_registration_open("update")?;
        let latest = self.latest_version();
        let version = if version <= 0 {
            latest + 1
        } else if version <= latest {
            return Err(SqliteError::NonMonotonicVersion { version, latest });
        } else {
            version
        };
        self.update_functions.push((version, Box::new(f)));
        Ok(version)
    }

    pub fn add_ready_function<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&Connection, &SchemaRegistry) -> Result<()> + 'static,
    {
        self.ensure_registration_open("ready")?;
        self.ready_functions.push(Box::new(f));
        Ok(())
    }

    /// Adds a lifecycle listener. Listeners can be added in any state.
    pub fn on_event<F>(&mut self, listener: F)
    where
        F: FnMut(&MigrationEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Routes failures to `handler` instead of returning them. After a
    /// handled failure the run stops and the engine stays in its state.
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: FnMut(SqliteError) + 'static,
    {
        self.error_handler = Some(Box::new(handler));
    }

    /// Runs migrations and then ready functions. Locks the registry.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::InvalidState`] unless the engine is in
    /// `Init`. Any failure of a migration or ready function is returned
    /// unless an error handler is set.
    pub fn execute(
        &mut self,
        conn: &mut Connection,
        registry: &mut SchemaRegistry,
    ) -> Result<MigrationReport> {
        if self.state != MigrationState::Init {
            return Err(SqliteError::InvalidState(format!(
                "execute requires state INIT, engine is {}",
                self.state
            )));
        }
        self.state = MigrationState::Execute;
        registry.lock();

        let mut report = MigrationReport::default();
        match self.run(conn, registry, &mut report) {
            Ok(()) => Ok(report),
            Err(err) => match self.error_handler.as_mut() {
                Some(handler) => {
                    warn!(state = %self.state, error = %err, "migration halted");
                    handler(err);
                    report.halted = true;
                    Ok(report)
                }
                None => Err(err),
            },
        }
    }

    /// Runs [`execute`](Self::execute) again after it completed.
    ///
    /// Events and ready functions are skipped unless the corresponding
    /// re-execution flag is set.
    pub fn re_execute(
        &mut self,
        conn: &mut Connection,
        registry: &mut SchemaRegistry,
    ) -> Result<MigrationReport> {
        if self.state != MigrationState::Done {
            return Err(SqliteError::InvalidState(format!(
                "re_execute requires state DONE, engine is {}",
                self.state
            )));
        }
        self.state = MigrationState::Init;
        self.reexecuting = true;
        self.execute(conn, registry)
    }

    /// Versions recorded in the ledger, ascending. Empty without a ledger.
    pub fn applied_versions(&self, conn: &Connection) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT version FROM {} WHERE version IS NOT NULL ORDER BY version",
            self.version_table
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(err) if err.to_string().contains("no such table") => return Ok(Vec::new()),
            Err(err) => return Err(err).with_sql(&sql),
        };
        let versions = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .with_sql(&sql)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_sql(&sql)?;
        Ok(versions)
    }

    fn ensure_registration_open(&self, kind: &'static str) -> Result<()> {
        if self.state != MigrationState::Init || self.reexecuting {
            return Err(SqliteError::RegistrationClosed {
                kind,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn events_enabled(&self) -> bool {
        !self.reexecuting || self.trigger_events_on_reexecute
    }

    fn emit(&mut self, event: MigrationEvent) {
        if self.events_enabled() {
            emit_to(&mut self.listeners, &event);
        }
    }

    fn run(
        &mut self,
        conn: &mut Connection,
        registry: &SchemaRegistry,
        report: &mut MigrationReport,
    ) -> Result<()> {
        match self.read_ledger(conn)? {
            Ledger::Missing => self.run_init(conn, registry, report)?,
            Ledger::Corrupt => {
                warn!(table = %self.version_table, "version ledger is corrupt; rebuilding");
                let sql = format!("DROP TABLE IF EXISTS {}", self.version_table);
                conn.execute_batch(&sql).with_sql(&sql)?;
                report.recovered = true;
                self.run_init(conn, registry, report)?;
            }
            Ledger::Version(version) => {
                report.previous_version = Some(version);
                self.run_update(conn, registry, version, report)?;
            }
        }

        self.state = MigrationState::Ready;
        self.emit(MigrationEvent::Ready);
        if !self.reexecuting || self.recall_ready_functions_on_reexecute {
            for ready in &mut self.ready_functions {
                ready(&*conn, registry)?;
            }
        }
        self.state = MigrationState::Done;
        self.emit(MigrationEvent::Done);
        Ok(())
    }

    fn read_ledger(&self, conn: &Connection) -> Result<Ledger> {
        let sql = format!("SELECT MAX(version) FROM {}", self.version_table);
        let max = match conn
            .query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
            .optional()
        {
            Ok(max) => max.flatten(),
            Err(err) if err.to_string().contains("no such table") => return Ok(Ledger::Missing),
            // A non-integer version is as unusable as none.
            Err(rusqlite::Error::InvalidColumnType(..)) => return Ok(Ledger::Corrupt),
            Err(err) => return Err(err).with_sql(&sql),
        };
        Ok(match max {
            Some(version) if version >= 0 => Ledger::Version(version),
            _ => Ledger::Corrupt,
        })
    }

    fn run_init(
        &mut self,
        conn: &mut Connection,
        registry: &SchemaRegistry,
        report: &mut MigrationReport,
    ) -> Result<()> {
        report.path = Some(MigrationPath::Init);
        self.emit(MigrationEvent::Started {
            path: MigrationPath::Init,
        });
        let target = self.latest_version();
        info!(
            functions = self.init_functions.len(),
            version = target,
            "initializing database schema"
        );

        let tx = conn.transaction()?;
        let ledger_sql = self.ledger_ddl();
        tx.execute_batch(&ledger_sql).with_sql(&ledger_sql)?;
        {
            let mut ctx = MigrationContext::new(&tx, registry, None);
            for init in &mut self.init_functions {
                init(&mut ctx)?;
            }
        }
        let insert = self.ledger_insert();
        tx.execute(&insert, [target]).with_sql(&insert)?;
        tx.commit()?;

        report.current_version = target;
        Ok(())
    }

    fn run_update(
        &mut self,
        conn: &mut Connection,
        registry: &SchemaRegistry,
        stored: i64,
        report: &mut MigrationReport,
    ) -> Result<()> {
        report.path = Some(MigrationPath::Update);
        report.current_version = stored;
        self.emit(MigrationEvent::Started {
            path: MigrationPath::Update,
        });

        let total = self
            .update_functions
            .iter()
            .filter(|(v, _)| *v > stored)
            .count();
        if total == 0 {
            debug!(version = stored, "database schema is current");
            return Ok(());
        }
        info!(from = stored, pending = total, "updating database schema");

        let insert = self.ledger_insert();
        let events = self.events_enabled();
        let Self {
            update_functions,
            listeners,
            ..
        } = self;
        for (version, update) in update_functions.iter_mut().filter(|(v, _)| *v > stored) {
            let version = *version;
            let tx = conn.transaction()?;
            {
                let mut ctx = MigrationContext::new(&tx, registry, Some(version));
                update(&mut ctx)?;
            }
            tx.execute(&insert, [version]).with_sql(&insert)?;
            tx.commit()?;

            report.applied.push(version);
            report.current_version = version;
            info!(version, "applied schema version");
            if events {
                emit_to(
                    listeners,
                    &MigrationEvent::Progress {
                        version,
                        applied: report.applied.len(),
                        total,
                    },
                );
            }
        }
        Ok(())
    }

    fn ledger_ddl(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (version INTEGER PRIMARY KEY, \
             applied INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)))",
            self.version_table
        )
    }

    fn ledger_insert(&self) -> String {
        format!("INSERT INTO {} (version) VALUES (?1)", self.version_table)
    }
}

fn emit_to(listeners: &mut [Listener], event: &MigrationEvent) {
    for listener in listeners.iter_mut() {
        listener(event);
    }
}
