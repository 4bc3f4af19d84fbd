//! In-memory schema registry: tables, columns, indexes, and triggers.
//!
//! The registry is the single source of truth for column validation in the
//! [`FilterCompiler`](crate::FilterCompiler) and for the DDL that init
//! migrations run. Registration is idempotent: re-adding a table or column
//! overwrites the previous definition in place, so setup code can run on
//! every start.
//!
//! # Timestamp columns
//!
//! A column whose name matches the configured create or change column is
//! treated as temporal: its type becomes the configured timestamp type and,
//! unless constraints are given, it defaults to the engine's current time.
//! Registering the change column also synthesizes an `AFTER UPDATE`
//! trigger that refreshes it.
//!
//! # Example
//!
//! ```
//! use filterdb_core::{ColumnDefinition, SchemaRegistry, TableConstraint};
//!
//! let mut registry = SchemaRegistry::default();
//! registry
//!     .add_table(
//!         "user",
//!         vec![
//!             ColumnDefinition::new("id", "INTEGER", "PRIMARY KEY"),
//!             ColumnDefinition::new("email", "TEXT", "NOT NULL"),
//!             ColumnDefinition::new("changed", "", ""),
//!         ],
//!         vec![TableConstraint::index("user_email", "email", true)],
//!     )
//!     .unwrap();
//!
//! assert_eq!(registry.get_columns("user").unwrap(), ["id", "email", "changed"]);
//! assert!(registry.column("user", "changed").unwrap().is_temporal());
//! assert_eq!(registry.triggers().count(), 1);
//! ```

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{CoreError, Result};
use crate::value::{Record, SqlValue};

/// One of the engine's storage-type classes, derived from a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Affinity {
    Integer,
    Text,
    /// `NONE`/`BLOB` affinity: values are stored as given.
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Classifies a declared column type by substring, in the engine's
    /// priority order: `INT`, then `CHAR`/`CLOB`/`TEXT`, then `BLOB` (or no
    /// type), then `REAL`/`FLOA`/`DOUB`, else `NUMERIC`.
    ///
    /// # Examples
    ///
    /// ```
    /// use filterdb_core::Affinity;
    ///
    /// assert_eq!(Affinity::from_declared_type("BIGINT"), Affinity::Integer);
    /// assert_eq!(Affinity::from_declared_type("varchar(20)"), Affinity::Text);
    /// assert_eq!(Affinity::from_declared_type("DOUBLE PRECISION"), Affinity::Real);
    /// assert_eq!(Affinity::from_declared_type("DATETIME"), Affinity::Numeric);
    /// ```
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Affinity::Integer
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            Affinity::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            Affinity::Blob
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| upper.contains(t)) {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Text => "TEXT",
            Affinity::Blob => "BLOB",
            Affinity::Real => "REAL",
            Affinity::Numeric => "NUMERIC",
        }
    }

    /// SQL expression for "now" stored in this affinity.
    pub fn now_expression(self) -> &'static str {
        match self {
            Affinity::Integer => "CAST(strftime('%s', 'now') AS INTEGER)",
            Affinity::Text | Affinity::Blob => "datetime('now')",
            Affinity::Real | Affinity::Numeric => "julianday('now')",
        }
    }
}

/// Controls timestamp column handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOptions {
    /// Column name that records row creation time.
    pub create_column: Option<String>,
    /// Column name that records last change time.
    pub change_column: Option<String>,
    /// Declared type used for timestamp storage.
    pub timestamp_type: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            create_column: Some("created".to_string()),
            change_column: Some("changed".to_string()),
            timestamp_type: "INTEGER".to_string(),
        }
    }
}

/// A column: name, declared type, and constraint text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub declared_type: String,
    pub constraints: String,
    #[serde(default)]
    temporal: bool,
}

impl ColumnDefinition {
    pub fn new(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        constraints: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            declared_type: declared_type.into().trim().to_string(),
            constraints: constraints.into().trim().to_string(),
            temporal: false,
        }
    }

    /// Whether the column holds a date: a configured timestamp column, or a
    /// declared type mentioning `DATE` or `TIME`.
    pub fn is_temporal(&self) -> bool {
        self.temporal
    }

    /// Affinity of the declared type.
    pub fn affinity(&self) -> Affinity {
        Affinity::from_declared_type(&self.declared_type)
    }

    /// Column definition as it appears inside `CREATE TABLE`.
    pub fn sql(&self) -> String {
        [self.name.as_str(), &self.declared_type, &self.constraints]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl<N: Into<String>, T: Into<String>, C: Into<String>> From<(N, T, C)> for ColumnDefinition {
    fn from((name, declared_type, constraints): (N, T, C)) -> Self {
        ColumnDefinition::new(name, declared_type, constraints)
    }
}

/// A table constraint as passed to [`SchemaRegistry::add_table`].
///
/// `Index` entries are split out into the index registry; `Sql` entries
/// are emitted verbatim inside `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableConstraint {
    Sql(String),
    Index {
        name: String,
        columns: Vec<String>,
        unique: bool,
    },
}

impl TableConstraint {
    pub fn sql(text: impl Into<String>) -> Self {
        TableConstraint::Sql(text.into())
    }

    pub fn index(name: impl Into<String>, columns: impl Into<ColumnList>, unique: bool) -> Self {
        TableConstraint::Index {
            name: name.into(),
            columns: columns.into().0,
            unique,
        }
    }
}

/// A list of column names, from a slice or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnList(pub Vec<String>);

impl From<&str> for ColumnList {
    fn from(list: &str) -> Self {
        ColumnList(split_comma_list(list))
    }
}

impl From<String> for ColumnList {
    fn from(list: String) -> Self {
        ColumnList::from(list.as_str())
    }
}

impl From<Vec<String>> for ColumnList {
    fn from(list: Vec<String>) -> Self {
        ColumnList(list)
    }
}

impl From<&[&str]> for ColumnList {
    fn from(list: &[&str]) -> Self {
        ColumnList(list.iter().map(|c| c.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ColumnList {
    fn from(list: [&str; N]) -> Self {
        ColumnList(list.iter().map(|c| c.to_string()).collect())
    }
}

/// Splits a comma-separated list, trimming whitespace around each element.
pub(crate) fn split_comma_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

/// A registered index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// A registered trigger and its full `CREATE TRIGGER` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub name: String,
    pub table: String,
    pub sql: String,
}

/// A registered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub constraints: Vec<String>,
    pub triggers: Vec<String>,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        let name = name.trim();
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_sql(&self) -> String {
        let body: Vec<String> = self
            .columns
            .iter()
            .map(ColumnDefinition::sql)
            .chain(self.constraints.iter().cloned())
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            body.join(", ")
        )
    }
}

/// Registry of table, index, and trigger definitions.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    options: RegistryOptions,
    tables: Vec<TableDefinition>,
    indexes: Vec<IndexDefinition>,
    triggers: Vec<TriggerDefinition>,
    locked: bool,
}

impl SchemaRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Registers a table, replacing any previous definition of the same name.
    /// On error the registry is left as it was.
    ///
    /// `Index` constraints are moved into the index registry; the remaining
    /// constraints are kept as literal SQL fragments.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] for an empty or non-identifier
    /// table or column name, [`CoreError::UnknownColumn`] if an index
    /// constraint names a column the table lacks, and
    /// [`CoreError::SchemaLocked`] once migrations have executed.
    pub fn add_table<C, K>(&mut self, name: &str, columns: C, constraints: K) -> Result<()>
    where
        C: IntoIterator,
        C::Item: Into<ColumnDefinition>,
        K: IntoIterator<Item = TableConstraint>,
    {
        let name = name.trim();
        validate_identifier("table", name)?;
        self.ensure_unlocked(name)?;
        self.staged(|registry| registry.replace_table(name, columns, constraints))
    }

    fn replace_table<C, K>(&mut self, name: &str, columns: C, constraints: K) -> Result<()>
    where
        C: IntoIterator,
        C::Item: Into<ColumnDefinition>,
        K: IntoIterator<Item = TableConstraint>,
    {
        let table = TableDefinition {
            name: name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
            triggers: Vec::new(),
        };
        match self.table_position(name) {
            Some(idx) => self.tables[idx] = table,
            None => self.tables.push(table),
        }
        self.triggers.retain(|t| !t.table.eq_ignore_ascii_case(name));

        for column in columns {
            self.put_column(name, column.into())?;
        }

        // Drop indexes that refer to columns the new definition no longer has.
        if let Some(idx) = self.table_position(name) {
            let def = &self.tables[idx];
            self.indexes.retain(|i| {
                !i.table.eq_ignore_ascii_case(name)
                    || i.columns.iter().all(|c| def.column(c).is_some())
            });
        }
        self.replace_constraints(name, constraints)
    }

    /// Sets one or more columns on a registered table. Existing columns keep
    /// their position; new columns are appended.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTable`] if the table is not registered.
    pub fn set_columns<C>(&mut self, table: &str, columns: C) -> Result<()>
    where
        C: IntoIterator,
        C::Item: Into<ColumnDefinition>,
    {
        let table = table.trim();
        self.require_table(table)?;
        self.ensure_unlocked(table)?;
        self.staged(|registry| {
            for column in columns {
                registry.put_column(table, column.into())?;
            }
            Ok(())
        })
    }

    /// Shorthand for setting a single column.
    pub fn set_column(
        &mut self,
        table: &str,
        name: &str,
        declared_type: &str,
        constraints: &str,
    ) -> Result<()> {
        self.set_columns(table, [ColumnDefinition::new(name, declared_type, constraints)])
    }

    /// Replaces the literal constraints of a table. `Index` entries are
    /// registered as indexes.
    ///
    /// Nothing changes if any index is rejected.
    pub fn set_table_constraints<K>(&mut self, table: &str, constraints: K) -> Result<()>
    where
        K: IntoIterator<Item = TableConstraint>,
    {
        let table = table.trim();
        self.require_table(table)?;
        self.ensure_unlocked(table)?;
        self.staged(|registry| registry.replace_constraints(table, constraints))
    }

    fn replace_constraints<K>(&mut self, table: &str, constraints: K) -> Result<()>
    where
        K: IntoIterator<Item = TableConstraint>,
    {
        let idx = self.require_table(table)?;
        let mut literal = Vec::new();
        let mut indexes = Vec::new();
        for constraint in constraints {
            match constraint {
                TableConstraint::Sql(sql) => literal.push(sql.trim().to_string()),
                TableConstraint::Index {
                    name,
                    columns,
                    unique,
                } => indexes.push((name, columns, unique)),
            }
        }
        self.tables[idx].constraints = literal;
        for (name, columns, unique) in indexes {
            self.add_index(&name, table, columns, unique)?;
        }
        Ok(())
    }

    /// Registers an index, replacing any index of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownColumn`] naming the first column that is
    /// not registered on the table.
    pub fn add_index(
        &mut self,
        name: &str,
        table: &str,
        columns: impl Into<ColumnList>,
        unique: bool,
    ) -> Result<()> {
        let name = name.trim();
        let table = table.trim();
        validate_identifier("index", name)?;
        self.ensure_unlocked(table)?;
        let columns = columns.into().0;
        if columns.is_empty() {
            return Err(CoreError::InvalidName {
                kind: "index column",
                name: String::new(),
            });
        }
        self.check_columns(table, &columns)?;

        let canonical = self.canonical_columns(table, &columns);
        let index = IndexDefinition {
            name: name.to_string(),
            table: self.tables[self.require_table(table)?].name.clone(),
            columns: canonical,
            unique,
        };
        match self
            .indexes
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
        {
            Some(idx) => self.indexes[idx] = index,
            None => self.indexes.push(index),
        }
        Ok(())
    }

    /// Registers a trigger given its full `CREATE TRIGGER` statement.
    pub fn add_trigger(&mut self, name: &str, table: &str, sql: &str) -> Result<()> {
        let name = name.trim();
        let table = table.trim();
        validate_identifier("trigger", name)?;
        let idx = self.require_table(table)?;
        self.ensure_unlocked(table)?;

        let trigger = TriggerDefinition {
            name: name.to_string(),
            table: self.tables[idx].name.clone(),
            sql: sql.trim().to_string(),
        };
        match self
            .triggers
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
        {
            Some(pos) => self.triggers[pos] = trigger,
            None => self.triggers.push(trigger),
        }
        let names = &mut self.tables[idx].triggers;
        if !names.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
        Ok(())
    }

    /// Ordered column names of a table.
    pub fn get_columns(&self, table: &str) -> Result<Vec<&str>> {
        Ok(self.tables[self.require_table(table.trim())?].column_names())
    }

    /// A single column definition, if both table and column exist.
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnDefinition> {
        self.table(table).and_then(|t| t.column(column))
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.table_position(name.trim()).map(|idx| &self.tables[idx])
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.iter()
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.indexes.iter()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &TriggerDefinition> {
        self.triggers.iter()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn column_exists(&self, table: &str, column: &str) -> bool {
        self.column(table, column).is_some()
    }

    /// Verifies that every column exists on the table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTable`] if the table is not registered,
    /// or [`CoreError::UnknownColumn`] naming the first missing column.
    pub fn check_columns<S: AsRef<str>>(&self, table: &str, columns: &[S]) -> Result<()> {
        let def = &self.tables[self.require_table(table.trim())?];
        for column in columns {
            let column = column.as_ref().trim();
            if def.column(column).is_none() {
                return Err(CoreError::UnknownColumn {
                    table: def.name.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Storage affinity of a column. Temporal columns always use the
    /// configured timestamp type's affinity.
    pub fn storage_affinity(&self, table: &str, column: &str) -> Option<Affinity> {
        self.column(table, column).map(|c| {
            if c.is_temporal() {
                self.timestamp_affinity()
            } else {
                c.affinity()
            }
        })
    }

    pub fn timestamp_affinity(&self) -> Affinity {
        Affinity::from_declared_type(&self.options.timestamp_type)
    }

    /// Builds a record from a raw result row, decoding temporal columns of
    /// `table` back into dates.
    pub fn decode_row(&self, table: &str, columns: &[String], row: Vec<SqlValue>) -> Record {
        let def = self.table(table);
        columns
            .iter()
            .zip(row)
            .map(|(name, raw)| {
                let value = match def.and_then(|t| t.column(name)) {
                    Some(col) if col.is_temporal() => codec::decode(
                        raw,
                        self.storage_affinity(table, name).unwrap_or(Affinity::Numeric),
                    ),
                    _ => raw.into(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// `CREATE TABLE` statement for a registered table.
    pub fn create_table_sql(&self, table: &str) -> Result<String> {
        Ok(self.tables[self.require_table(table.trim())?].create_sql())
    }

    /// DDL for one table: the table, then its indexes, then its triggers.
    pub fn create_statements_for(&self, table: &str) -> Result<Vec<String>> {
        let def = &self.tables[self.require_table(table.trim())?];
        let mut statements = vec![def.create_sql()];
        statements.extend(
            self.indexes
                .iter()
                .filter(|i| i.table.eq_ignore_ascii_case(&def.name))
                .map(IndexDefinition::create_sql),
        );
        statements.extend(
            self.triggers
                .iter()
                .filter(|t| t.table.eq_ignore_ascii_case(&def.name))
                .map(|t| t.sql.clone()),
        );
        Ok(statements)
    }

    /// DDL for the whole registry: all tables, then all indexes, then all
    /// triggers, each in registration order.
    pub fn create_statements(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(TableDefinition::create_sql)
            .chain(self.indexes.iter().map(IndexDefinition::create_sql))
            .chain(self.triggers.iter().map(|t| t.sql.clone()))
            .collect()
    }

    /// Freezes the registry. Every later mutation fails with
    /// [`CoreError::SchemaLocked`].
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Applies a multi-step change to a copy and keeps it only on success.
    fn staged(&mut self, apply: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let mut staged = self.clone();
        apply(&mut staged)?;
        *self = staged;
        Ok(())
    }

    fn ensure_unlocked(&self, table: &str) -> Result<()> {
        if self.locked {
            return Err(CoreError::SchemaLocked(table.to_string()));
        }
        Ok(())
    }

    fn table_position(&self, name: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn require_table(&self, name: &str) -> Result<usize> {
        self.table_position(name)
            .ok_or_else(|| CoreError::UnknownTable(name.to_string()))
    }

    fn canonical_columns(&self, table: &str, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .map(|c| {
                self.column(table, c)
                    .map_or_else(|| c.trim().to_string(), |def| def.name.clone())
            })
            .collect()
    }

    fn is_create_column(&self, name: &str) -> bool {
        matches!(&self.options.create_column, Some(c) if c.eq_ignore_ascii_case(name))
    }

    fn is_change_column(&self, name: &str) -> bool {
        matches!(&self.options.change_column, Some(c) if c.eq_ignore_ascii_case(name))
    }

    /// Inserts or replaces a column, applying timestamp injection.
    fn put_column(&mut self, table: &str, mut column: ColumnDefinition) -> Result<()> {
        validate_identifier("column", &column.name)?;
        let idx = self.require_table(table)?;

        let is_timestamp =
            self.is_create_column(&column.name) || self.is_change_column(&column.name);
        if is_timestamp {
            if column.declared_type.is_empty() {
                column.declared_type = self.options.timestamp_type.clone();
            }
            if column.constraints.is_empty() {
                column.constraints = format!(
                    "NOT NULL DEFAULT ({})",
                    self.timestamp_affinity().now_expression()
                );
            }
        }
        let upper = column.declared_type.to_ascii_uppercase();
        column.temporal = is_timestamp || upper.contains("DATE") || upper.contains("TIME");

        let table_name = self.tables[idx].name.clone();
        let columns = &mut self.tables[idx].columns;
        match columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(&column.name))
        {
            Some(pos) => columns[pos] = column.clone(),
            None => columns.push(column.clone()),
        }

        if self.is_change_column(&column.name) {
            let trigger = format!("{table_name}_{}_touch", column.name);
            let sql = format!(
                "CREATE TRIGGER IF NOT EXISTS {trigger} AFTER UPDATE ON {table_name} \
                 FOR EACH ROW WHEN NEW.{col} IS OLD.{col} \
                 BEGIN UPDATE {table_name} SET {col} = {now} WHERE rowid = NEW.rowid; END",
                col = column.name,
                now = self.timestamp_affinity().now_expression(),
            );
            self.add_trigger(&trigger, &table_name, &sql)?;
        }
        Ok(())
    }
}

/// Validates that a name is non-empty and contains only alphanumeric
/// characters and underscores.
pub fn validate_identifier(kind: &'static str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(CoreError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}
