//! Core types for the filterdb store: schema registry, values, and the
//! filter compiler.
//!
//! This crate has no engine dependency. It defines:
//!
//! - [`SchemaRegistry`] for tables, columns, indexes, and triggers, with
//!   timestamp-column injection.
//! - [`Value`], [`SqlValue`], and [`Record`], plus the [`codec`] that maps
//!   dates to and from their stored form.
//! - [`FilterSpec`], the filter-array model, parseable from JSON.
//! - [`FilterCompiler`], which turns a spec into parameterized SQL.
//!
//! Every error is a [`CoreError`] raised before anything reaches the engine.
//!
//! # Example
//!
//! ```
//! use filterdb_core::*;
//!
//! let mut registry = SchemaRegistry::default();
//! registry
//!     .add_table("user", vec![("id", "INTEGER", ""), ("name", "TEXT", "")], Vec::new())
//!     .unwrap();
//!
//! let spec = FilterSpec::new()
//!     .clause("id", "IN", "1,2,3")
//!     .order_by("name", Direction::Asc);
//! let query = FilterCompiler::new(&registry).compile_select("user", &spec).unwrap();
//!
//! assert_eq!(query.sql, "SELECT id, name FROM user WHERE (id IN (?, ?, ?)) ORDER BY name ASC");
//! assert_eq!(query.values.len(), query.placeholder_count());
//! ```

pub mod codec;
mod compiler;
mod error;
mod filter;
mod schema;
mod value;

pub use compiler::{CompiledQuery, FilterCompiler, Operator, count_placeholders};
pub use error::{CoreError, Result};
pub use filter::{
    ColumnClause, ColumnSelector, Direction, FilterEntry, FilterSpec, Limit, LogicOp, Operand,
    OrderTerm, RawClause,
};
pub use schema::{
    Affinity, ColumnDefinition, ColumnList, IndexDefinition, RegistryOptions, SchemaRegistry,
    TableConstraint, TableDefinition, TriggerDefinition, validate_identifier,
};
pub use value::{Record, SqlValue, Value};
