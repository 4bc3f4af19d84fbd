//! Error types for schema registration, value encoding, and filter
//! compilation.
//!
//! Every variant raised here is synchronous: it is detected at call time,
//! before any statement reaches the engine.

use thiserror::Error;

/// Errors raised by the schema registry, the value codec, and the filter
/// compiler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A table, column, index, or trigger name was empty or contained
    /// characters other than alphanumerics and underscores.
    #[error("invalid {kind} name '{name}': must be non-empty and contain only alphanumeric characters and underscores")]
    InvalidName {
        /// What was being named (`"table"`, `"column"`, `"index"`, `"trigger"`).
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// The table has not been registered.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The column is not registered on the table.
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn {
        /// Table the lookup was made against.
        table: String,
        /// Offending column name.
        column: String,
    },

    /// A filter clause named an operator outside the operator table.
    #[error("unknown operator '{operator}' in filter entry {index}")]
    UnknownOperator {
        /// Position of the entry inside the filter list.
        index: usize,
        /// Operator as supplied by the caller.
        operator: String,
    },

    /// An operand has the wrong arity or shape for its operator.
    #[error("invalid operand for {operator} in filter entry {index}: {reason}")]
    InvalidOperand {
        /// Position of the entry inside the filter list.
        index: usize,
        /// Normalized operator.
        operator: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// A filter entry could not be classified or breaks bracket structure.
    #[error("unsupported filter entry {index}: {reason}")]
    UnsupportedFilterEntry {
        /// Position of the entry inside the filter list.
        index: usize,
        /// Human-readable explanation.
        reason: String,
    },

    /// The value has no bound-parameter representation.
    #[error("value cannot be encoded as a bound parameter: {0}")]
    UnencodableValue(String),

    /// The registry has been locked by an executed migration engine.
    #[error("schema is locked; cannot modify table '{0}' after migrations have executed")]
    SchemaLocked(String),
}

/// Convenience alias for results with [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;
