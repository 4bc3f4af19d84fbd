//! Conversion between [`SqlValue`] and rusqlite's value types.

use filterdb_core::SqlValue;
use rusqlite::types::{Value as EngineValue, ValueRef};

/// Converts a bound value for rusqlite.
pub(crate) fn to_engine(value: &SqlValue) -> EngineValue {
    match value {
        SqlValue::Null => EngineValue::Null,
        SqlValue::Integer(i) => EngineValue::Integer(*i),
        SqlValue::Real(f) => EngineValue::Real(*f),
        SqlValue::Text(s) => EngineValue::Text(s.clone()),
        SqlValue::Blob(b) => EngineValue::Blob(b.clone()),
    }
}

pub(crate) fn to_engine_params(values: &[SqlValue]) -> Vec<EngineValue> {
    values.iter().map(to_engine).collect()
}

/// Reads a column value. Text that is not valid UTF-8 is converted lossily.
pub(crate) fn from_engine(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}
