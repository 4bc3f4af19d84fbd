//! Host values, engine values, and ordered records.
//!
//! [`Value`] is what application code hands to the compiler and receives
//! back from searches. [`SqlValue`] is the engine's bound-parameter
//! representation, produced by the [`codec`](crate::codec).

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number};

/// A host-side value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(DateTime<Utc>),
    /// Only meaningful as the operand of a list operator (`IN`, `BETWEEN`, ...).
    List(Vec<Value>),
    /// A structured value with no string conversion; never encodable.
    Object(Map<String, serde_json::Value>),
}

impl Value {
    /// Wraps anything with a string conversion as a text value.
    pub fn from_display(value: impl fmt::Display) -> Self {
        Value::Text(value.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the date payload, if this is a date.
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Short type label used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    /// Converts to JSON for display and interchange. Dates become RFC 3339
    /// strings and blobs become arrays of bytes.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(bytes) => blob_to_json(bytes),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(map.clone()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(map),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$cast>::from(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool as bool,
    i32 => Integer as i64,
    i64 => Integer as i64,
    u32 => Integer as i64,
    f32 => Real as f64,
    f64 => Real as f64,
    String => Text as String,
    &str => Text as String,
    &[u8] => Blob as Vec<u8>,
    DateTime<Utc> => Date as DateTime<Utc>,
    Vec<Value> => List as Vec<Value>,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A value in the engine's bound-parameter representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Converts to JSON for dump documents.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Integer(i) => serde_json::Value::from(*i),
            SqlValue::Real(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Blob(bytes) => blob_to_json(bytes),
        }
    }

    /// Reads a value from a dump document. Arrays of bytes become blobs;
    /// booleans become 0/1; nested objects are stored as their JSON text.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect();
                match bytes {
                    Some(bytes) => SqlValue::Blob(bytes),
                    None => SqlValue::Text(json.to_string()),
                }
            }
            serde_json::Value::Object(_) => SqlValue::Text(json.to_string()),
        }
    }
}

impl From<SqlValue> for Value {
    fn from(v: SqlValue) -> Self {
        match v {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(f) => Value::Real(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Blob(b),
        }
    }
}

fn blob_to_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
}

/// An ordered set of named values: one result row, or the fields of a
/// record to write.
///
/// Lookups by column name are ASCII case-insensitive, matching the
/// engine's identifier rules.
///
/// # Examples
///
/// ```
/// use filterdb_core::{Record, Value};
///
/// let record = Record::new().with("name", "Ada").with("age", 36);
/// assert_eq!(record.get("NAME"), Some(&Value::Text("Ada".into())));
/// assert_eq!(record.columns().collect::<Vec<_>>(), ["name", "age"]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a field, replacing an existing field of the same name in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.position(&column) {
            Some(idx) => self.fields[idx].1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|idx| &self.fields[idx].1)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.position(column).map(move |idx| &mut self.fields[idx].1)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.position(column).map(|idx| self.fields.remove(idx).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Converts to a JSON object, preserving field order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = Map::new();
        for (column, value) in &self.fields {
            map.insert(column.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(c, _)| c.eq_ignore_ascii_case(column))
    }
}

impl<C: Into<String>, V: Into<Value>> FromIterator<(C, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (C, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
