//! Conversion between host [`Value`]s and engine [`SqlValue`]s.
//!
//! The engine has no native date type. Dates written into, or compared
//! against, a temporal column are encoded for that column's storage
//! affinity (epoch seconds, datetime text, or Julian day) and decoded back
//! on read. Any other date parameter is bound as ISO-8601 text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{CoreError, Result};
use crate::schema::Affinity;
use crate::value::{SqlValue, Value};

/// Julian day number of the Unix epoch.
pub const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Text layout the engine's `datetime()` function produces.
pub const ENGINE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Encodes a scalar value as a bound parameter.
///
/// Dates become ISO-8601 text and booleans become `0`/`1`. Lists and
/// objects have no scalar representation.
///
/// # Examples
///
/// ```
/// use filterdb_core::{codec, SqlValue, Value};
///
/// assert_eq!(codec::encode(&Value::Bool(true)).unwrap(), SqlValue::Integer(1));
/// assert!(codec::encode(&Value::List(vec![])).is_err());
/// ```
pub fn encode(value: &Value) -> Result<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Integer(i) => Ok(SqlValue::Integer(*i)),
        Value::Real(f) => Ok(SqlValue::Real(*f)),
        Value::Text(s) => Ok(SqlValue::Text(s.clone())),
        Value::Blob(b) => Ok(SqlValue::Blob(b.clone())),
        Value::Date(d) => Ok(SqlValue::Text(iso8601(d))),
        Value::List(items) => Err(CoreError::UnencodableValue(format!(
            "list of {} element(s) outside a list operator",
            items.len()
        ))),
        Value::Object(map) => Err(CoreError::UnencodableValue(format!(
            "object with keys [{}] has no string conversion",
            map.keys().cloned().collect::<Vec<_>>().join(", ")
        ))),
    }
}

/// Encodes a list operand, flattening nested lists in order.
pub fn encode_list(values: &[Value]) -> Result<Vec<SqlValue>> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::List(inner) => out.extend(encode_list(inner)?),
            other => out.push(encode(other)?),
        }
    }
    Ok(out)
}

/// Encodes a value for storage in a column with the given affinity.
///
/// Only dates depend on the affinity; everything else goes through
/// [`encode`].
pub fn encode_for_affinity(value: &Value, affinity: Affinity) -> Result<SqlValue> {
    let Value::Date(date) = value else {
        return encode(value);
    };
    Ok(match affinity {
        Affinity::Integer => SqlValue::Integer(date.timestamp()),
        Affinity::Text => SqlValue::Text(date.format(ENGINE_DATETIME_FORMAT).to_string()),
        Affinity::Real | Affinity::Numeric => SqlValue::Real(julian_day(date)),
        Affinity::Blob => SqlValue::Text(iso8601(date)),
    })
}

/// Decodes a stored temporal value using its column's storage affinity.
///
/// - INTEGER: Unix epoch seconds. `0` stays the integer `0` so that an
///   "unset" sentinel survives a round trip.
/// - TEXT: the engine's datetime text; `/` date separators are accepted.
/// - REAL/NUMERIC: a Julian day number.
///
/// A column declared with TEXT affinity but storing a numeric timestamp
/// type holds its numbers as text; those are read as numbers first.
/// Values that do not parse are returned unchanged.
pub fn decode(raw: SqlValue, affinity: Affinity) -> Value {
    match (affinity, raw) {
        (_, SqlValue::Null) => Value::Null,
        (Affinity::Integer, SqlValue::Integer(0)) => Value::Integer(0),
        (Affinity::Integer, SqlValue::Integer(secs)) => {
            DateTime::from_timestamp(secs, 0).map_or(Value::Integer(secs), Value::Date)
        }
        (Affinity::Integer, SqlValue::Real(secs)) => {
            from_epoch_seconds(secs).map_or(Value::Real(secs), Value::Date)
        }
        (Affinity::Real | Affinity::Numeric, SqlValue::Real(day)) => {
            from_julian_day(day).map_or(Value::Real(day), Value::Date)
        }
        (Affinity::Real | Affinity::Numeric, SqlValue::Integer(day)) => {
            from_julian_day(day as f64).map_or(Value::Integer(day), Value::Date)
        }
        (Affinity::Integer | Affinity::Real | Affinity::Numeric, SqlValue::Text(text)) => {
            match numeric_text(&text) {
                Some(number) => decode(number, affinity),
                None => parse_datetime(&text).map_or(Value::Text(text), Value::Date),
            }
        }
        (_, SqlValue::Text(text)) => parse_datetime(&text).map_or(Value::Text(text), Value::Date),
        (_, other) => other.into(),
    }
}

/// Parses the datetime layouts the engine and [`encode`] produce.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let normalized = text.replace('/', "-");
    for layout in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn numeric_text(text: &str) -> Option<SqlValue> {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Some(SqlValue::Integer(int));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(SqlValue::Real)
}

/// Converts a date to a Julian day number.
pub fn julian_day(date: &DateTime<Utc>) -> f64 {
    date.timestamp_millis() as f64 / (SECONDS_PER_DAY * 1000.0) + UNIX_EPOCH_JULIAN_DAY
}

fn from_julian_day(day: f64) -> Option<DateTime<Utc>> {
    from_epoch_seconds((day - UNIX_EPOCH_JULIAN_DAY) * SECONDS_PER_DAY)
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

fn iso8601(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}
