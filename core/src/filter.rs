//! The filter-array model: what callers hand to the compiler.
//!
//! A [`FilterSpec`] describes one search request. Its `filter` list is a
//! flat sequence of [`FilterEntry`] values: brackets that open and close
//! groups, raw SQL clauses with their own bound values, and column clauses
//! of the form `[column, operator, value, logic?]`.
//!
//! Specs can be built in code or parsed from the JSON shape used by
//! application payloads:
//!
//! ```
//! use filterdb_core::{FilterEntry, FilterSpec, LogicOp};
//!
//! let json = serde_json::json!({
//!     "filter": [
//!         ["age", ">", 18],
//!         "(",
//!         ["city", "=", "Berlin"],
//!         ["city", "=", "Paris", "OR"],
//!         ")",
//!         {"sql": "score > ? * 2", "values": [10]}
//!     ],
//!     "order": [["age", "DESC"], "city"],
//!     "limit": [0, 20]
//! });
//! let spec = FilterSpec::try_from(json).unwrap();
//! assert_eq!(spec.filter.len(), 6);
//! assert!(matches!(spec.filter[1], FilterEntry::Open(None)));
//!
//! let built = FilterSpec::new()
//!     .clause("age", ">", 18)
//!     .open()
//!     .clause("city", "=", "Berlin")
//!     .clause_with("city", "=", "Paris", LogicOp::Or)
//!     .close();
//! assert_eq!(built.filter.len(), 5);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::{CoreError, Result};
use crate::value::{SqlValue, Value};

/// An opaque SQL fragment with its own positional bound values.
///
/// Used for correlated subqueries and engine functions the filter grammar
/// cannot express.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClause {
    sql: String,
    values: Vec<SqlValue>,
}

impl RawClause {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    /// Creates a clause with bound values; they must line up with the `?`
    /// placeholders in `sql`, left to right.
    pub fn with_values(sql: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

impl fmt::Display for RawClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Operator joining a clause to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
    Xor,
    Not,
}

impl LogicOp {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
            LogicOp::Xor => "XOR",
            LogicOp::Not => "NOT",
        }
    }

    /// SQL text placed between two clauses. The engine has no `XOR`; the
    /// clauses are parenthesized truth values, so `<>` is equivalent.
    ///
    /// `<>` binds tighter than `AND` and `OR`, so `a AND b XOR c` reads as
    /// `a AND (b XOR c)`. Group with brackets to XOR a conjunction.
    pub(crate) fn joiner(self) -> &'static str {
        match self {
            LogicOp::And => " AND ",
            LogicOp::Or => " OR ",
            LogicOp::Xor => " <> ",
            LogicOp::Not => " AND NOT ",
        }
    }
}

impl FromStr for LogicOp {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(LogicOp::And),
            "OR" => Ok(LogicOp::Or),
            "XOR" => Ok(LogicOp::Xor),
            "NOT" => Ok(LogicOp::Not),
            _ => Err(()),
        }
    }
}

/// Right-hand side of a column clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Raw(RawClause),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<RawClause> for Operand {
    fn from(raw: RawClause) -> Self {
        Operand::Raw(raw)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(
    bool,
    i32,
    i64,
    u32,
    f64,
    String,
    &str,
    chrono::DateTime<chrono::Utc>,
    Vec<Value>,
);

/// A `[column, operator, value, logic?]` clause.
///
/// The operator is kept as written and validated by the compiler, which
/// reports unknown operators together with the clause index.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnClause {
    pub column: String,
    pub operator: String,
    pub operand: Option<Operand>,
    pub logic: Option<LogicOp>,
}

impl ColumnClause {
    pub fn new(
        column: impl Into<String>,
        operator: impl Into<String>,
        operand: impl Into<Operand>,
    ) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            operand: Some(operand.into()),
            logic: None,
        }
    }

    /// A clause without an operand, for unary operators such as `ISNULL`.
    pub fn unary(column: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            operand: None,
            logic: None,
        }
    }

    pub fn with_logic(mut self, logic: LogicOp) -> Self {
        self.logic = Some(logic);
        self
    }
}

/// One element of a filter list.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEntry {
    /// `"("`, optionally carrying the operator that joins the group to what
    /// precedes it.
    Open(Option<LogicOp>),
    /// `")"`.
    Close,
    Raw(RawClause),
    Column(ColumnClause),
}

impl From<ColumnClause> for FilterEntry {
    fn from(clause: ColumnClause) -> Self {
        FilterEntry::Column(clause)
    }
}

impl From<RawClause> for FilterEntry {
    fn from(raw: RawClause) -> Self {
        FilterEntry::Raw(raw)
    }
}

/// Sort direction. Anything other than `DESC` reads as `ASC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("DESC") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub direction: Direction,
}

/// `LIMIT n` or `LIMIT offset, count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(u64),
    Range { offset: u64, count: u64 },
}

/// An entry of the selected column list.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSelector {
    Name(String),
    Raw(RawClause),
}

impl From<&str> for ColumnSelector {
    fn from(name: &str) -> Self {
        ColumnSelector::Name(name.to_string())
    }
}

impl From<String> for ColumnSelector {
    fn from(name: String) -> Self {
        ColumnSelector::Name(name)
    }
}

impl From<RawClause> for ColumnSelector {
    fn from(raw: RawClause) -> Self {
        ColumnSelector::Raw(raw)
    }
}

/// A complete search request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSpec {
    pub filter: Vec<FilterEntry>,
    /// Selected columns; empty selects every registered column.
    pub columns: Vec<ColumnSelector>,
    pub limit: Option<Limit>,
    /// Default joining operator; `AND` when unset.
    pub operator: Option<LogicOp>,
    pub order: Vec<OrderTerm>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `[column, operator, value]` clause.
    pub fn clause(self, column: &str, operator: &str, operand: impl Into<Operand>) -> Self {
        self.entry(ColumnClause::new(column, operator, operand))
    }

    /// Appends a `[column, operator, value, logic]` clause.
    pub fn clause_with(
        self,
        column: &str,
        operator: &str,
        operand: impl Into<Operand>,
        logic: LogicOp,
    ) -> Self {
        self.entry(ColumnClause::new(column, operator, operand).with_logic(logic))
    }

    /// Appends a clause with a unary operator (`ISNULL`, `NOT ISNULL`).
    pub fn unary(self, column: &str, operator: &str) -> Self {
        self.entry(ColumnClause::unary(column, operator))
    }

    pub fn raw(self, clause: RawClause) -> Self {
        self.entry(FilterEntry::Raw(clause))
    }

    pub fn open(self) -> Self {
        self.entry(FilterEntry::Open(None))
    }

    pub fn open_with(self, logic: LogicOp) -> Self {
        self.entry(FilterEntry::Open(Some(logic)))
    }

    pub fn close(self) -> Self {
        self.entry(FilterEntry::Close)
    }

    pub fn entry(mut self, entry: impl Into<FilterEntry>) -> Self {
        self.filter.push(entry.into());
        self
    }

    pub fn select<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnSelector>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push(OrderTerm {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(Limit::Count(count));
        self
    }

    pub fn range(mut self, offset: u64, count: u64) -> Self {
        self.limit = Some(Limit::Range { offset, count });
        self
    }

    pub fn operator(mut self, operator: LogicOp) -> Self {
        self.operator = Some(operator);
        self
    }
}

impl TryFrom<serde_json::Value> for FilterSpec {
    type Error = CoreError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut map) = json else {
            return Err(unsupported(0, "filter spec must be a JSON object"));
        };

        let filter = match map.remove("filter") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => parse_filter(items)?,
            Some(_) => return Err(unsupported(0, "'filter' must be an array")),
        };

        let columns = match map.remove("columns") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::String(list)) => crate::schema::split_comma_list(&list)
                .into_iter()
                .map(ColumnSelector::Name)
                .collect(),
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| match item {
                    serde_json::Value::String(name) => Ok(ColumnSelector::Name(name)),
                    other => parse_raw(idx, &other).map(ColumnSelector::Raw),
                })
                .collect::<Result<_>>()?,
            Some(_) => return Err(unsupported(0, "'columns' must be an array or string")),
        };

        let limit = match map.remove("limit") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Number(n)) => match n.as_u64() {
                Some(count) => Some(Limit::Count(count)),
                None => return Err(unsupported(0, "'limit' must be a non-negative integer")),
            },
            Some(serde_json::Value::Array(pair)) => match pair.as_slice() {
                [offset, count] => match (offset.as_u64(), count.as_u64()) {
                    (Some(offset), Some(count)) => Some(Limit::Range { offset, count }),
                    _ => return Err(unsupported(0, "'limit' must hold non-negative integers")),
                },
                _ => return Err(unsupported(0, "'limit' pair must be [offset, count]")),
            },
            Some(_) => return Err(unsupported(0, "'limit' must be a number or [offset, count]")),
        };

        let operator = map
            .remove("operator")
            .and_then(|op| op.as_str().and_then(|s| s.parse().ok()));

        let order = match map.remove("order") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::String(column)) => vec![OrderTerm {
                column,
                direction: Direction::Asc,
            }],
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(column) => Some(OrderTerm {
                        column,
                        direction: Direction::Asc,
                    }),
                    serde_json::Value::Array(pair) => {
                        let column = pair.first()?.as_str()?.to_string();
                        let direction = pair
                            .get(1)
                            .and_then(|d| d.as_str())
                            .map_or(Direction::Asc, Direction::parse);
                        Some(OrderTerm { column, direction })
                    }
                    _ => None,
                })
                .collect(),
            Some(_) => return Err(unsupported(0, "'order' must be an array or string")),
        };

        Ok(FilterSpec {
            filter,
            columns,
            limit,
            operator,
            order,
        })
    }
}

impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        FilterSpec::try_from(json).map_err(serde::de::Error::custom)
    }
}

/// Parses the `filter` array. A list whose first element is not itself an
/// entry (array, bracket, or raw clause) is one bare clause and is wrapped.
fn parse_filter(items: Vec<serde_json::Value>) -> Result<Vec<FilterEntry>> {
    let is_bare_clause = match items.first() {
        None => false,
        Some(serde_json::Value::String(s)) => !is_bracket(s),
        Some(serde_json::Value::Array(_) | serde_json::Value::Object(_)) => false,
        Some(_) => true,
    };
    if is_bare_clause {
        return Ok(vec![parse_clause(0, items)?]);
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| parse_entry(index, item))
        .collect()
}

fn parse_entry(index: usize, item: serde_json::Value) -> Result<FilterEntry> {
    match item {
        serde_json::Value::String(s) => match s.trim() {
            "(" => Ok(FilterEntry::Open(None)),
            ")" => Ok(FilterEntry::Close),
            other => Err(unsupported(index, &format!("unexpected string '{other}'"))),
        },
        serde_json::Value::Array(parts) => {
            if let Some(serde_json::Value::String(first)) = parts.first() {
                match first.trim() {
                    "(" => {
                        let logic = parts.get(1).and_then(|l| l.as_str()?.parse().ok());
                        return Ok(FilterEntry::Open(logic));
                    }
                    ")" => return Ok(FilterEntry::Close),
                    _ => {}
                }
            }
            parse_clause(index, parts)
        }
        serde_json::Value::Object(_) => parse_raw(index, &item).map(FilterEntry::Raw),
        other => Err(unsupported(index, &format!("unexpected value {other}"))),
    }
}

fn parse_clause(index: usize, parts: Vec<serde_json::Value>) -> Result<FilterEntry> {
    if !(2..=4).contains(&parts.len()) {
        return Err(unsupported(
            index,
            &format!("clause must have 2 to 4 elements, found {}", parts.len()),
        ));
    }
    let mut parts = parts.into_iter();
    let column = match parts.next() {
        Some(serde_json::Value::String(column)) => column,
        _ => return Err(unsupported(index, "clause column must be a string")),
    };
    let operator = match parts.next() {
        Some(serde_json::Value::String(operator)) => operator,
        _ => return Err(unsupported(index, "clause operator must be a string")),
    };
    let operand = match parts.next() {
        None => None,
        Some(value @ serde_json::Value::Object(_)) if is_raw_object(&value) => {
            Some(Operand::Raw(parse_raw(index, &value)?))
        }
        Some(value) => Some(Operand::Value(Value::from(value))),
    };
    let logic = parts
        .next()
        .and_then(|l| l.as_str().and_then(|s| s.parse().ok()));
    Ok(FilterEntry::Column(ColumnClause {
        column,
        operator,
        operand,
        logic,
    }))
}

fn is_raw_object(value: &serde_json::Value) -> bool {
    value.get("sql").is_some_and(serde_json::Value::is_string)
}

fn parse_raw(index: usize, value: &serde_json::Value) -> Result<RawClause> {
    let sql = value
        .get("sql")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| unsupported(index, "raw clause needs a string 'sql' field"))?;
    let values = match value.get("values") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(values)) => values.iter().map(SqlValue::from_json).collect(),
        Some(_) => return Err(unsupported(index, "raw clause 'values' must be an array")),
    };
    Ok(RawClause::with_values(sql, values))
}

fn is_bracket(s: &str) -> bool {
    matches!(s.trim(), "(" | ")")
}

fn unsupported(index: usize, reason: &str) -> CoreError {
    CoreError::UnsupportedFilterEntry {
        index,
        reason: reason.to_string(),
    }
}
