//! Compiles [`FilterSpec`]s into parameterized SQL.
//!
//! The compiler makes a single left-to-right pass over the filter list.
//! Every clause is wrapped in parentheses and joined to its predecessor by
//! its own logic operator, the `FilterSpec` default operator, or `AND`. Brackets
//! open and close groups; the joiner is suppressed at the start of the
//! filter and directly after an opening bracket. Values are bound
//! positionally: the `n`th `?` in the output corresponds to the `n`th
//! element of [`CompiledQuery::values`].
//!
//! The same `WHERE` builder backs `SELECT`, `SELECT COUNT(*)`, `DELETE`,
//! and `UPDATE` statements.
//!
//! # Example
//!
//! ```
//! use filterdb_core::{FilterCompiler, FilterSpec, SchemaRegistry, SqlValue};
//!
//! let mut registry = SchemaRegistry::default();
//! registry
//!     .add_table("user", vec![("age", "INTEGER", ""), ("city", "TEXT", "")], Vec::new())
//!     .unwrap();
//!
//! let spec = FilterSpec::new()
//!     .clause("age", ">", 18)
//!     .clause("city", "=", "Berlin");
//! let query = FilterCompiler::new(&registry).compile_select("user", &spec).unwrap();
//!
//! assert_eq!(query.sql, "SELECT age, city FROM user WHERE (age > ?) AND (city = ?)");
//! assert_eq!(query.values, [SqlValue::Integer(18), SqlValue::Text("Berlin".into())]);
//! ```

use tracing::debug;

use crate::codec;
use crate::error::{CoreError, Result};
use crate::filter::{
    ColumnClause, ColumnSelector, FilterEntry, FilterSpec, Limit, LogicOp, Operand, RawClause,
};
use crate::schema::{
    Affinity, SchemaRegistry, TableDefinition, split_comma_list, validate_identifier,
};
use crate::value::{Record, SqlValue, Value};

/// SQL text plus its positional bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl CompiledQuery {
    /// A statement without bound values.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    /// Number of `?` placeholders in the SQL text.
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.sql)
    }
}

/// Counts `?` placeholders outside quoted literals and identifiers.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '[' => quote = Some(']'),
                '?' => count += 1,
                _ => {}
            },
        }
    }
    count
}

/// A recognized filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`, `==`, `!=`, `<>`, `<`, `<=`, `>`, `>=`.
    Compare(&'static str),
    Like,
    NotLike,
    /// `REGEXP` or `RLIKE`.
    Regexp,
    Between,
    NotBetween,
    In,
    NotIn,
    IsNull,
    NotIsNull,
    Exists,
    NotExists,
    All,
    Any,
}

impl Operator {
    /// Parses an operator, ignoring case and repeated whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" => Operator::Compare("="),
            "==" => Operator::Compare("=="),
            "!=" => Operator::Compare("!="),
            "<>" => Operator::Compare("<>"),
            "<" => Operator::Compare("<"),
            "<=" => Operator::Compare("<="),
            ">" => Operator::Compare(">"),
            ">=" => Operator::Compare(">="),
            "LIKE" => Operator::Like,
            "NOT LIKE" => Operator::NotLike,
            "REGEXP" | "RLIKE" => Operator::Regexp,
            "BETWEEN" => Operator::Between,
            "NOT BETWEEN" => Operator::NotBetween,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "ISNULL" => Operator::IsNull,
            "NOT ISNULL" => Operator::NotIsNull,
            "EXISTS" => Operator::Exists,
            "NOT EXISTS" => Operator::NotExists,
            "ALL" => Operator::All,
            "ANY" => Operator::Any,
            _ => return None,
        };
        Some(op)
    }

    /// SQL spelling of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Compare(op) => op,
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Regexp => "REGEXP",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "ISNULL",
            Operator::NotIsNull => "NOT ISNULL",
            Operator::Exists => "EXISTS",
            Operator::NotExists => "NOT EXISTS",
            Operator::All => "ALL",
            Operator::Any => "ANY",
        }
    }
}

/// Translates filter specs into SQL, validating names against a
/// [`SchemaRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// `SELECT <columns> FROM <table> [WHERE ...] [ORDER BY ...] [LIMIT ...]`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTable`] for an unregistered table and
    /// any validation error raised while compiling columns or the filter.
    /// Order terms must name registered columns.
    pub fn compile_select(&self, table: &str, spec: &FilterSpec) -> Result<CompiledQuery> {
        let def = self.table(table)?;
        let mut values = Vec::new();
        let columns = self.select_list(def, &spec.columns, &mut values)?;

        let mut sql = format!("SELECT {columns} FROM {}", def.name);
        self.push_where(def, spec, &mut sql, &mut values)?;

        if !spec.order.is_empty() {
            let terms = spec
                .order
                .iter()
                .enumerate()
                .map(|(index, term)| {
                    let column = term.column.trim();
                    if validate_identifier("column", column).is_err() {
                        return Err(unsupported(index, "order term must be a column name"));
                    }
                    let registered = def.column(column).ok_or_else(|| CoreError::UnknownColumn {
                        table: def.name.clone(),
                        column: column.to_string(),
                    })?;
                    Ok(format!("{} {}", registered.name, term.direction.as_str()))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match spec.limit {
            Some(Limit::Count(count)) => sql.push_str(&format!(" LIMIT {count}")),
            Some(Limit::Range { offset, count }) if count > 0 => {
                sql.push_str(&format!(" LIMIT {offset}, {count}"))
            }
            _ => {}
        }

        Ok(finish(sql, values))
    }

    /// `SELECT COUNT(*) FROM <table> [WHERE ...]`.
    pub fn compile_count(&self, table: &str, spec: &FilterSpec) -> Result<CompiledQuery> {
        let def = self.table(table)?;
        let mut values = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {}", def.name);
        self.push_where(def, spec, &mut sql, &mut values)?;
        Ok(finish(sql, values))
    }

    /// `DELETE FROM <table> [WHERE ...]`. An empty filter deletes every row.
    pub fn compile_delete(&self, table: &str, spec: &FilterSpec) -> Result<CompiledQuery> {
        let def = self.table(table)?;
        let mut values = Vec::new();
        let mut sql = format!("DELETE FROM {}", def.name);
        self.push_where(def, spec, &mut sql, &mut values)?;
        Ok(finish(sql, values))
    }

    /// `INSERT INTO <table> (...) VALUES (...)`, encoding each value for its
    /// column's storage affinity.
    pub fn compile_insert(&self, table: &str, record: &Record) -> Result<CompiledQuery> {
        let def = self.table(table)?;
        if record.is_empty() {
            return Ok(finish(
                format!("INSERT INTO {} DEFAULT VALUES", def.name),
                Vec::new(),
            ));
        }
        let (columns, values) = self.encode_record(def, record)?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(finish(
            format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                def.name,
                columns.join(", ")
            ),
            values,
        ))
    }

    /// `UPDATE <table> SET ... [WHERE ...]`. Assignment values precede the
    /// filter values.
    pub fn compile_update(
        &self,
        table: &str,
        record: &Record,
        spec: &FilterSpec,
    ) -> Result<CompiledQuery> {
        let def = self.table(table)?;
        if record.is_empty() {
            return Err(CoreError::InvalidOperand {
                index: 0,
                operator: "UPDATE".to_string(),
                reason: "record has no columns to set".to_string(),
            });
        }
        let (columns, mut values) = self.encode_record(def, record)?;
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
        let mut sql = format!("UPDATE {} SET {}", def.name, assignments.join(", "));
        self.push_where(def, spec, &mut sql, &mut values)?;
        Ok(finish(sql, values))
    }

    /// Compiles a filter list on its own, without the `WHERE` keyword.
    /// Returns `None` for an empty list.
    pub fn compile_where(
        &self,
        table: &str,
        filter: &[FilterEntry],
        operator: Option<LogicOp>,
    ) -> Result<Option<CompiledQuery>> {
        let def = self.table(table)?;
        if filter.is_empty() {
            return Ok(None);
        }
        let mut values = Vec::new();
        let sql = self.filter_sql(def, filter, operator.unwrap_or(LogicOp::And), &mut values)?;
        Ok(Some(CompiledQuery { sql, values }))
    }

    fn table(&self, name: &str) -> Result<&'a TableDefinition> {
        self.registry
            .table(name)
            .ok_or_else(|| CoreError::UnknownTable(name.trim().to_string()))
    }

    fn push_where(
        &self,
        def: &TableDefinition,
        spec: &FilterSpec,
        sql: &mut String,
        values: &mut Vec<SqlValue>,
    ) -> Result<()> {
        if spec.filter.is_empty() {
            return Ok(());
        }
        let clause = self.filter_sql(
            def,
            &spec.filter,
            spec.operator.unwrap_or(LogicOp::And),
            values,
        )?;
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
        Ok(())
    }

    fn select_list(
        &self,
        def: &TableDefinition,
        columns: &[ColumnSelector],
        values: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let all = || {
            if def.columns.is_empty() {
                "*".to_string()
            } else {
                def.column_names().join(", ")
            }
        };
        if columns.is_empty() {
            return Ok(all());
        }

        let mut parts = Vec::with_capacity(columns.len());
        for selector in columns {
            match selector {
                ColumnSelector::Name(name) if name.trim() == "*" => parts.push(all()),
                ColumnSelector::Name(name) => {
                    let column = def.column(name).ok_or_else(|| CoreError::UnknownColumn {
                        table: def.name.clone(),
                        column: name.trim().to_string(),
                    })?;
                    parts.push(column.name.clone());
                }
                ColumnSelector::Raw(raw) => {
                    parts.push(raw.sql().to_string());
                    values.extend(raw.values().iter().cloned());
                }
            }
        }
        Ok(parts.join(", "))
    }

    fn filter_sql(
        &self,
        def: &TableDefinition,
        filter: &[FilterEntry],
        default_op: LogicOp,
        values: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let mut sql = String::new();
        let mut at_group_start = true;
        let mut depth = 0usize;

        for (index, entry) in filter.iter().enumerate() {
            match entry {
                FilterEntry::Open(logic) => {
                    if !at_group_start {
                        sql.push_str(logic.unwrap_or(default_op).joiner());
                    }
                    sql.push('(');
                    depth += 1;
                    at_group_start = true;
                }
                FilterEntry::Close => {
                    if depth == 0 {
                        return Err(unsupported(index, "closing bracket without an open group"));
                    }
                    if at_group_start {
                        return Err(unsupported(index, "empty bracket group"));
                    }
                    sql.push(')');
                    depth -= 1;
                    at_group_start = false;
                }
                FilterEntry::Raw(raw) => {
                    check_raw(index, raw)?;
                    if !at_group_start {
                        sql.push_str(default_op.joiner());
                    }
                    sql.push('(');
                    sql.push_str(raw.sql().trim());
                    sql.push(')');
                    values.extend(raw.values().iter().cloned());
                    at_group_start = false;
                }
                FilterEntry::Column(clause) => {
                    let body = self.clause_sql(def, index, clause, values)?;
                    if !at_group_start {
                        sql.push_str(clause.logic.unwrap_or(default_op).joiner());
                    }
                    sql.push('(');
                    sql.push_str(&body);
                    sql.push(')');
                    at_group_start = false;
                }
            }
        }

        if depth > 0 {
            return Err(unsupported(
                filter.len(),
                &format!("{depth} bracket group(s) left open"),
            ));
        }
        Ok(sql)
    }

    fn clause_sql(
        &self,
        def: &TableDefinition,
        index: usize,
        clause: &ColumnClause,
        values: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let operator = Operator::parse(&clause.operator).ok_or_else(|| {
            CoreError::UnknownOperator {
                index,
                operator: clause.operator.clone(),
            }
        })?;
        let op = operator.as_str();

        // EXISTS takes no column; the subquery stands on its own.
        let subquery = matches!(operator, Operator::Exists | Operator::NotExists);
        let column = clause.column.trim().to_ascii_lowercase();
        if !subquery && def.column(&column).is_none() {
            return Err(CoreError::UnknownColumn {
                table: def.name.clone(),
                column,
            });
        }
        // Dates compared against a temporal column use its stored encoding.
        let affinity = def
            .column(&column)
            .filter(|c| c.is_temporal())
            .and_then(|c| self.registry.storage_affinity(&def.name, &c.name));

        match operator {
            Operator::Exists | Operator::NotExists => {
                let Some(Operand::Raw(raw)) = &clause.operand else {
                    return Err(invalid(index, op, "requires a raw subquery operand"));
                };
                check_raw(index, raw)?;
                values.extend(raw.values().iter().cloned());
                Ok(format!("{op} ({})", raw.sql().trim()))
            }
            // The engine only accepts the postfix forms; `ISNULL(x)` is a
            // syntax error.
            Operator::IsNull => Ok(format!("{column} ISNULL")),
            Operator::NotIsNull => Ok(format!("{column} NOTNULL")),
            Operator::Between | Operator::NotBetween => {
                let items = list_operand(index, op, &column, clause.operand.as_ref(), affinity)?;
                if items.len() != 2 {
                    return Err(invalid(
                        index,
                        op,
                        &format!("requires exactly 2 values, found {}", items.len()),
                    ));
                }
                values.extend(items);
                Ok(format!("{column} {op} ? AND ?"))
            }
            Operator::In | Operator::NotIn | Operator::Any => {
                // `= ANY (...)` is `IN (...)` in the engine's syntax
                let op = if operator == Operator::Any { "IN" } else { op };
                if let Some(Operand::Raw(raw)) = &clause.operand {
                    check_raw(index, raw)?;
                    values.extend(raw.values().iter().cloned());
                    return Ok(format!("{column} {op} ({})", raw.sql().trim()));
                }
                let items = list_operand(index, op, &column, clause.operand.as_ref(), affinity)?;
                if items.is_empty() {
                    return Err(invalid(index, op, "requires at least one value"));
                }
                let placeholders = vec!["?"; items.len()].join(", ");
                values.extend(items);
                Ok(format!("{column} {op} ({placeholders})"))
            }
            Operator::All => {
                if let Some(Operand::Raw(_)) = &clause.operand {
                    return Err(invalid(
                        index,
                        op,
                        "quantified comparison over a subquery is not supported; pass a list",
                    ));
                }
                let items = list_operand(index, op, &column, clause.operand.as_ref(), affinity)?;
                if items.is_empty() {
                    return Err(invalid(index, op, "requires at least one value"));
                }
                let terms = vec![format!("{column} = ?"); items.len()].join(" AND ");
                values.extend(items);
                Ok(terms)
            }
            Operator::Compare(_) | Operator::Like | Operator::NotLike | Operator::Regexp => {
                match &clause.operand {
                    None => Err(invalid(index, op, "requires a value")),
                    Some(Operand::Raw(raw)) => {
                        check_raw(index, raw)?;
                        values.extend(raw.values().iter().cloned());
                        Ok(format!("{column} {op} {}", raw.sql().trim()))
                    }
                    Some(Operand::Value(Value::List(items))) => Err(invalid(
                        index,
                        op,
                        &format!("expects a single value, found a list of {}", items.len()),
                    )),
                    Some(Operand::Value(value)) => {
                        values.push(encode_at(index, &column, value, affinity)?);
                        Ok(format!("{column} {op} ?"))
                    }
                }
            }
        }
    }

    fn encode_record(
        &self,
        def: &TableDefinition,
        record: &Record,
    ) -> Result<(Vec<String>, Vec<SqlValue>)> {
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (index, (name, value)) in record.iter().enumerate() {
            let column = def.column(name).ok_or_else(|| CoreError::UnknownColumn {
                table: def.name.clone(),
                column: name.trim().to_string(),
            })?;
            let affinity = self
                .registry
                .storage_affinity(&def.name, &column.name)
                .unwrap_or_else(|| column.affinity());
            let encoded = codec::encode_for_affinity(value, affinity).map_err(|err| {
                CoreError::UnencodableValue(format!("field {index} ('{}'): {err}", column.name))
            })?;
            columns.push(column.name.clone());
            values.push(encoded);
        }
        Ok((columns, values))
    }
}

/// Expands a list operand: a native list, a comma-separated string, or a
/// single scalar.
fn list_operand(
    index: usize,
    op: &str,
    column: &str,
    operand: Option<&Operand>,
    affinity: Option<Affinity>,
) -> Result<Vec<SqlValue>> {
    match operand {
        None => Err(invalid(index, op, "requires a list of values")),
        Some(Operand::Raw(_)) => Err(invalid(index, op, "does not accept a raw clause")),
        Some(Operand::Value(Value::List(items))) => {
            let encoded = match affinity {
                Some(affinity) => items
                    .iter()
                    .map(|item| codec::encode_for_affinity(item, affinity))
                    .collect(),
                None => codec::encode_list(items),
            };
            encoded.map_err(|err| {
                CoreError::UnencodableValue(format!("filter entry {index} ('{column}'): {err}"))
            })
        }
        Some(Operand::Value(Value::Text(list))) => Ok(split_comma_list(list)
            .into_iter()
            .map(SqlValue::Text)
            .collect()),
        Some(Operand::Value(value)) => Ok(vec![encode_at(index, column, value, affinity)?]),
    }
}

fn encode_at(
    index: usize,
    column: &str,
    value: &Value,
    affinity: Option<Affinity>,
) -> Result<SqlValue> {
    let encoded = match affinity {
        Some(affinity) => codec::encode_for_affinity(value, affinity),
        None => codec::encode(value),
    };
    encoded.map_err(|err| {
        CoreError::UnencodableValue(format!("filter entry {index} ('{column}'): {err}"))
    })
}

fn check_raw(index: usize, raw: &RawClause) -> Result<()> {
    if raw.sql().trim().is_empty() {
        return Err(unsupported(index, "raw clause has no SQL text"));
    }
    let placeholders = count_placeholders(raw.sql());
    if placeholders != raw.values().len() {
        return Err(unsupported(
            index,
            &format!(
                "raw clause has {placeholders} placeholder(s) but {} value(s)",
                raw.values().len()
            ),
        ));
    }
    Ok(())
}

fn finish(sql: String, values: Vec<SqlValue>) -> CompiledQuery {
    debug!(sql = %sql, values = values.len(), "compiled query");
    CompiledQuery { sql, values }
}

fn invalid(index: usize, operator: &str, reason: &str) -> CoreError {
    CoreError::InvalidOperand {
        index,
        operator: operator.to_string(),
        reason: reason.to_string(),
    }
}

fn unsupported(index: usize, reason: &str) -> CoreError {
    CoreError::UnsupportedFilterEntry {
        index,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Direction, OrderTerm};
    use chrono::{TimeZone, Utc};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::default();
        registry
            .add_table(
                "user",
                vec![
                    ("id", "INTEGER", "PRIMARY KEY"),
                    ("age", "INTEGER", ""),
                    ("city", "TEXT", ""),
                    ("name", "TEXT", ""),
                ],
                Vec::new(),
            )
            .unwrap();
        registry
            .add_table("orders", vec![("user_id", "INTEGER", "")], Vec::new())
            .unwrap();
        registry
    }

    fn select(spec: &FilterSpec) -> Result<CompiledQuery> {
        let registry = registry();
        FilterCompiler::new(&registry).compile_select("user", spec)
    }

    fn where_sql(spec: &FilterSpec) -> String {
        let sql = select(spec).unwrap().sql;
        sql.split_once(" WHERE ").map(|(_, w)| w.to_string()).unwrap_or_default()
    }

    #[test]
    fn test_select_all_columns_without_filter() {
        let query = select(&FilterSpec::new()).unwrap();
        assert_eq!(query.sql, "SELECT id, age, city, name FROM user");
        assert!(query.values.is_empty());
    }

    #[test]
    fn test_in_with_comma_string() {
        let spec = FilterSpec::new().clause("id", "IN", "1, 2,3");
        let query = select(&spec).unwrap();
        assert!(query.sql.ends_with("WHERE (id IN (?, ?, ?))"));
        assert_eq!(
            query.values,
            ["1", "2", "3"].map(|s| SqlValue::Text(s.into()))
        );
    }

    #[test]
    fn test_not_in_with_list() {
        let spec =
            FilterSpec::new().clause("age", "not  in", vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(where_sql(&spec), "(age NOT IN (?, ?))");
    }

    #[test]
    fn test_between_requires_two_values() {
        let ok = FilterSpec::new().clause("age", "BETWEEN", "18,30");
        assert_eq!(where_sql(&ok), "(age BETWEEN ? AND ?)");

        let bad = FilterSpec::new().clause(
            "age",
            "BETWEEN",
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
        );
        let err = select(&bad).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperand { index: 0, .. }));
    }

    #[test]
    fn test_unknown_operator() {
        let spec = FilterSpec::new()
            .clause("age", ">", 1)
            .clause("age", "frobnicate", 1);
        let err = select(&spec).unwrap_err();
        assert_eq!(
            err,
            CoreError::UnknownOperator {
                index: 1,
                operator: "frobnicate".into()
            }
        );
    }

    #[test]
    fn test_isnull_is_unary() {
        let spec = FilterSpec::new().unary("name", "ISNULL");
        let query = select(&spec).unwrap();
        assert!(query.sql.ends_with("WHERE (name ISNULL)"));
        assert!(query.values.is_empty());

        let spec = FilterSpec::new().unary("name", "not isnull").clause("age", "=", 3);
        let query = select(&spec).unwrap();
        assert!(query.sql.ends_with("WHERE (name NOTNULL) AND (age = ?)"));
        assert_eq!(query.values, [SqlValue::Integer(3)]);
    }

    #[test]
    fn test_brackets_and_logic_ops() {
        let spec = FilterSpec::new()
            .clause("age", ">", 18)
            .open_with(LogicOp::Or)
            .clause("city", "=", "Berlin")
            .clause_with("city", "=", "Paris", LogicOp::Or)
            .close()
            .clause("name", "LIKE", "A%");
        assert_eq!(
            where_sql(&spec),
            "(age > ?) OR ((city = ?) OR (city = ?)) AND (name LIKE ?)"
        );
    }

    #[test]
    fn test_spec_level_operator_is_default() {
        let spec = FilterSpec::new()
            .clause("age", "=", 1)
            .clause_with("age", "=", 2, LogicOp::And)
            .clause("age", "=", 3)
            .operator(LogicOp::Or);
        assert_eq!(where_sql(&spec), "(age = ?) AND (age = ?) OR (age = ?)");
    }

    #[test]
    fn test_not_and_xor_joiners() {
        let spec = FilterSpec::new()
            .clause("age", "=", 1)
            .clause_with("city", "=", "x", LogicOp::Not)
            .clause_with("name", "=", "y", LogicOp::Xor);
        assert_eq!(
            where_sql(&spec),
            "(age = ?) AND NOT (city = ?) <> (name = ?)"
        );
    }

    #[test]
    fn test_xor_binds_tighter_than_and() {
        let flat = FilterSpec::new()
            .clause("age", "=", 1)
            .clause("city", "=", "x")
            .clause_with("name", "=", "y", LogicOp::Xor);
        assert_eq!(where_sql(&flat), "(age = ?) AND (city = ?) <> (name = ?)");

        let grouped = FilterSpec::new()
            .open()
            .clause("age", "=", 1)
            .clause("city", "=", "x")
            .close()
            .clause_with("name", "=", "y", LogicOp::Xor);
        assert_eq!(
            where_sql(&grouped),
            "((age = ?) AND (city = ?)) <> (name = ?)"
        );
    }

    #[test]
    fn test_unbalanced_brackets_rejected() {
        let open = FilterSpec::new().open().clause("age", "=", 1);
        assert!(matches!(
            select(&open).unwrap_err(),
            CoreError::UnsupportedFilterEntry { index: 2, .. }
        ));

        let close = FilterSpec::new().clause("age", "=", 1).close();
        assert!(matches!(
            select(&close).unwrap_err(),
            CoreError::UnsupportedFilterEntry { index: 1, .. }
        ));

        let empty = FilterSpec::new().open().close();
        assert!(select(&empty).is_err());
    }

    #[test]
    fn test_raw_clause_entry_and_operand() {
        let spec = FilterSpec::new()
            .raw(RawClause::with_values("age * 2 > ?", vec![SqlValue::Integer(40)]))
            .clause(
                "id",
                "IN",
                RawClause::with_values(
                    "SELECT user_id FROM orders WHERE user_id > ?",
                    vec![SqlValue::Integer(7)],
                ),
            )
            .clause("city", "=", "Rome");
        let query = select(&spec).unwrap();
        assert!(query.sql.ends_with(
            "WHERE (age * 2 > ?) AND (id IN (SELECT user_id FROM orders WHERE user_id > ?)) AND (city = ?)"
        ));
        assert_eq!(
            query.values,
            [
                SqlValue::Integer(40),
                SqlValue::Integer(7),
                SqlValue::Text("Rome".into())
            ]
        );
        assert_eq!(query.placeholder_count(), query.values.len());
    }

    #[test]
    fn test_raw_clause_placeholder_mismatch() {
        let spec = FilterSpec::new().raw(RawClause::new("age > ?"));
        assert!(matches!(
            select(&spec).unwrap_err(),
            CoreError::UnsupportedFilterEntry { index: 0, .. }
        ));
    }

    #[test]
    fn test_exists_requires_subquery() {
        let spec = FilterSpec::new().clause(
            "",
            "EXISTS",
            RawClause::new("SELECT 1 FROM orders WHERE orders.user_id = user.id"),
        );
        assert!(where_sql(&spec).starts_with("(EXISTS (SELECT 1 FROM orders"));

        let bad = FilterSpec::new().clause("id", "NOT EXISTS", 1);
        assert!(matches!(
            select(&bad).unwrap_err(),
            CoreError::InvalidOperand { .. }
        ));
    }

    #[test]
    fn test_any_and_all() {
        let any = FilterSpec::new().clause("age", "ANY", "1,2");
        assert_eq!(where_sql(&any), "(age IN (?, ?))");

        let all =
            FilterSpec::new().clause("age", "ALL", vec![Value::Integer(4), Value::Integer(4)]);
        assert_eq!(where_sql(&all), "(age = ? AND age = ?)");

        let all_sub = FilterSpec::new().clause("age", "ALL", RawClause::new("SELECT 1"));
        assert!(select(&all_sub).is_err());
    }

    #[test]
    fn test_unknown_filter_column() {
        let spec = FilterSpec::new().clause("height", "=", 1);
        assert_eq!(
            select(&spec).unwrap_err(),
            CoreError::UnknownColumn {
                table: "user".into(),
                column: "height".into()
            }
        );
    }

    #[test]
    fn test_column_is_lowercased_and_trimmed() {
        let spec = FilterSpec::new().clause("  CITY ", "=", "x");
        assert_eq!(where_sql(&spec), "(city = ?)");
    }

    #[test]
    fn test_scalar_operator_rejects_list() {
        let spec = FilterSpec::new().clause("age", "=", vec![Value::Integer(1)]);
        assert!(matches!(
            select(&spec).unwrap_err(),
            CoreError::InvalidOperand { .. }
        ));
    }

    #[test]
    fn test_values_are_encoded() {
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let spec = FilterSpec::new()
            .clause("age", "=", true)
            .clause("name", "<", date);
        let query = select(&spec).unwrap();
        assert_eq!(
            query.values,
            [
                SqlValue::Integer(1),
                SqlValue::Text("2024-01-02T03:04:05.000Z".into())
            ]
        );
    }

    #[test]
    fn test_dates_on_temporal_columns_use_storage_encoding() {
        let mut registry = SchemaRegistry::default();
        registry
            .add_table(
                "event",
                vec![("at", "DATETIME", ""), ("created", "", "")],
                Vec::new(),
            )
            .unwrap();
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let spec = FilterSpec::new()
            .clause("created", ">", date)
            .clause("at", "IN", vec![Value::Date(date)]);
        let query = FilterCompiler::new(&registry)
            .compile_select("event", &spec)
            .unwrap();
        // Both columns store the configured INTEGER timestamp type.
        assert_eq!(
            query.values,
            [
                SqlValue::Integer(date.timestamp()),
                SqlValue::Integer(date.timestamp())
            ]
        );
    }

    #[test]
    fn test_columns_order_and_limit() {
        let mut spec = FilterSpec::new()
            .select(["name", "ID"])
            .order_by("age", Direction::Desc)
            .limit(10);
        spec.order.push(OrderTerm {
            column: "name".into(),
            direction: Direction::parse("sideways"),
        });
        let query = select(&spec).unwrap();
        assert_eq!(
            query.sql,
            "SELECT name, id FROM user ORDER BY age DESC, name ASC LIMIT 10"
        );

        let ranged = FilterSpec::new().select(["id"]).range(20, 10);
        assert_eq!(select(&ranged).unwrap().sql, "SELECT id FROM user LIMIT 20, 10");

        let zero = FilterSpec::new().select(["id"]).range(20, 0);
        assert_eq!(select(&zero).unwrap().sql, "SELECT id FROM user");
    }

    #[test]
    fn test_order_terms_are_validated() {
        let unknown = FilterSpec::new().select(["age"]).order_by("nosuchcolumn", Direction::Desc);
        assert_eq!(
            select(&unknown).unwrap_err(),
            CoreError::UnknownColumn {
                table: "user".into(),
                column: "nosuchcolumn".into()
            }
        );

        let injected = FilterSpec::new().order_by("age; DROP TABLE user", Direction::Asc);
        assert!(matches!(
            select(&injected).unwrap_err(),
            CoreError::UnsupportedFilterEntry { index: 0, .. }
        ));

        let canonical = FilterSpec::new().select(["id"]).order_by(" AGE ", Direction::Asc);
        assert_eq!(select(&canonical).unwrap().sql, "SELECT id FROM user ORDER BY age ASC");
    }

    #[test]
    fn test_unknown_select_column() {
        let spec = FilterSpec::new().select(["nope"]);
        assert!(matches!(
            select(&spec).unwrap_err(),
            CoreError::UnknownColumn { .. }
        ));
    }

    #[test]
    fn test_raw_select_column_values_come_first() {
        let spec = FilterSpec::new()
            .select([
                ColumnSelector::from("id"),
                ColumnSelector::Raw(RawClause::with_values(
                    "age + ? AS next_age",
                    vec![SqlValue::Integer(1)],
                )),
            ])
            .clause("city", "=", "x");
        let query = select(&spec).unwrap();
        assert_eq!(
            query.sql,
            "SELECT id, age + ? AS next_age FROM user WHERE (city = ?)"
        );
        assert_eq!(query.values[0], SqlValue::Integer(1));
    }

    #[test]
    fn test_count_and_delete_share_where() {
        let registry = registry();
        let compiler = FilterCompiler::new(&registry);
        let spec = FilterSpec::new().clause("age", "<", 5).limit(3);
        assert_eq!(
            compiler.compile_count("user", &spec).unwrap().sql,
            "SELECT COUNT(*) FROM user WHERE (age < ?)"
        );
        assert_eq!(
            compiler.compile_delete("user", &spec).unwrap().sql,
            "DELETE FROM user WHERE (age < ?)"
        );
    }

    #[test]
    fn test_unknown_table() {
        let registry = registry();
        let err = FilterCompiler::new(&registry)
            .compile_select("ghost", &FilterSpec::new())
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownTable("ghost".into()));
    }

    #[test]
    fn test_insert_and_update() {
        let registry = registry();
        let compiler = FilterCompiler::new(&registry);
        let record = Record::new().with("name", "Ada").with("age", 36);
        let insert = compiler.compile_insert("user", &record).unwrap();
        assert_eq!(insert.sql, "INSERT INTO user (name, age) VALUES (?, ?)");

        let update = compiler
            .compile_update("user", &record, &FilterSpec::new().clause("id", "=", 1))
            .unwrap();
        assert_eq!(update.sql, "UPDATE user SET name = ?, age = ? WHERE (id = ?)");
        assert_eq!(update.values.len(), 3);
        assert_eq!(update.values[2], SqlValue::Integer(1));

        let bad = Record::new().with("ghost", 1);
        assert!(compiler.compile_insert("user", &bad).is_err());
    }

    #[test]
    fn test_count_placeholders_skips_literals() {
        assert_eq!(count_placeholders("a = ? AND b = '?' AND c = \"?\""), 1);
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("rlike"), Some(Operator::Regexp));
        assert_eq!(Operator::parse(" Not   Between "), Some(Operator::NotBetween));
        assert_eq!(Operator::parse("~="), None);
    }
}
