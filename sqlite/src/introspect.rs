//! Builds a [`SchemaRegistry`] from an existing database.

use filterdb_core::{
    ColumnDefinition, RegistryOptions, SchemaRegistry, TableConstraint, validate_identifier,
};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{Result, WithSql};

struct ColumnInfo {
    name: String,
    declared_type: String,
    not_null: bool,
    default: Option<String>,
    pk: i64,
}

/// Reads every user table with its columns, explicit indexes and triggers.
///
/// Objects whose names are not plain identifiers are skipped with a
/// warning, since the compiler could not address them anyway.
pub fn introspect(conn: &Connection, options: RegistryOptions) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new(options);

    for table in master_names(conn, "table")? {
        if validate_identifier("table", &table).is_err() {
            warn!(table = %table, "skipping table with a non-identifier name");
            continue;
        }
        let columns = table_info(conn, &table)?;
        if let Some(bad) = columns
            .iter()
            .find(|c| validate_identifier("column", &c.name).is_err())
        {
            warn!(
                table = %table,
                column = %bad.name,
                "skipping table with a non-identifier column"
            );
            continue;
        }

        let pk: Vec<&ColumnInfo> = {
            let mut pk: Vec<&ColumnInfo> = columns.iter().filter(|c| c.pk > 0).collect();
            pk.sort_by_key(|c| c.pk);
            pk
        };
        let definitions: Vec<ColumnDefinition> = columns
            .iter()
            .map(|c| {
                let mut constraints = Vec::new();
                if pk.len() == 1 && c.pk > 0 {
                    constraints.push("PRIMARY KEY".to_string());
                }
                if c.not_null {
                    constraints.push("NOT NULL".to_string());
                }
                if let Some(default) = &c.default {
                    constraints.push(format!("DEFAULT {default}"));
                }
                ColumnDefinition::new(&c.name, &c.declared_type, constraints.join(" "))
            })
            .collect();
        let table_constraints: Vec<TableConstraint> = if pk.len() > 1 {
            let names: Vec<&str> = pk.iter().map(|c| c.name.as_str()).collect();
            vec![TableConstraint::sql(format!("PRIMARY KEY ({})", names.join(", ")))]
        } else {
            Vec::new()
        };
        registry.add_table(&table, definitions, table_constraints)?;

        for (index, unique) in index_list(conn, &table)? {
            if validate_identifier("index", &index).is_err() {
                warn!(index = %index, "skipping index with a non-identifier name");
                continue;
            }
            let columns = index_columns(conn, &index)?;
            if columns.is_empty() {
                // expression index
                continue;
            }
            registry.add_index(&index, &table, columns, unique)?;
        }
    }

    const TRIGGERS: &str =
        "SELECT name, tbl_name, sql FROM sqlite_master WHERE type = 'trigger' AND sql IS NOT NULL ORDER BY rowid";
    let mut stmt = conn.prepare(TRIGGERS).with_sql(TRIGGERS)?;
    let triggers = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .with_sql(TRIGGERS)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(TRIGGERS)?;
    for (name, table, sql) in triggers {
        if validate_identifier("trigger", &name).is_err() || !registry.table_exists(&table) {
            continue;
        }
        registry.add_trigger(&name, &table, &sql)?;
    }

    debug!(tables = registry.tables().count(), "schema introspected");
    Ok(registry)
}

fn master_names(conn: &Connection, kind: &str) -> Result<Vec<String>> {
    const SQL: &str =
        "SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY rowid";
    let mut stmt = conn.prepare(SQL).with_sql(SQL)?;
    let names = stmt
        .query_map([kind], |row| row.get::<_, String>(0))
        .with_sql(SQL)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(SQL)?;
    Ok(names)
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    const SQL: &str =
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid";
    let mut stmt = conn.prepare(SQL).with_sql(SQL)?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default: row.get(3)?,
                pk: row.get(4)?,
            })
        })
        .with_sql(SQL)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(SQL)?;
    Ok(columns)
}

/// Indexes created with `CREATE INDEX`, with their uniqueness.
fn index_list(conn: &Connection, table: &str) -> Result<Vec<(String, bool)>> {
    const SQL: &str =
        "SELECT name, \"unique\" FROM pragma_index_list(?1) WHERE origin = 'c' ORDER BY seq DESC";
    let mut stmt = conn.prepare(SQL).with_sql(SQL)?;
    let indexes = stmt
        .query_map([table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
        })
        .with_sql(SQL)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(SQL)?;
    Ok(indexes)
}

fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>> {
    const SQL: &str = "SELECT name FROM pragma_index_info(?1) ORDER BY seqno";
    let mut stmt = conn.prepare(SQL).with_sql(SQL)?;
    let columns = stmt
        .query_map([index], |row| row.get::<_, Option<String>>(0))
        .with_sql(SQL)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_sql(SQL)?;
    // A NULL name marks an expression column.
    Ok(columns.into_iter().collect::<Option<Vec<_>>>().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspect_tables_indexes_triggers() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT 'x', born DATE);
             CREATE TABLE link (a INTEGER, b INTEGER, PRIMARY KEY (a, b));
             CREATE UNIQUE INDEX user_name ON user (name);
             CREATE INDEX user_expr ON user (lower(name));
             CREATE TRIGGER user_log AFTER INSERT ON user BEGIN SELECT 1; END;
             CREATE TABLE \"odd name\" (x);",
        )
        .unwrap();

        let registry = introspect(&conn, RegistryOptions::default()).unwrap();
        assert_eq!(
            registry.tables().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["user", "link"]
        );
        assert_eq!(registry.get_columns("user").unwrap(), ["id", "name", "born"]);
        assert_eq!(
            registry.column("user", "name").unwrap().constraints,
            "NOT NULL DEFAULT 'x'"
        );
        assert!(registry.column("user", "born").unwrap().is_temporal());
        assert_eq!(
            registry.create_table_sql("link").unwrap(),
            "CREATE TABLE IF NOT EXISTS link (a INTEGER, b INTEGER, PRIMARY KEY (a, b))"
        );

        let indexes: Vec<_> = registry.indexes().collect();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "user_name");
        assert!(indexes[0].unique);
        assert_eq!(registry.triggers().count(), 1);
    }
}
