use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use tempfile::TempDir;

fn filterdb(db: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_filterdb"))
        .arg("--database")
        .arg(db)
        .args(args)
        .output()
        .expect("failed to run filterdb")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// A database with a small user/post schema, an index, and a version ledger.
fn seeded_db(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("app.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, city TEXT);
         CREATE INDEX user_city ON user (city);
         CREATE TABLE post (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT);
         CREATE TABLE _dbVersion (version INTEGER PRIMARY KEY, applied INTEGER NOT NULL DEFAULT 0);
         INSERT INTO _dbVersion (version) VALUES (0), (1), (2);
         INSERT INTO user (name, age, city) VALUES
             ('ann', 34, 'Berlin'), ('bob', 17, 'Berlin'), ('cy', 52, 'Oslo'), ('dee', 25, 'Rome');
         INSERT INTO post (user_id, title) VALUES (1, 'hello'), (3, 'fjord');",
    )
    .unwrap();
    path
}

// ---------------------------------------------------------------------------
// Query commands
// ---------------------------------------------------------------------------

#[test]
fn compile_prints_sql_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(
        &db,
        &["compile", "user", r#"{"filter": [["age", ">", 18], ["city", "=", "Berlin"]]}"#],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("SELECT id, name, age, city FROM user WHERE (age > ?) AND (city = ?)")
    );
    let values: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
    assert_eq!(values, serde_json::json!([18, "Berlin"]));
}

#[test]
fn query_prints_matching_rows_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(
        &db,
        &[
            "query",
            "user",
            r#"{"filter": [["city", "=", "Berlin"]], "columns": ["name", "age"], "order": [["age", "DESC"]]}"#,
        ],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let rows: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(
        rows,
        serde_json::json!([
            {"name": "ann", "age": 34},
            {"name": "bob", "age": 17}
        ])
    );
}

#[test]
fn query_reads_spec_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);
    let spec = dir.path().join("spec.json");
    fs::write(&spec, r#"{"filter": ["name", "IN", ["cy", "dee"]], "columns": "name"}"#).unwrap();

    let arg = format!("@{}", spec.display());
    let out = filterdb(&db, &["query", "user", &arg]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let rows: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(rows, serde_json::json!([{"name": "cy"}, {"name": "dee"}]));
}

#[test]
fn count_with_and_without_spec() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["count", "user"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "4");

    let out = filterdb(&db, &["count", "user", r#"{"filter": [["age", "BETWEEN", [20, 40]]]}"#]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "2");
}

#[test]
fn delete_removes_matching_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["delete", "post", r#"{"filter": [["title", "LIKE", "f%"]]}"#]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("Deleted 1 row(s) from 'post'."));

    let conn = Connection::open(&db).unwrap();
    let titles: Vec<String> = conn
        .prepare("SELECT title FROM post")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(titles, ["hello"]);
}

#[test]
fn unknown_operator_fails_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["query", "user", r#"{"filter": [["age", "~~", 3]]}"#]);
    assert!(!out.status.success());
    assert!(stderr(&out).starts_with("error: "));
    assert!(stderr(&out).contains("~~"));
}

#[test]
fn invalid_spec_json_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["count", "user", "{not json"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Invalid spec JSON"));
}

#[test]
fn unknown_table_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["count", "nope"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("nope"));
}

// ---------------------------------------------------------------------------
// Dump / restore
// ---------------------------------------------------------------------------

#[test]
fn dump_to_stdout_is_a_dump_document() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["dump"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let doc: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(doc["tables"]["user"], serde_json::json!(["id", "name", "age", "city"]));
    assert_eq!(doc["data"]["user"].as_array().unwrap().len(), 4);
    assert_eq!(doc["data"]["post"][1], serde_json::json!([2, 3, "fjord"]));
    assert_eq!(doc["sql"]["indexes"].as_array().unwrap().len(), 1);
}

#[test]
fn dump_and_restore_gzip_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);
    let backup = dir.path().join("backup.json.gz");

    let out = filterdb(&db, &["dump", "--output", backup.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("row(s)"));
    let bytes = fs::read(&backup).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let copy = dir.path().join("copy.db");
    let out = filterdb(&copy, &["restore", backup.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("Restored 3 of 3 table(s)."));

    let out = filterdb(&copy, &["count", "user", r#"{"filter": [["city", "=", "Berlin"]]}"#]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "2");

    // Restoring again neither fails nor duplicates rows.
    let out = filterdb(&copy, &["restore", backup.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let out = filterdb(&copy, &["count", "post"]);
    assert_eq!(stdout(&out).trim(), "2");
}

#[test]
fn restore_reports_failed_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);
    let backup = dir.path().join("backup.json");
    let out = filterdb(&db, &["dump", "--output", backup.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    // A target whose post table has a different shape.
    let target = dir.path().join("target.db");
    Connection::open(&target)
        .unwrap()
        .execute_batch("CREATE TABLE post (id INTEGER PRIMARY KEY, body TEXT);")
        .unwrap();

    let out = filterdb(&target, &["restore", backup.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Restored 2 of 3 table(s)."));
    assert!(stderr(&out).contains("post:"));
    assert!(stderr(&out).contains("error: 1 table(s) failed to restore"));

    let out = filterdb(&target, &["count", "user"]);
    assert_eq!(stdout(&out).trim(), "4");
}

// ---------------------------------------------------------------------------
// Status and configuration
// ---------------------------------------------------------------------------

#[test]
fn status_shows_versions_and_row_counts() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let out = filterdb(&db, &["status"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("Schema version: 2"));
    assert!(text.contains("Applied versions: 0, 1, 2"));
    assert!(text.contains("user: 4 row(s)"));
    assert!(text.contains("post: 2 row(s)"));
    assert!(!text.contains("_dbVersion:"));
}

#[test]
fn status_without_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("empty.db");

    let out = filterdb(&db, &["status"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("Schema version: none (_dbVersion missing)"));
}

#[test]
fn database_path_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);
    let config = dir.path().join("filterdb.yml");
    fs::write(
        &config,
        format!("database:\n  path: {}\nversion_table: _dbVersion\n", db.display()),
    )
    .unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_filterdb"))
        .args(["--config", config.to_str().unwrap(), "count", "post"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "2");
}

#[test]
fn missing_database_is_an_error() {
    let out = Command::new(env!("CARGO_BIN_EXE_filterdb"))
        .args(["count", "user"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(stderr(&out).contains("No database given"));
}
