//! The dump/restore interchange document.
//!
//! A dump holds the DDL of every schema object, the column order of every
//! table, and each table's rows as JSON values in that column order. After
//! a restore, `errors` maps each table that could not be restored to the
//! reason.
//!
//! ```json
//! {
//!   "sql": {"tables": [...], "views": [...], "triggers": [...], "indexes": [...]},
//!   "tables": {"user": ["id", "name"]},
//!   "data": {"user": [[1, "Ada"], [2, "Grace"]]},
//!   "errors": {}
//! }
//! ```
//!
//! Paths ending in `.gz` are read and written gzip-compressed when the
//! `gzip` feature is enabled.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, Result};

/// DDL statements grouped by object kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpSql {
    pub tables: Vec<String>,
    pub views: Vec<String>,
    pub triggers: Vec<String>,
    pub indexes: Vec<String>,
}

impl DumpSql {
    /// Statements in replay order: tables, triggers, indexes, views.
    pub fn replay_order(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .chain(&self.triggers)
            .chain(&self.indexes)
            .chain(&self.views)
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.views.len() + self.triggers.len() + self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A complete database dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpDocument {
    pub sql: DumpSql,
    /// Column order per table; rows in `data` follow it.
    pub tables: BTreeMap<String, Vec<String>>,
    pub data: BTreeMap<String, Vec<Vec<serde_json::Value>>>,
    /// Per-table restore failures.
    pub errors: BTreeMap<String, String>,
}

impl DumpDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of data rows across all tables.
    pub fn row_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// Checks that every row of every table has as many values as the
    /// table's recorded column list.
    ///
    /// This only inspects the document. Whether the columns match the
    /// target database is decided at restore time.
    pub fn check(&self) -> Result<()> {
        for (table, rows) in &self.data {
            let Some(columns) = self.tables.get(table) else {
                return Err(DatabaseError::InvalidDump(format!(
                    "table '{table}' has data but no column list"
                )));
            };
            if let Some((idx, row)) = rows
                .iter()
                .enumerate()
                .find(|(_, row)| row.len() != columns.len())
            {
                return Err(DatabaseError::InvalidDump(format!(
                    "row {idx} of table '{table}' has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a document, decompressing when the path ends in `.gz`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](DatabaseError::IoError) if the file cannot be
    /// read, [`JsonError`](DatabaseError::JsonError) if parsing fails, or
    /// [`CompressionError`](DatabaseError::CompressionError) for a `.gz`
    /// path when gzip support is unavailable or the stream is corrupt.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        if is_gzip_path(path) {
            return Self::from_json_str(&read_gzip(reader)?);
        }
        Ok(serde_json::from_reader(reader)?)
    }

    /// Writes the document as pretty JSON, compressed when the path ends
    /// in `.gz`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        if is_gzip_path(path) {
            return write_gzip(writer, self.to_json_string()?.as_bytes());
        }
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Whether `path` names a gzip-compressed document.
pub fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

#[cfg(feature = "gzip")]
fn read_gzip<R: Read>(reader: R) -> Result<String> {
    let mut json = String::new();
    flate2::read::GzDecoder::new(reader)
        .read_to_string(&mut json)
        .map_err(|e| DatabaseError::CompressionError(e.to_string()))?;
    Ok(json)
}

#[cfg(feature = "gzip")]
fn write_gzip<W: Write>(writer: W, bytes: &[u8]) -> Result<()> {
    let mut encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
    encoder.write_all(bytes)?;
    encoder
        .finish()
        .and_then(|mut inner| inner.flush())
        .map_err(|e| DatabaseError::CompressionError(e.to_string()))
}

#[cfg(not(feature = "gzip"))]
fn read_gzip<R: Read>(_reader: R) -> Result<String> {
    Err(gzip_disabled())
}

#[cfg(not(feature = "gzip"))]
fn write_gzip<W: Write>(_writer: W, _bytes: &[u8]) -> Result<()> {
    Err(gzip_disabled())
}

#[cfg(not(feature = "gzip"))]
fn gzip_disabled() -> DatabaseError {
    DatabaseError::CompressionError(
        "gzip support is not enabled (build with the `gzip` feature)".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DumpDocument {
        let mut doc = DumpDocument::new();
        doc.sql.tables.push("CREATE TABLE user (id INTEGER, name TEXT)".into());
        doc.sql.indexes.push("CREATE INDEX user_name ON user (name)".into());
        doc.tables.insert("user".into(), vec!["id".into(), "name".into()]);
        doc.data.insert(
            "user".into(),
            vec![vec![json!(1), json!("Ada")], vec![json!(2), json!(null)]],
        );
        doc
    }

    #[test]
    fn test_replay_order() {
        let sql = DumpSql {
            tables: vec!["t".into()],
            views: vec!["v".into()],
            triggers: vec!["tr".into()],
            indexes: vec!["i".into()],
        };
        assert_eq!(sql.replay_order().collect::<Vec<_>>(), ["t", "tr", "i", "v"]);
        assert_eq!(sql.len(), 4);
    }

    #[test]
    fn test_missing_sections_default() {
        let doc = DumpDocument::from_json_str(r#"{"tables": {"a": ["x"]}}"#).unwrap();
        assert!(doc.sql.is_empty());
        assert!(doc.data.is_empty());
        assert!(doc.errors.is_empty());
    }

    #[test]
    fn test_check_detects_ragged_rows() {
        let mut doc = sample();
        assert!(doc.check().is_ok());
        doc.data.get_mut("user").unwrap().push(vec![json!(3)]);
        let err = doc.check().unwrap_err();
        assert!(err.to_string().contains("row 2"));

        let mut orphan = DumpDocument::new();
        orphan.data.insert("ghost".into(), Vec::new());
        assert!(orphan.check().is_err());
    }

    #[test]
    fn test_plain_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let doc = sample();
        doc.save(&path).unwrap();
        assert_eq!(DumpDocument::load(&path).unwrap(), doc);
        assert_eq!(doc.row_count(), 2);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_gzip_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json.gz");
        let doc = sample();
        doc.save(&path).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);
        assert_eq!(DumpDocument::load(&path).unwrap(), doc);
    }

    #[test]
    fn test_is_gzip_path() {
        assert!(is_gzip_path(Path::new("a/b.json.GZ")));
        assert!(!is_gzip_path(Path::new("a/b.json")));
    }
}
