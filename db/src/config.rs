//! Store configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) describes an in-memory database with the standard ledger table and
//! timestamp columns.
//!
//! # Example YAML
//!
//! ```yaml
//! database:
//!   name: app
//!   path: app.db
//!   version: "1.0"
//!   display_name: Application store
//!   size: 5242880
//! version_table: _dbVersion
//! timestamps:
//!   create_column: created
//!   change_column: changed
//!   timestamp_type: INTEGER
//! migration:
//!   trigger_events_on_reexecute: false
//!   recall_ready_functions_on_reexecute: false
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use filterdb_core::{RegistryOptions, validate_identifier};
use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, Result};

/// Where the database lives and how it identifies itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Logical database name.
    pub name: String,
    /// Database file. `None` opens an in-memory database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Application-level schema version label.
    pub version: String,
    /// Human-readable name.
    pub display_name: String,
    /// Expected size in bytes. Informational; the engine grows on demand.
    pub size: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "filterdb".to_string(),
            path: None,
            version: "1.0".to_string(),
            display_name: "filterdb".to_string(),
            size: 5 * 1024 * 1024,
        }
    }
}

/// Automatic creation/change timestamp columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Column recording row creation. `null` disables it.
    pub create_column: Option<String>,
    /// Column recording the last change. `null` disables it.
    pub change_column: Option<String>,
    /// Declared type for both timestamp columns.
    pub timestamp_type: String,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        let options = RegistryOptions::default();
        Self {
            create_column: options.create_column,
            change_column: options.change_column,
            timestamp_type: options.timestamp_type,
        }
    }
}

/// Behaviour of `re_execute` on the migration engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Fire lifecycle events again when migrations are re-executed.
    pub trigger_events_on_reexecute: bool,
    /// Run ready functions again when migrations are re-executed.
    pub recall_ready_functions_on_reexecute: bool,
}

/// Top-level store configuration.
///
/// # Examples
///
/// ```
/// use filterdb_db::StoreConfig;
///
/// let config = StoreConfig::from_yaml_str("database:\n  path: app.db\n").unwrap();
/// assert_eq!(config.version_table, "_dbVersion");
/// assert_eq!(config.database.path.as_deref(), Some(std::path::Path::new("app.db")));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    /// Name of the ledger table recording applied schema versions.
    pub version_table: String,
    pub timestamps: TimestampConfig,
    pub migration: MigrationConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            version_table: "_dbVersion".to_string(),
            timestamps: TimestampConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](DatabaseError::IoError) if the file cannot be
    /// read, [`YamlError`](DatabaseError::YamlError) if parsing fails, or
    /// [`InvalidConfig`](DatabaseError::InvalidConfig) if validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: StoreConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from a YAML string. An empty
    /// string yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StoreConfig = if yaml.trim().is_empty() {
            StoreConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks that the ledger table and timestamp column names are plain
    /// identifiers and that a timestamp type is set.
    pub fn validate(&self) -> Result<()> {
        check_identifier("version_table", &self.version_table)?;
        if let Some(column) = &self.timestamps.create_column {
            check_identifier("timestamps.create_column", column)?;
        }
        if let Some(column) = &self.timestamps.change_column {
            check_identifier("timestamps.change_column", column)?;
        }
        if self.timestamps.timestamp_type.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "timestamps.timestamp_type must not be empty".to_string(),
            ));
        }
        if let (Some(create), Some(change)) =
            (&self.timestamps.create_column, &self.timestamps.change_column)
        {
            if create.eq_ignore_ascii_case(change) {
                return Err(DatabaseError::InvalidConfig(format!(
                    "timestamps.create_column and timestamps.change_column are both '{create}'"
                )));
            }
        }
        Ok(())
    }

    /// Timestamp settings in the form the schema registry takes.
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            create_column: self.timestamps.create_column.clone(),
            change_column: self.timestamps.change_column.clone(),
            timestamp_type: self.timestamps.timestamp_type.trim().to_string(),
        }
    }

    /// Whether the database lives in memory.
    pub fn is_in_memory(&self) -> bool {
        self.database.path.is_none()
    }
}

fn check_identifier(field: &str, value: &str) -> Result<()> {
    validate_identifier("config", value.trim()).map_err(|_| {
        DatabaseError::InvalidConfig(format!(
            "{field} must be a non-empty identifier, got '{value}'"
        ))
    })
}
