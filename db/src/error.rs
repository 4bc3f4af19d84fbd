//! Error types for configuration and dump document handling.

use thiserror::Error;

/// Errors that can occur while reading or writing store configuration and
/// dump documents.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A configuration value failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A dump document is structurally inconsistent.
    #[error("invalid dump document: {0}")]
    InvalidDump(String),

    /// Gzip compression or decompression failure, or gzip requested without
    /// the `gzip` feature.
    #[error("compression error: {0}")]
    CompressionError(String),
}

/// Convenience alias for results with [`DatabaseError`].
pub type Result<T> = std::result::Result<T, DatabaseError>;
