use std::path::PathBuf;
use thiserror::Error;

/// Main error type for evidra
///
/// Only configuration failures are fatal. Index mutation and retrieval
/// failures have their own typed errors and degrade at the engine boundary.
#[derive(Error, Debug)]
pub enum EvidraError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Embedding service dimension disagrees with the configured store dimension
    #[error("Dimension mismatch: store expects {expected}, embedding service produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Vector index construction errors
    #[error("Vector index error: {0}")]
    VectorIndex(#[from] crate::embedding::VectorIndexError),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for evidra operations
pub type Result<T> = std::result::Result<T, EvidraError>;
