//! Error types for indexing and search operations.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` implementations.
//!
//! Every variant aborts the single operation that raised it (one search, one
//! build step). Nothing in this crate retries automatically.

use crate::types::Precision;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, NewsIndexError>;

/// Error type for all pipeline and search operations.
#[derive(Error, Debug)]
pub enum NewsIndexError {
    /// Embedding model failure (query-blocking, not retried)
    #[error("Embedding failed: {0}")]
    Encoding(String),

    /// Malformed calibration range or quantization input
    #[error("Quantization failed: {0}")]
    Quantization(String),

    /// Search issued before the index (or its calibration) was loaded
    #[error("Index not ready: {0} index is not loaded")]
    IndexNotReady(Precision),

    /// Index or calibration file unreadable or schema-mismatched
    #[error("Data corruption in {path}: {reason}")]
    DataCorruption {
        /// File that failed to load
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Relational store unreachable or returned a malformed row
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Relational store unusable (poisoned connection, malformed row)
    #[error("Storage error: {0}")]
    StorageState(String),

    /// Caller supplied inconsistent input (lengths, dimensions, empty corpus)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV decoding error (geomap)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl NewsIndexError {
    /// Create a data corruption error for `path`.
    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DataCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an encoding error.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}

impl From<reqwest::Error> for NewsIndexError {
    fn from(err: reqwest::Error) -> Self {
        NewsIndexError::Encoding(err.to_string())
    }
}
