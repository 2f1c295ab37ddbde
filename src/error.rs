//! Failures that end a pipeline run.
//!
//! Row-level problems never surface here: they are counted as
//! [`SkipReason`](crate::types::SkipReason)s or logged as anomalies.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    /// Input unreadable or output unwritable
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured column is absent from the CSV header
    #[error("Column '{column}' not found in {path:?} (available: {available})")]
    MissingColumn {
        column: String,
        path: PathBuf,
        available: String,
    },

    /// No feature carries the configured key property
    #[error("No feature in {path:?} has the key property '{property}'")]
    MissingProperty { property: String, path: PathBuf },

    #[error("Unsupported geometry format: {0}")]
    UnsupportedGeometry(String),

    #[error("Invalid geometry in {path:?}: {reason}")]
    InvalidGeometry { path: PathBuf, reason: String },

    /// Everything was filtered out; the document was still written
    #[error("No {what} left to render, wrote an empty map to {path:?}")]
    EmptyResult { what: &'static str, path: PathBuf },
}

impl MapError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::EmptyResult { .. } => 2,
            _ => 1,
        }
    }
}

/// Exit code for any pipeline error; anything that is not a `MapError` is fatal.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<MapError>().map_or(1, MapError::exit_code)
}
