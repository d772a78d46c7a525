use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error type for the columnar codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The byte layout is inconsistent or unrecognized.
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// IO error while compressing a column.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Error type for cache lookups and population.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The reference source is missing or unreadable. Fatal for the run.
    #[error("Reference source unavailable: {path:?}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The reference source could not be parsed.
    #[error("Failed to parse reference source {path:?}: {reason}")]
    ParseFailure { path: PathBuf, reason: String },

    /// A cache artifact failed validation and could not be recovered.
    #[error("Corrupt cache artifact {path:?}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    /// Parse-and-populate exceeded its time budget.
    #[error("Populating the cache for {path:?} timed out after {timeout:?}")]
    PopulateTimeout { path: PathBuf, timeout: Duration },

    /// The run was cancelled while populating.
    #[error("Cache population for {0:?} was cancelled")]
    Cancelled(PathBuf),

    #[error("Invalid cache configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CacheError::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for varanno-cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
