use std::io;

use thiserror::Error;
use varanno_cache::CacheError;

/// Run-level failures. Item-level problems never surface here; they are
/// recorded as rejected outcomes inside the batch.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The reference index could not be established.
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid pipeline configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for varanno-pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
