use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unparseable coordinate: {0}")]
    UnparseableCoordinate(String),

    #[error("Invalid variant key: {0}")]
    InvalidVariantKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for varanno-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
