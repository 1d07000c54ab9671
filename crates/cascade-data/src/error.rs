//! Error types for the Cascade data pipeline.

use thiserror::Error;

/// The main error type for cascade-data operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// Error bubbled up from the core data model.
    #[error(transparent)]
    Core(#[from] cascade_core::CoreError),

    /// I/O failure while reading input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for cascade-data operations.
pub type Result<T> = std::result::Result<T, DataError>;
