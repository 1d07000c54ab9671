//! Error types for the Cascade core library.
//!
//! This module defines the error types used throughout the cascade-core crate,
//! providing structured error handling with detailed context.

use thiserror::Error;

/// The main error type for cascade-core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error when a namespace index is inserted twice into an example.
    #[error("Namespace already active: {namespace}")]
    DuplicateNamespace {
        /// The namespace index that was inserted twice.
        namespace: u8,
    },

    /// Error when an interaction term names an unusable namespace set.
    #[error("Invalid interaction term: {term}")]
    InvalidInteraction {
        /// The offending term as written in the configuration.
        term: String,
    },

    /// Error during configuration parsing or validation.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// A description of the configuration error.
        message: String,
    },

    /// Error when a caller-supplied destination buffer is too small.
    ///
    /// The destination is left untouched; `required` reports the size the
    /// caller must provide to receive the full result.
    #[error("Insufficient buffer capacity: required {required}, got {capacity}")]
    InsufficientBuffer {
        /// Number of elements required to hold the result.
        required: usize,
        /// Capacity the caller actually supplied.
        capacity: usize,
    },

    /// Error when a label cannot be parsed from its text tokens.
    #[error("Malformed label: {message}")]
    MalformedLabel {
        /// A description of what could not be parsed.
        message: String,
    },

    /// Error during state serialization or deserialization.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// A description of the serialization error.
        message: String,
    },

    /// I/O failure while reading or writing model state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for cascade-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Convenience constructor for configuration errors.
    pub fn config(message: impl Into<String>) -> Self {
        CoreError::ConfigError {
            message: message.into(),
        }
    }
}
