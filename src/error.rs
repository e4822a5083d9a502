//! Error types for the crate.

use thiserror::Error;

/// Errors surfaced at the library boundary.
///
/// The training core itself does not recover from these; they propagate out
/// of the constructors and setters that validate user input.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or out-of-range parameter value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input array has the wrong shape for the dataset it is attached to.
    #[error("data shape mismatch: {0}")]
    DataShape(String),

    /// File read/write failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Model file could not be parsed.
    #[error("malformed model: {0}")]
    ModelFormat(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
