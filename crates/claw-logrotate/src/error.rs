//! Error types for the rotation engine.

use thiserror::Error;

/// Errors that can occur while configuring, writing to, or querying a
/// rotating transport.
#[derive(Debug, Error)]
pub enum RotateError {
    /// Conflicting or missing configuration options.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file name or directory contains characters that are not allowed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport exhausted its open retries and no longer writes.
    #[error("transport is in a failed state: {0}")]
    Failed(String),

    /// The transport was closed and accepts no further writes.
    #[error("transport is shut down")]
    ShutDown,

    /// The transport writes to a raw stream and has no file family to query.
    #[error("query is not supported on a stream sink")]
    QueryUnsupported,

    /// The query options are inconsistent.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type alias for rotation operations.
pub type Result<T> = std::result::Result<T, RotateError>;
