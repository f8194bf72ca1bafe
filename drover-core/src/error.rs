//! Error types for drover-core

use thiserror::Error;

/// Main error type for the drover-core library
///
/// The pipeline handles its own failures: nothing here ever propagates to
/// instrumentation callers of `log_event`/`enqueue`. Errors surface through
/// operational logging and through queue growth only.
#[derive(Error, Debug)]
pub enum Error {
    /// Durable queue store error (open, read, or write)
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Upload transport error (network failure or non-2xx response)
    #[error("transport error: {0}")]
    Transport(String),

    /// Field encryption error
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Result type alias for drover-core
pub type Result<T> = std::result::Result<T, Error>;
