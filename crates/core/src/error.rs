//! Unified error types for taskcache.
//!
//! Each variant displays with a stable code prefix so pipeline consumers can
//! match on the failing component without downcasting.

use crate::task::TaskError;
use tokio_rusqlite::rusqlite;

/// Unified error type for the caching engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or incomplete configuration (missing store, empty category).
    #[error("CONFIG_ERROR: {0}")]
    Config(String),

    /// The record carries a streamed payload.
    #[error("UNSUPPORTED_STREAM: cannot operate on stream sources")]
    UnsupportedStream,

    /// The key function failed for a record.
    #[error("KEY_ERROR: {0}")]
    KeyDerivation(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A non-SQLite store backend failed.
    #[error("STORE_ERROR: {0}")]
    Store(String),

    /// The proxied task failed for this record.
    #[error("TASK_ERROR: {0}")]
    Task(#[from] TaskError),

    /// A result could not be encoded or restored.
    #[error("CODEC_ERROR: {0}")]
    Codec(String),
}

impl Error {
    /// Name of the component the error originated from.
    pub fn component(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::UnsupportedStream => "config",
            Error::KeyDerivation(_) => "fingerprint",
            Error::Database(_) | Error::MigrationFailed(_) | Error::Store(_) => "store",
            Error::Task(_) => "task",
            Error::Codec(_) => "codec",
        }
    }

    /// Whether resubmitting the same record can never succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnsupportedStream)
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
