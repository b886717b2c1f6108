//! Unified error types for tagcache.
//!
//! Display strings follow a `CODE: message` layout so that tool clients can
//! match on the prefix without parsing the rest.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the cache library and the tool server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty cid).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Cache tag is empty or contains whitespace.
    #[error("INVALID_TAG: {0:?}")]
    InvalidTag(String),

    /// Bin name is not usable as a table suffix.
    #[error("INVALID_BIN: {0:?}")]
    InvalidBin(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The backing table of a bin does not exist yet.
    #[error("CACHE_ERROR: bin table {0} does not exist")]
    MissingBin(String),

    /// The backing table exists but does not have the expected shape.
    #[error("SCHEMA_BROKEN: {0}")]
    SchemaBroken(String),

    /// Cached payload could not be encoded or decoded.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the backing store is structurally broken rather than merely absent or busy.
    ///
    /// Tolerant callers swallow every other store error; this one is always surfaced.
    pub fn is_schema_broken(&self) -> bool {
        matches!(self, Error::SchemaBroken(_))
    }

    /// Whether the error is a caller mistake that should never be degraded away.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::InvalidTag(_) | Error::InvalidBin(_))
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
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidTag(tag) => (-32602, format!("Invalid cache tag: {tag:?}")),
            Error::InvalidBin(bin) => (-32602, format!("Invalid bin name: {bin:?}")),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::MissingBin(table) => (-32002, format!("Bin table {table} does not exist")),
            Error::SchemaBroken(msg) => (-32003, msg.clone()),
            Error::Serialization(msg) => (-32004, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
