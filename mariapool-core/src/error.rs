/// Structured error types for mariapool-core.
///
/// Uses `thiserror` so library consumers can match on the disconnected
/// state separately from driver failures. The `mariapool` binary wraps
/// these in `anyhow` for reporting.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed driver failure, kept intact so callers can downcast it
/// (for example to `sqlx::Error`).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for mariapool-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A query was issued before `connect` or after `close`
    #[error("[MYSQL] Not connected to database")]
    NotConnected,

    /// `connect` was called on a client that already owns a pool
    #[error("[MYSQL] Already connected, call close() before connecting again")]
    AlreadyConnected,

    /// `start` was called while a connection is already pinned
    #[error("[MYSQL] A transaction is already in progress on this client")]
    TransactionInProgress,

    /// Failure surfaced by the underlying driver, passed through unchanged
    #[error("driver error: {0}")]
    Driver(#[source] BoxError),

    /// A row could not be deserialized into the requested type
    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),

    /// The driver answered with the other result shape
    #[error("unexpected query output: expected {expected}")]
    UnexpectedOutput { expected: &'static str },

    /// I/O operation failed
    #[error("I/O error at {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

/// Result type alias for mariapool-core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a driver failure
    pub fn driver(source: impl Into<BoxError>) -> Self {
        Self::Driver(source.into())
    }

    /// Create an I/O error tied to a path
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// True for the disconnected-state error
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }

    /// The underlying driver error, if this is one
    pub fn as_driver(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Driver(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::driver(err)
    }
}
