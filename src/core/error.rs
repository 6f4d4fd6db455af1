/// Queryflow Error Module
///
/// This module defines the error types raised by connection handles, pools
/// and the executors built on top of them. Driver failures are propagated
/// verbatim; the executors never wrap a step failure in a separate kind.
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a connection handle.
///
/// Every primitive of a [`ConnectionHandle`](crate::core::db::ConnectionHandle)
/// fails with this type, carrying the underlying driver message.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Errors reported by SQLite
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The handle was used after `end` or before `connect`
    #[error("connection is closed")]
    Closed,

    /// `connect` was called on a handle that is already open
    #[error("connection is already open")]
    AlreadyOpen,

    /// Statement text held more than one statement while multi-statement
    /// execution was disabled
    #[error("multiple statements are disabled for this connection")]
    MultipleStatements,

    /// More parameters were supplied than the statement text consumes
    #[error("parameter count mismatch: statements consume {expected}, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    /// The connection mutex was poisoned by a panicking driver call
    #[error("connection state poisoned")]
    Poisoned,

    /// The blocking driver task failed to complete
    #[error("driver task failed: {0}")]
    Task(String),

    /// Free-form driver message, used by drivers without a typed error
    #[error("{0}")]
    Message(String),
}

/// Errors raised while obtaining a lease from a connection pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// No connection became available within the configured wait
    #[error("pool exhausted: no connection became available within {0:?}")]
    Exhausted(Duration),

    /// The pool failed to create a new connection
    #[error("pool could not create a connection: {0}")]
    Backend(#[source] DriverError),

    /// The pool has been closed
    #[error("pool is closed")]
    Closed,

    /// Any other pool failure (misconfiguration, hook failures)
    #[error("pool error: {0}")]
    Other(String),
}

/// Crate-level error type.
///
/// Covers driver and pool failures surfaced by the executors as well as
/// configuration loading.
#[derive(Error, Debug)]
pub enum QueryflowError {
    /// Connection, query and transaction-control failures
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Lease acquisition failures
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryflowError {
    /// Returns the driver error if this is one.
    pub fn as_driver(&self) -> Option<&DriverError> {
        match self {
            QueryflowError::Driver(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the pool could not hand out a connection in time.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, QueryflowError::Pool(PoolError::Exhausted(_)))
    }
}

/// Type alias for Result to use QueryflowError as the error type.
pub type Result<T> = std::result::Result<T, QueryflowError>;
