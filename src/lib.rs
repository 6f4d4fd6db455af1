// Core infrastructure modules
pub mod core;

pub mod config;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::config::{ConnectionOptions, PoolOptions};
pub use crate::core::db::{
    create_connection, create_pool, run_waterfall, step, ConnectionHandle, IntoQueries, Lease,
    PoolExecutor, Query, QueryResult, Row, SessionExecutor, SqliteConnection, SqliteManager, Step,
    Value,
};
pub use crate::core::{DriverError, PoolError, QueryflowError, Result};
