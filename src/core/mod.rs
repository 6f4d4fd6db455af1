/// Core Module for Queryflow
///
/// This module contains the execution layer: connection handles, the session
/// and pool executors, the waterfall sequencer, and the shared error types.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DriverError, PoolError, QueryflowError, Result};
