/// Database Module
///
/// This module provides the execution layer between application code and a
/// database connection or pool.
///
/// ## Architecture
///
/// - **Connection Handle** (`connection.rs`): the async `ConnectionHandle` trait and its SQLite implementation
/// - **Session Executor** (`session.rs`): `execute`/`execute_transaction` over one owned connection
/// - **Pool Executor** (`pool.rs`): the same operations over connections leased from a pool
/// - **Waterfall Sequencer** (`waterfall.rs`): sequential steps, each fed the previous result
/// - **Queries and Values** (`query.rs`, `value.rs`): descriptors and results exchanged with a handle
///
/// ## Resource Guarantees
///
/// Every handle an executor obtains is disposed of exactly once (`end` for an
/// owned connection, release for a lease) on success and failure alike.
pub mod connection;
mod lifecycle;
pub mod pool;
pub mod query;
pub mod session;
pub mod value;
pub mod waterfall;

pub use connection::*;
pub use pool::*;
pub use query::*;
pub use session::*;
pub use value::*;
pub use waterfall::*;
