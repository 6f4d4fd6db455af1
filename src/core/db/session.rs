/// Session Executor Module
///
/// Runs queries on one dedicated connection that the executor opens and
/// closes itself.

use super::connection::{ConnectionHandle, SqliteConnection};
use super::lifecycle::{run_concurrent, run_transaction, settle};
use super::query::{IntoQueries, QueryResult};
use super::waterfall::Step;
use crate::config::ConnectionOptions;
use crate::core::Result;

/// Executor over a single owned connection.
///
/// `execute` and `execute_transaction` consume the executor: the handle is
/// opened at the start of the call and ended before it returns, on every
/// path, so it can serve exactly one call.
#[derive(Debug)]
pub struct SessionExecutor<C: ConnectionHandle> {
    handle: C,
}

/// Creates a session executor over a new, unopened SQLite connection
pub fn create_connection(options: ConnectionOptions) -> SessionExecutor<SqliteConnection> {
    SessionExecutor::new(SqliteConnection::new(options))
}

impl<C: ConnectionHandle> SessionExecutor<C> {
    /// Wraps an unopened handle
    pub fn new(handle: C) -> Self {
        SessionExecutor { handle }
    }

    /// The raw handle, for callers driving connect/query/end themselves
    pub fn handle(&self) -> &C {
        &self.handle
    }

    pub fn into_inner(self) -> C {
        self.handle
    }

    /// Opens the connection, runs every query concurrently on it, then closes
    /// it.
    ///
    /// A single query resolves to its bare result; a `Vec` resolves to
    /// results in input order. If opening fails nothing was acquired and no
    /// close is attempted.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn demo() -> queryflow::core::Result<()> {
    /// use queryflow::{create_connection, ConnectionOptions};
    ///
    /// let options = ConnectionOptions::new("app.db");
    /// let [hobbies, users]: [_; 2] = create_connection(options)
    ///     .execute(vec!["select name from HOBBY", "select name from USER"])
    ///     .await?
    ///     .try_into()
    ///     .expect("two results");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<Q: IntoQueries>(self, queries: Q) -> Result<Q::Output> {
        let queries = queries.into_queries();
        self.handle.connect().await?;

        let outcome = run_concurrent(&self.handle, &queries)
            .await
            .and_then(Q::collect_results)
            .map_err(Into::into);

        let disposal = self.handle.end().await;
        settle(outcome, disposal)
    }

    /// Opens the connection, runs `steps` as a waterfall inside a
    /// transaction, then closes it.
    ///
    /// Resolves with the last step's result after a successful commit. On a
    /// step or commit failure the transaction is rolled back and that failure
    /// is returned; a failing rollback is logged and does not replace it.
    pub async fn execute_transaction(self, steps: Vec<Step>) -> Result<Option<QueryResult>> {
        self.handle.connect().await?;

        let outcome = run_transaction(&self.handle, steps).await.map_err(Into::into);

        let disposal = self.handle.end().await;
        settle(outcome, disposal)
    }
}
