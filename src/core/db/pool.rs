/// Pool Lease Executor Module
///
/// Runs queries on connections leased from a `deadpool` managed pool. The
/// pool owns connection creation, health checks and capacity; this module
/// only acquires leases and hands them back.

use super::connection::{ConnectionHandle, SqliteConnection};
use super::lifecycle::{run_concurrent, run_transaction, settle};
use super::query::{IntoQueries, Query, QueryResult};
use super::waterfall::Step;
use crate::config::{ConnectionOptions, PoolOptions};
use crate::core::{DriverError, PoolError, QueryflowError, Result};
use deadpool::managed::{self, Manager, Metrics, Object, RecycleError, RecycleResult};
use deadpool::Runtime;
use std::ops::Deref;
use std::time::Duration;
use tracing::{debug, warn};

/// Pool manager creating connected SQLite handles
#[derive(Debug, Clone)]
pub struct SqliteManager {
    options: ConnectionOptions,
}

impl SqliteManager {
    pub fn new(options: ConnectionOptions) -> Self {
        SqliteManager { options }
    }
}

impl Manager for SqliteManager {
    type Type = SqliteConnection;
    type Error = DriverError;

    async fn create(&self) -> std::result::Result<SqliteConnection, DriverError> {
        let conn = SqliteConnection::new(self.options.clone());
        conn.connect().await?;
        debug!(connection_id = %conn.id(), "pool created connection");
        Ok(conn)
    }

    async fn recycle(&self, conn: &mut SqliteConnection, _: &Metrics) -> RecycleResult<DriverError> {
        // A lease returned mid-transaction must not leak its scope to the next
        // holder; rollback is a no-op when none is open
        conn.rollback().await.map_err(RecycleError::Backend)?;
        conn.query(&Query::new("SELECT 1")).await.map(|_| ()).map_err(|e| {
            warn!(connection_id = %conn.id(), error = %e, "connection failed healthcheck");
            RecycleError::Backend(e)
        })
    }
}

/// A handle on loan from a pool.
///
/// The lease goes back to the pool when released or dropped; ownership makes
/// a second return impossible.
pub struct Lease<M: Manager> {
    object: Object<M>,
}

impl<M: Manager> Lease<M> {
    /// Returns the handle to the pool
    pub fn release(self) {
        debug!("releasing lease");
        drop(self);
    }
}

impl<M: Manager> Deref for Lease<M> {
    type Target = M::Type;

    fn deref(&self) -> &M::Type {
        &self.object
    }
}

/// Executor over a shared connection pool
pub struct PoolExecutor<M: Manager> {
    pool: managed::Pool<M>,
    wait_timeout: Duration,
}

impl<M: Manager> Clone for PoolExecutor<M> {
    fn clone(&self) -> Self {
        PoolExecutor {
            pool: self.pool.clone(),
            wait_timeout: self.wait_timeout,
        }
    }
}

/// Creates a pool executor over SQLite connections
pub fn create_pool(options: ConnectionOptions, pool_options: &PoolOptions) -> Result<PoolExecutor<SqliteManager>> {
    PoolExecutor::new(SqliteManager::new(options), pool_options)
}

impl<M> PoolExecutor<M>
where
    M: Manager<Error = DriverError>,
    M::Type: ConnectionHandle,
{
    /// Builds a pool around `manager`. Acquisition waits at most
    /// `pool_options.wait_timeout_ms` for a free connection.
    pub fn new(manager: M, pool_options: &PoolOptions) -> Result<Self> {
        let wait_timeout = Duration::from_millis(pool_options.wait_timeout_ms);
        let pool = managed::Pool::builder(manager)
            .max_size(pool_options.max_size)
            .wait_timeout(Some(wait_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| QueryflowError::Config(format!("invalid pool configuration: {}", e)))?;

        Ok(PoolExecutor { pool, wait_timeout })
    }

    /// Current size and availability of the pool
    pub fn status(&self) -> managed::Status {
        self.pool.status()
    }

    /// Leases one connection. Fails with `PoolError::Exhausted` when none
    /// becomes available within the wait timeout.
    pub async fn get_connection(&self) -> Result<Lease<M>> {
        let object = self.pool.get().await.map_err(|e| self.map_pool_error(e))?;
        debug!("lease acquired");
        Ok(Lease { object })
    }

    /// Runs one query descriptor on a short-lived lease.
    ///
    /// Multi-statement text (when enabled on the connections) resolves to
    /// `QueryResult::Multiple` with one entry per statement.
    pub async fn query(&self, query: impl Into<Query>) -> Result<QueryResult> {
        let query = query.into();
        let lease = self.get_connection().await?;
        let outcome = lease.query(&query).await.map_err(Into::into);
        lease.release();
        outcome
    }

    /// Leases a connection, runs every query concurrently on it, then
    /// releases it. Same result shape rules as `SessionExecutor::execute`.
    pub async fn execute<Q: IntoQueries>(&self, queries: Q) -> Result<Q::Output> {
        let queries = queries.into_queries();
        let lease = self.get_connection().await?;

        let outcome = run_concurrent(&*lease, &queries)
            .await
            .and_then(Q::collect_results)
            .map_err(Into::into);

        lease.release();
        settle(outcome, Ok(()))
    }

    /// Leases a connection and runs `steps` as a waterfall inside a
    /// transaction. The lease is released after commit or rollback on every
    /// path.
    pub async fn execute_transaction(&self, steps: Vec<Step>) -> Result<Option<QueryResult>> {
        let lease = self.get_connection().await?;

        let outcome = run_transaction(&*lease, steps).await.map_err(Into::into);

        lease.release();
        settle(outcome, Ok(()))
    }

    /// Closes the pool. Outstanding leases are dropped on return.
    pub fn close(&self) {
        self.pool.close();
    }

    fn map_pool_error(&self, err: managed::PoolError<DriverError>) -> QueryflowError {
        let err = match err {
            managed::PoolError::Timeout(_) => PoolError::Exhausted(self.wait_timeout),
            managed::PoolError::Backend(e) => PoolError::Backend(e),
            managed::PoolError::Closed => PoolError::Closed,
            other => PoolError::Other(other.to_string()),
        };
        debug!(error = %err, "lease acquisition failed");
        err.into()
    }
}
