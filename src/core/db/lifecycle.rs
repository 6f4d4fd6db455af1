/// Lifecycle Module
///
/// Pieces shared by the session and pool executors. The executors differ only
/// in how they obtain and dispose of a handle; what happens in between lives
/// here.

use super::connection::ConnectionHandle;
use super::query::{Query, QueryResult};
use super::waterfall::{run_waterfall, Step};
use crate::core::{DriverError, QueryflowError, Result};
use futures::future::join_all;
use tracing::warn;

/// Runs independent queries concurrently on one handle.
///
/// Every query settles before this returns, so no statement is still in
/// flight when the caller disposes of the handle. Results keep input
/// positions; the first failure in input order is returned.
pub(crate) async fn run_concurrent<H>(handle: &H, queries: &[Query]) -> std::result::Result<Vec<QueryResult>, DriverError>
where
    H: ConnectionHandle + ?Sized,
{
    join_all(queries.iter().map(|query| handle.query(query)))
        .await
        .into_iter()
        .collect()
}

/// Begins a transaction, runs the waterfall, then commits. Any step or commit
/// failure rolls back and surfaces the triggering error.
pub(crate) async fn run_transaction<H>(handle: &H, steps: Vec<Step>) -> std::result::Result<Option<QueryResult>, DriverError>
where
    H: ConnectionHandle + ?Sized,
{
    handle.begin_transaction().await?;

    let outcome = match run_waterfall(handle, steps).await {
        Ok(result) => handle.commit().await.map(|()| result),
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        if let Err(rollback_err) = handle.rollback().await {
            warn!(error = %e, rollback_error = %rollback_err, "rollback failed after transaction error");
        }
    }

    outcome
}

/// Combines an operation's outcome with the result of disposing its handle.
///
/// A disposal failure surfaces only when the operation itself succeeded;
/// otherwise it is logged and the operation's error wins.
pub(crate) fn settle<T>(outcome: Result<T>, disposal: std::result::Result<(), DriverError>) -> Result<T> {
    match (outcome, disposal) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(disposal_err)) => Err(QueryflowError::Driver(disposal_err)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(disposal_err)) => {
            warn!(error = %e, disposal_error = %disposal_err, "disposal failed after operation error");
            Err(e)
        }
    }
}
