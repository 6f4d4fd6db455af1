/// Waterfall Sequencer
///
/// Runs an ordered list of step functions against one handle. Each step
/// builds its query from the previous step's result, so steps run strictly
/// one after another and the first failure stops the sequence.

use super::connection::ConnectionHandle;
use super::query::{Query, QueryResult};
use crate::core::DriverError;
use tracing::{debug, trace};

/// A query-producing step. The first step receives `None`.
pub type Step = Box<dyn FnOnce(Option<QueryResult>) -> Query + Send>;

/// Boxes a closure as a waterfall step
pub fn step<F, Q>(f: F) -> Step
where
    F: FnOnce(Option<QueryResult>) -> Q + Send + 'static,
    Q: Into<Query>,
{
    Box::new(move |previous| f(previous).into())
}

/// Runs `steps` in order on `handle` and returns the last step's result, or
/// `None` when there are no steps.
///
/// Intermediate results are moved into the next step and not retained.
pub async fn run_waterfall<H>(handle: &H, steps: Vec<Step>) -> Result<Option<QueryResult>, DriverError>
where
    H: ConnectionHandle + ?Sized,
{
    let total = steps.len();
    let mut previous = None;

    for (index, step) in steps.into_iter().enumerate() {
        let query = step(previous.take());
        trace!(step = index + 1, total, sql = %query.sql, "running waterfall step");

        match handle.query(&query).await {
            Ok(result) => previous = Some(result),
            Err(e) => {
                debug!(step = index + 1, total, error = %e, "waterfall step failed");
                return Err(e);
            }
        }
    }

    Ok(previous)
}
