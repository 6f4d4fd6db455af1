/// Query Module
///
/// Query descriptors handed to a connection handle and the results it
/// produces, plus the `IntoQueries` shape trait that lets `execute` return a
/// bare result for a single query and a positional vector for a batch.

use super::value::{Row, Value};
use crate::core::DriverError;
use serde::Serialize;

/// A statement and its ordered parameters.
///
/// The driver performs parameter substitution; placeholders are written in
/// the driver's syntax (`?` for SQLite).
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Query {
    /// Creates a query without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Query {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    /// Creates a query with the given positional parameters
    pub fn with_values<I, V>(sql: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Query {
            sql: sql.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends one positional parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::new(sql)
    }
}

impl From<&Query> for Query {
    fn from(query: &Query) -> Self {
        query.clone()
    }
}

/// Summary of a statement that returned no columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MutationSummary {
    /// Rows changed by the statement
    pub affected_rows: usize,
    /// Rowid generated by the statement, if it inserted one
    pub insert_id: Option<i64>,
}

/// The result of running one query descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Rows produced by a statement that returns columns
    Rows(Vec<Row>),
    /// Summary of a statement that changes data or schema
    Mutation(MutationSummary),
    /// One result per statement of multi-statement text, in statement order
    Multiple(Vec<QueryResult>),
}

impl QueryResult {
    /// The result of statement text that held no statement at all
    pub fn empty() -> Self {
        QueryResult::Mutation(MutationSummary::default())
    }

    /// Rows of a row-returning result; empty for anything else
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryResult::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryResult::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn affected_rows(&self) -> Option<usize> {
        match self {
            QueryResult::Mutation(summary) => Some(summary.affected_rows),
            _ => None,
        }
    }

    pub fn insert_id(&self) -> Option<i64> {
        match self {
            QueryResult::Mutation(summary) => summary.insert_id,
            _ => None,
        }
    }

    /// Per-statement results of multi-statement text. A single-statement
    /// result is returned as a one-element vector.
    pub fn into_results(self) -> Vec<QueryResult> {
        match self {
            QueryResult::Multiple(results) => results,
            other => vec![other],
        }
    }

    /// Renders the result as JSON: rows become objects keyed by column name
    pub fn to_json(&self) -> crate::core::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Input accepted by `execute`.
///
/// A single query (`Query`, `&str`, `String`) resolves to a bare
/// `QueryResult`; a `Vec` resolves to a `Vec<QueryResult>` aligned with the
/// input positions, even when it holds one element.
pub trait IntoQueries {
    type Output;

    fn into_queries(self) -> Vec<Query>;

    fn collect_results(results: Vec<QueryResult>) -> Result<Self::Output, DriverError>;
}

fn single_result(mut results: Vec<QueryResult>) -> Result<QueryResult, DriverError> {
    match results.len() {
        1 => Ok(results.swap_remove(0)),
        n => Err(DriverError::Message(format!(
            "expected exactly one result, got {}",
            n
        ))),
    }
}

impl IntoQueries for Query {
    type Output = QueryResult;

    fn into_queries(self) -> Vec<Query> {
        vec![self]
    }

    fn collect_results(results: Vec<QueryResult>) -> Result<QueryResult, DriverError> {
        single_result(results)
    }
}

impl IntoQueries for &str {
    type Output = QueryResult;

    fn into_queries(self) -> Vec<Query> {
        vec![Query::new(self)]
    }

    fn collect_results(results: Vec<QueryResult>) -> Result<QueryResult, DriverError> {
        single_result(results)
    }
}

impl IntoQueries for String {
    type Output = QueryResult;

    fn into_queries(self) -> Vec<Query> {
        vec![Query::new(self)]
    }

    fn collect_results(results: Vec<QueryResult>) -> Result<QueryResult, DriverError> {
        single_result(results)
    }
}

impl<Q: Into<Query>> IntoQueries for Vec<Q> {
    type Output = Vec<QueryResult>;

    fn into_queries(self) -> Vec<Query> {
        self.into_iter().map(Into::into).collect()
    }

    fn collect_results(results: Vec<QueryResult>) -> Result<Vec<QueryResult>, DriverError> {
        Ok(results)
    }
}
