/// Connection Handle Module
///
/// This module defines the `ConnectionHandle` trait, the asynchronous facade
/// every executor drives, and `SqliteConnection`, its rusqlite-backed
/// implementation.

use super::query::{MutationSummary, Query, QueryResult};
use super::value::{Row, Value};
use crate::config::ConnectionOptions;
use crate::core::DriverError;
use async_trait::async_trait;
use rusqlite::{params_from_iter, Batch, Connection, Statement};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// An open database session.
///
/// Each primitive is a single-shot future; none is retried. Implementations
/// serialize concurrent `query` calls themselves if the driver requires it.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Opens the session
    async fn connect(&self) -> Result<(), DriverError>;

    /// Closes the session. A handle is closed at most once.
    async fn end(&self) -> Result<(), DriverError>;

    /// Runs one query descriptor
    async fn query(&self, query: &Query) -> Result<QueryResult, DriverError>;

    async fn begin_transaction(&self) -> Result<(), DriverError>;

    async fn commit(&self) -> Result<(), DriverError>;

    /// Rolls back the open transaction. Succeeds as a no-op when none is open.
    async fn rollback(&self) -> Result<(), DriverError>;

    fn is_open(&self) -> bool;

    fn in_transaction(&self) -> bool;
}

/// Connection slot shared with blocking driver tasks
type Slot = Arc<Mutex<Option<Connection>>>;

/// A single SQLite session
pub struct SqliteConnection {
    id: Uuid,
    options: ConnectionOptions,
    slot: Slot,
    open: AtomicBool,
    in_transaction: AtomicBool,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("id", &self.id)
            .field("database", &self.options.database)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SqliteConnection {
    /// Creates an unopened handle. Nothing touches the database until
    /// `connect` is awaited.
    pub fn new(options: ConnectionOptions) -> Self {
        SqliteConnection {
            id: Uuid::new_v4(),
            options,
            slot: Arc::new(Mutex::new(None)),
            open: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Runs `op` on a blocking worker with exclusive access to the
    /// connection slot. Every driver primitive goes through here.
    async fn with_slot<T, F>(&self, op: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Option<Connection>) -> Result<T, DriverError> + Send + 'static,
    {
        let slot = Arc::clone(&self.slot);
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().map_err(|_| DriverError::Poisoned)?;
            op(&mut guard)
        })
        .await
        .map_err(|e| DriverError::Task(e.to_string()))?
    }

    /// Like `with_slot`, for operations that need an open connection
    async fn with_connection<T, F>(&self, op: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, DriverError> + Send + 'static,
    {
        self.with_slot(|slot| match slot.as_mut() {
            Some(conn) => op(conn),
            None => Err(DriverError::Closed),
        })
        .await
    }
}

#[async_trait]
impl ConnectionHandle for SqliteConnection {
    async fn connect(&self) -> Result<(), DriverError> {
        let options = self.options.clone();
        debug!(
            connection_id = %self.id,
            database = %options.database,
            host = ?options.host,
            user = ?options.user,
            "opening connection"
        );

        self.with_slot(move |slot| {
            if slot.is_some() {
                return Err(DriverError::AlreadyOpen);
            }
            *slot = Some(open_connection(&options)?);
            Ok(())
        })
        .await?;

        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) -> Result<(), DriverError> {
        debug!(connection_id = %self.id, "closing connection");
        self.open.store(false, Ordering::SeqCst);
        self.in_transaction.store(false, Ordering::SeqCst);

        self.with_slot(|slot| {
            let conn = slot.take().ok_or(DriverError::Closed)?;
            conn.close().map_err(|(_, e)| DriverError::Sqlite(e))
        })
        .await
    }

    async fn query(&self, query: &Query) -> Result<QueryResult, DriverError> {
        trace!(connection_id = %self.id, sql = %query.sql, params = query.values.len(), "running query");
        let query = query.clone();
        let multiple_statements = self.options.multiple_statements;
        self.with_connection(move |conn| run_query(conn, &query, multiple_statements))
            .await
    }

    async fn begin_transaction(&self) -> Result<(), DriverError> {
        debug!(connection_id = %self.id, "begin transaction");
        self.with_connection(|conn| Ok(conn.execute_batch("BEGIN")?))
            .await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), DriverError> {
        debug!(connection_id = %self.id, "commit transaction");
        self.with_connection(|conn| Ok(conn.execute_batch("COMMIT")?))
            .await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        debug!(connection_id = %self.id, "rollback transaction");
        self.with_slot(|slot| match slot.as_mut() {
            Some(conn) if !conn.is_autocommit() => Ok(conn.execute_batch("ROLLBACK")?),
            _ => Ok(()),
        })
        .await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}

fn open_connection(options: &ConnectionOptions) -> Result<Connection, DriverError> {
    let conn = Connection::open(&options.database)?;
    conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
    conn.pragma_update(None, "foreign_keys", true)?;

    if options.database != ":memory:" {
        // journal_mode reports the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    }

    Ok(conn)
}

/// Runs statement text on `conn`, splitting it into statements when
/// multi-statement execution is enabled.
fn run_query(
    conn: &Connection,
    query: &Query,
    multiple_statements: bool,
) -> Result<QueryResult, DriverError> {
    let mut values = query.values.iter();
    let mut results = Vec::new();

    // Later statements may depend on earlier ones, so prepare lazily
    let mut batch = Batch::new(conn, &query.sql);
    if multiple_statements {
        while let Some(mut stmt) = batch.next()? {
            results.push(run_statement(conn, &mut stmt, &mut values)?);
        }
    } else if let Some(mut stmt) = batch.next()? {
        // Any trailing statement rejects the text, even one that cannot be
        // prepared yet
        if !matches!(batch.next(), Ok(None)) {
            return Err(DriverError::MultipleStatements);
        }
        results.push(run_statement(conn, &mut stmt, &mut values)?);
    }

    let leftover = values.count();
    if leftover > 0 {
        return Err(DriverError::ParameterCount {
            expected: query.values.len() - leftover,
            actual: query.values.len(),
        });
    }

    Ok(match results.len() {
        0 => QueryResult::empty(),
        1 => results.swap_remove(0),
        _ => QueryResult::Multiple(results),
    })
}

fn run_statement<'v>(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    values: &mut impl Iterator<Item = &'v Value>,
) -> Result<QueryResult, DriverError> {
    let params: Vec<&Value> = values.take(stmt.parameter_count()).collect();

    if stmt.column_count() > 0 {
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                cells.push((name.clone(), Value::from(row.get_ref(i)?)));
            }
            out.push(Row::new(cells));
        }
        Ok(QueryResult::Rows(out))
    } else {
        let inserts = stmt.expanded_sql().map_or(false, |sql| is_insert(&sql));
        let affected_rows = stmt.execute(params_from_iter(params))?;
        Ok(QueryResult::Mutation(MutationSummary {
            affected_rows,
            insert_id: (inserts && affected_rows > 0).then(|| conn.last_insert_rowid()),
        }))
    }
}

/// Whether statement text is an INSERT or REPLACE, skipping leading
/// whitespace and comments
fn is_insert(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            break;
        }
    }

    let keyword: String = rest.chars().take_while(char::is_ascii_alphabetic).collect();
    keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_options(multiple_statements: bool) -> ConnectionOptions {
        ConnectionOptions {
            multiple_statements,
            ..ConnectionOptions::new(":memory:")
        }
    }

    #[tokio::test]
    async fn test_connect_query_end() {
        let conn = SqliteConnection::new(memory_options(false));
        assert!(!conn.is_open());

        conn.connect().await.unwrap();
        assert!(conn.is_open());

        let result = conn.query(&Query::new("select 1 as one, 'x' as two")).await.unwrap();
        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.rows()[0].get("one"), Some(&Value::Integer(1)));
        assert_eq!(result.rows()[0].get("two"), Some(&Value::Text("x".into())));

        conn.end().await.unwrap();
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let conn = SqliteConnection::new(memory_options(false));

        match conn.query(&Query::new("select 1")).await {
            Err(DriverError::Closed) => {}
            other => panic!("Expected Closed, got {:?}", other),
        }

        conn.connect().await.unwrap();
        match conn.connect().await {
            Err(DriverError::AlreadyOpen) => {}
            other => panic!("Expected AlreadyOpen, got {:?}", other),
        }

        conn.end().await.unwrap();
        match conn.end().await {
            Err(DriverError::Closed) => {}
            other => panic!("Expected Closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mutation_summary_and_insert_id() {
        let conn = SqliteConnection::new(memory_options(false));
        conn.connect().await.unwrap();
        conn.query(&Query::new("create table t (id integer primary key autoincrement, name text)"))
            .await
            .unwrap();

        let inserted = conn
            .query(&Query::new("insert into t (name) values (?)").bind("alice"))
            .await
            .unwrap();
        assert_eq!(inserted.affected_rows(), Some(1));
        assert_eq!(inserted.insert_id(), Some(1));

        let updated = conn
            .query(&Query::new("update t set name = ? where id = ?").bind("bob").bind(1))
            .await
            .unwrap();
        assert_eq!(updated.affected_rows(), Some(1));
        assert_eq!(updated.insert_id(), None);

        conn.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_id_repeats_across_tables() {
        let conn = SqliteConnection::new(memory_options(false));
        conn.connect().await.unwrap();
        conn.query(&Query::new("create table a (id integer primary key, v text)")).await.unwrap();
        conn.query(&Query::new("create table b (id integer primary key, v text)")).await.unwrap();

        let first = conn.query(&Query::new("insert into a (v) values ('x')")).await.unwrap();
        let second = conn.query(&Query::new("insert into b (v) values ('y')")).await.unwrap();
        assert_eq!(first.insert_id(), Some(1));
        assert_eq!(second.insert_id(), Some(1));

        let replaced = conn
            .query(&Query::new("replace into b (id, v) values (1, 'z')"))
            .await
            .unwrap();
        assert_eq!(replaced.insert_id(), Some(1));

        let deleted = conn.query(&Query::new("delete from a")).await.unwrap();
        assert_eq!(deleted.affected_rows(), Some(1));
        assert_eq!(deleted.insert_id(), None);

        conn.end().await.unwrap();
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("insert into t values (1)"));
        assert!(is_insert("  REPLACE into t values (1)"));
        assert!(is_insert("-- add a row\n/* note */ Insert into t values (1)"));
        assert!(!is_insert("update t set v = 1"));
        assert!(!is_insert("select 'insert'"));
        assert!(!is_insert("-- insert"));
    }

    #[tokio::test]
    async fn test_multiple_statements_flag() {
        let single = SqliteConnection::new(memory_options(false));
        single.connect().await.unwrap();
        match single.query(&Query::new("select 1; select 2;")).await {
            Err(DriverError::MultipleStatements) => {}
            other => panic!("Expected MultipleStatements, got {:?}", other),
        }
        // The second statement cannot be prepared before the first runs
        match single
            .query(&Query::new("create table z (a integer); insert into z values (1);"))
            .await
        {
            Err(DriverError::MultipleStatements) => {}
            other => panic!("Expected MultipleStatements, got {:?}", other),
        }
        // Nothing ran
        let tables = single
            .query(&Query::new("select name from sqlite_master where name = 'z'"))
            .await
            .unwrap();
        assert!(tables.rows().is_empty());
        // Trailing whitespace and comments are not statements
        let one = single.query(&Query::new("select 1 as one; -- done\n")).await.unwrap();
        assert_eq!(one.rows()[0].get("one"), Some(&Value::Integer(1)));
        single.end().await.unwrap();

        let multi = SqliteConnection::new(memory_options(true));
        multi.connect().await.unwrap();
        let result = multi
            .query(&Query::new(
                "create table h (name text); insert into h values (?); select name from h;",
            ).bind("soccer"))
            .await
            .unwrap();
        let results = result.into_results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].affected_rows(), Some(1));
        assert_eq!(results[2].rows()[0].get("name").and_then(Value::as_str), Some("soccer"));
        multi.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_extra_parameters_rejected() {
        let conn = SqliteConnection::new(memory_options(false));
        conn.connect().await.unwrap();
        match conn.query(&Query::new("select ?").bind(1).bind(2)).await {
            Err(DriverError::ParameterCount { expected: 1, actual: 2 }) => {}
            other => panic!("Expected ParameterCount, got {:?}", other),
        }
        conn.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_control() {
        let conn = SqliteConnection::new(memory_options(false));
        conn.connect().await.unwrap();

        // No open transaction: rollback is a no-op
        conn.rollback().await.unwrap();

        conn.query(&Query::new("create table t (v integer)")).await.unwrap();
        conn.begin_transaction().await.unwrap();
        assert!(conn.in_transaction());
        conn.query(&Query::new("insert into t values (1)")).await.unwrap();
        conn.rollback().await.unwrap();
        assert!(!conn.in_transaction());

        let count = conn.query(&Query::new("select count(*) as n from t")).await.unwrap();
        assert_eq!(count.rows()[0].get("n"), Some(&Value::Integer(0)));

        conn.begin_transaction().await.unwrap();
        conn.query(&Query::new("insert into t values (2)")).await.unwrap();
        conn.commit().await.unwrap();

        let count = conn.query(&Query::new("select count(*) as n from t")).await.unwrap();
        assert_eq!(count.rows()[0].get("n"), Some(&Value::Integer(1)));

        conn.end().await.unwrap();

        // Closed handle: rollback still succeeds
        conn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_failure() {
        let conn = SqliteConnection::new(ConnectionOptions::new("/nonexistent/path/database.db"));
        match conn.connect().await {
            Err(DriverError::Sqlite(_)) => {}
            other => panic!("Expected Sqlite error, got {:?}", other),
        }
        assert!(!conn.is_open());
    }
}
