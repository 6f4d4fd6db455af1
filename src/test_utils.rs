/// # Test Utilities Module
///
/// Testing infrastructure for queryflow.
///
/// This module provides:
/// - `MockConnection`, a scripted handle that counts every primitive call
/// - `MockManager`, a pool manager handing out mock handles
/// - `HobbyFixture`, a seeded SQLite database file with USER/HOBBY tables
/// - Test logging setup

use crate::config::ConnectionOptions;
use crate::core::db::{create_connection, ConnectionHandle, Query, QueryResult, Row, Value};
use crate::core::{DriverError, Result};
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;

/// Installs a test-writer tracing subscriber once per process
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Counters shared between a mock handle and the test observing it
#[derive(Debug, Default)]
pub struct CallLog {
    connects: AtomicUsize,
    ends: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    queries: Mutex<Vec<Query>>,
}

impl CallLog {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Queries received, in arrival order
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().map(|q| q.len()).unwrap_or_default()
    }

    fn record(&self, query: &Query) {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }
    }
}

#[derive(Debug, Clone)]
enum Response {
    Result(QueryResult),
    Error(String),
}

/// Scripted behaviour for mock handles, keyed by statement text
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    responses: HashMap<String, Response>,
    delays: HashMap<String, Duration>,
    fail_connect: bool,
    fail_end: bool,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
}

impl MockScript {
    /// Answer `sql` with `result`
    pub fn respond(mut self, sql: &str, result: QueryResult) -> Self {
        self.responses.insert(sql.to_string(), Response::Result(result));
        self
    }

    /// Fail `sql` with a driver error carrying `message`
    pub fn fail(mut self, sql: &str, message: &str) -> Self {
        self.responses.insert(sql.to_string(), Response::Error(message.to_string()));
        self
    }

    /// Hold `sql` for `delay` before answering
    pub fn delay(mut self, sql: &str, delay: Duration) -> Self {
        self.delays.insert(sql.to_string(), delay);
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn fail_end(mut self) -> Self {
        self.fail_end = true;
        self
    }

    pub fn fail_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }
}

/// A scripted connection handle.
///
/// Unscripted statements answer with one row whose `tag` column holds the
/// statement text. The mock does not enforce open/closed state.
#[derive(Debug, Default)]
pub struct MockConnection {
    script: MockScript,
    log: Arc<CallLog>,
    open: AtomicBool,
    in_transaction: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: MockScript, log: Arc<CallLog>) -> Self {
        MockConnection {
            script,
            log,
            ..Self::default()
        }
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }

    pub fn respond(self, sql: &str, result: QueryResult) -> Self {
        self.map_script(|s| s.respond(sql, result))
    }

    pub fn fail(self, sql: &str, message: &str) -> Self {
        self.map_script(|s| s.fail(sql, message))
    }

    pub fn delay(self, sql: &str, delay: Duration) -> Self {
        self.map_script(|s| s.delay(sql, delay))
    }

    pub fn fail_connect(self) -> Self {
        self.map_script(MockScript::fail_connect)
    }

    pub fn fail_end(self) -> Self {
        self.map_script(MockScript::fail_end)
    }

    pub fn fail_begin(self) -> Self {
        self.map_script(MockScript::fail_begin)
    }

    pub fn fail_commit(self) -> Self {
        self.map_script(MockScript::fail_commit)
    }

    pub fn fail_rollback(self) -> Self {
        self.map_script(MockScript::fail_rollback)
    }

    /// The `tag` of an unscripted result, i.e. the statement that produced it
    pub fn tag_of(result: &QueryResult) -> Option<String> {
        result
            .rows()
            .first()
            .and_then(|row| row.get("tag"))
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn map_script(mut self, f: impl FnOnce(MockScript) -> MockScript) -> Self {
        self.script = f(std::mem::take(&mut self.script));
        self
    }
}

fn scripted_failure(enabled: bool, what: &str) -> std::result::Result<(), DriverError> {
    if enabled {
        Err(DriverError::Message(format!("{} failed", what)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ConnectionHandle for MockConnection {
    async fn connect(&self) -> std::result::Result<(), DriverError> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        scripted_failure(self.script.fail_connect, "connect")?;
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) -> std::result::Result<(), DriverError> {
        self.log.ends.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        scripted_failure(self.script.fail_end, "end")
    }

    async fn query(&self, query: &Query) -> std::result::Result<QueryResult, DriverError> {
        self.log.record(query);

        if let Some(delay) = self.script.delays.get(&query.sql) {
            tokio::time::sleep(*delay).await;
        }

        match self.script.responses.get(&query.sql) {
            Some(Response::Result(result)) => Ok(result.clone()),
            Some(Response::Error(message)) => Err(DriverError::Message(message.clone())),
            None => Ok(QueryResult::Rows(vec![Row::new(vec![(
                "tag".to_string(),
                Value::Text(query.sql.clone()),
            )])])),
        }
    }

    async fn begin_transaction(&self) -> std::result::Result<(), DriverError> {
        self.log.begins.fetch_add(1, Ordering::SeqCst);
        scripted_failure(self.script.fail_begin, "begin")?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> std::result::Result<(), DriverError> {
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        scripted_failure(self.script.fail_commit, "commit")?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> std::result::Result<(), DriverError> {
        self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.in_transaction.store(false, Ordering::SeqCst);
        scripted_failure(self.script.fail_rollback, "rollback")
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}

/// Pool manager handing out connected mock handles that share one `CallLog`
#[derive(Debug, Clone)]
pub struct MockManager {
    script: MockScript,
    log: Arc<CallLog>,
}

impl MockManager {
    pub fn new(script: MockScript) -> Self {
        MockManager {
            script,
            log: Arc::new(CallLog::default()),
        }
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }
}

impl Manager for MockManager {
    type Type = MockConnection;
    type Error = DriverError;

    async fn create(&self) -> std::result::Result<MockConnection, DriverError> {
        let conn = MockConnection::with_script(self.script.clone(), Arc::clone(&self.log));
        conn.connect().await?;
        Ok(conn)
    }

    async fn recycle(&self, conn: &mut MockConnection, _: &Metrics) -> RecycleResult<DriverError> {
        if conn.in_transaction() {
            conn.rollback().await.map_err(RecycleError::Backend)?;
        }
        Ok(())
    }
}

pub const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS USER (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name VARCHAR(128) NOT NULL
    );
    CREATE TABLE IF NOT EXISTS HOBBY (
        name VARCHAR(128) PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS USER_HOBBY (
        user_id INTEGER NOT NULL REFERENCES USER(id),
        hobby_name VARCHAR(128) NOT NULL REFERENCES HOBBY(name),
        PRIMARY KEY (user_id, hobby_name)
    );
";

pub const INSERT_ROWS: &str = "
    INSERT INTO USER (name) VALUES ('rikmms');
    INSERT INTO HOBBY (name) VALUES ('soccer');
    INSERT INTO USER_HOBBY (user_id, hobby_name) VALUES (1, 'soccer');
";

/// A temporary SQLite database seeded with one user (`rikmms`, id 1), one
/// hobby (`soccer`) and the link between them. The database lives in its own
/// temporary directory, removed with its WAL files on drop.
#[derive(Debug)]
pub struct HobbyFixture {
    _dir: TempDir,
    path: PathBuf,
}

impl HobbyFixture {
    pub async fn seeded() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("queryflow-").tempdir()?;
        let fixture = HobbyFixture {
            path: dir.path().join("hobbies.db"),
            _dir: dir,
        };

        create_connection(fixture.options())
            .execute(Query::new(format!("{}{}", CREATE_TABLES, INSERT_ROWS)))
            .await?;

        Ok(fixture)
    }

    /// Options for the fixture database, with multi-statement text enabled
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            multiple_statements: true,
            ..ConnectionOptions::new(self.path.to_string_lossy())
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
