//! Pool executor tests, against SQLite-backed pools and mock managers

use queryflow::core::db::ConnectionHandle;
use queryflow::test_utils::{init_test_logging, HobbyFixture, MockManager, MockScript};
use queryflow::{
    create_pool, step, PoolError, PoolExecutor, PoolOptions, Query, QueryResult, QueryflowError,
    SqliteManager, Value,
};
use std::time::{Duration, Instant};

fn names(result: &QueryResult) -> Vec<String> {
    result
        .rows()
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(String::from))
        .collect()
}

async fn seeded_pool(max_size: usize) -> (HobbyFixture, PoolExecutor<SqliteManager>) {
    init_test_logging();
    let fixture = HobbyFixture::seeded().await.expect("fixture database");
    let pool = create_pool(
        fixture.options(),
        &PoolOptions {
            max_size,
            wait_timeout_ms: 100,
        },
    )
    .expect("pool");
    (fixture, pool)
}

#[tokio::test]
async fn test_hobbies_of_user_one() {
    let (_fixture, pool) = seeded_pool(2).await;

    let hobbies = pool
        .execute(Query::new("select hobby_name as name from USER_HOBBY where user_id=?").bind(1))
        .await
        .unwrap();

    assert_eq!(hobbies.rows().len(), 1);
    assert_eq!(names(&hobbies), vec!["soccer"]);
}

#[tokio::test]
async fn test_hobbies_with_leased_connection() {
    let (_fixture, pool) = seeded_pool(2).await;

    let connection = pool.get_connection().await.unwrap();
    let hobbies = connection
        .query(&Query::new("select hobby_name as name from USER_HOBBY where user_id=1"))
        .await
        .unwrap();
    connection.release();

    assert_eq!(names(&hobbies), vec!["soccer"]);
    assert_eq!(pool.status().available, 1);
}

#[tokio::test]
async fn test_all_hobbies_and_users() {
    let (_fixture, pool) = seeded_pool(2).await;

    let results = pool
        .execute(vec!["select name from HOBBY", "select name from USER"])
        .await
        .unwrap();

    assert_eq!(names(&results[0]), vec!["soccer"]);
    assert_eq!(names(&results[1]), vec!["rikmms"]);
}

#[tokio::test]
async fn test_multi_statement_query() {
    let (_fixture, pool) = seeded_pool(2).await;

    let results = pool
        .query("select name from HOBBY; select name from USER;")
        .await
        .unwrap()
        .into_results();

    assert_eq!(results.len(), 2);
    assert_eq!(names(&results[0]), vec!["soccer"]);
    assert_eq!(names(&results[1]), vec!["rikmms"]);
}

#[tokio::test]
async fn test_user_linked_to_hobby_in_transaction() {
    let (_fixture, pool) = seeded_pool(2).await;

    let result = pool
        .execute_transaction(vec![
            step(|_| Query::new("insert into USER (name) values(?);").bind("di8g8")),
            step(|previous: Option<QueryResult>| {
                Query::new("insert into USER_HOBBY (user_id, hobby_name) values(?,?);")
                    .bind(previous.and_then(|r| r.insert_id()))
                    .bind("soccer")
            }),
        ])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.affected_rows(), Some(1));
    assert_eq!(pool.status().available, pool.status().size);
}

#[tokio::test]
async fn test_manual_transaction_on_lease() {
    let (_fixture, pool) = seeded_pool(2).await;

    let connection = pool.get_connection().await.unwrap();
    connection.begin_transaction().await.unwrap();
    let user = connection
        .query(&Query::new("insert into USER (name) values(?);").bind("bob"))
        .await
        .unwrap();
    let link = connection
        .query(
            &Query::new("insert into USER_HOBBY (user_id, hobby_name) values(?,?);")
                .bind(user.insert_id())
                .bind("soccer"),
        )
        .await
        .unwrap();
    connection.commit().await.unwrap();
    connection.release();

    assert_eq!(link.affected_rows(), Some(1));
}

#[tokio::test]
async fn test_user_and_hobby_created_in_transaction() {
    let (_fixture, pool) = seeded_pool(2).await;

    let result = pool
        .execute_transaction(vec![
            step(|_| Query::new("insert into USER (name) values(?);").bind("alice")),
            step(|_| Query::new("insert into HOBBY (name) values(?);").bind("code")),
        ])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.affected_rows(), Some(1));

    let hobbies = pool.query("select name from HOBBY order by name").await.unwrap();
    assert_eq!(names(&hobbies), vec!["code", "soccer"]);
}

#[tokio::test]
async fn test_failed_transaction_releases_lease_and_rolls_back() {
    let (_fixture, pool) = seeded_pool(1).await;

    let err = pool
        .execute_transaction(vec![
            step(|_| Query::new("insert into HOBBY (name) values(?);").bind("chess")),
            step(|_| Query::new("insert into HOBBY (name) values(?);").bind("soccer")),
        ])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE"));

    // With a single connection this only succeeds if the lease came back
    let hobbies = pool.query("select name from HOBBY").await.unwrap();
    assert_eq!(names(&hobbies), vec!["soccer"]);
}

#[tokio::test]
async fn test_exhausted_sqlite_pool() {
    let (_fixture, pool) = seeded_pool(1).await;

    let held = pool.get_connection().await.unwrap();
    let started = Instant::now();
    let err = pool.get_connection().await.err().expect("pool should be exhausted");

    assert!(err.is_pool_exhausted());
    assert!(started.elapsed() < Duration::from_secs(2));
    held.release();
}

#[tokio::test]
async fn test_exhausted_pool_attempts_no_disposal() {
    let manager = MockManager::new(MockScript::default());
    let log = manager.log();
    let pool = PoolExecutor::new(
        manager,
        &PoolOptions {
            max_size: 1,
            wait_timeout_ms: 50,
        },
    )
    .unwrap();

    let held = pool.get_connection().await.unwrap();
    let err = pool.execute_transaction(vec![step(|_| "never runs")]).await.unwrap_err();

    match err {
        QueryflowError::Pool(PoolError::Exhausted(wait)) => assert_eq!(wait, Duration::from_millis(50)),
        other => panic!("Expected exhausted pool, got {:?}", other),
    }
    assert_eq!(log.begins(), 0);
    assert_eq!(log.rollbacks(), 0);
    assert_eq!(log.ends(), 0);
    assert_eq!(log.query_count(), 0);
    drop(held);
}

#[tokio::test]
async fn test_pool_never_ends_pooled_connections() {
    let manager = MockManager::new(MockScript::default().fail("bad", "boom"));
    let log = manager.log();
    let pool = PoolExecutor::new(manager, &PoolOptions::default()).unwrap();

    pool.execute(vec!["a", "b"]).await.unwrap();
    assert!(pool.execute("bad").await.is_err());
    pool.execute_transaction(vec![step(|_| "a")]).await.unwrap();
    assert!(pool.execute_transaction(vec![step(|_| "bad")]).await.is_err());
    pool.query("c").await.unwrap();

    assert_eq!(log.ends(), 0);
    assert_eq!(pool.status().available, pool.status().size);
}

#[tokio::test]
async fn test_abandoned_transaction_rolled_back_on_recycle() {
    let (_fixture, pool) = seeded_pool(1).await;

    let connection = pool.get_connection().await.unwrap();
    connection.begin_transaction().await.unwrap();
    connection
        .query(&Query::new("insert into HOBBY (name) values(?);").bind("chess"))
        .await
        .unwrap();
    drop(connection);

    let hobbies = pool.query("select name from HOBBY").await.unwrap();
    assert_eq!(names(&hobbies), vec!["soccer"]);
}
