//! Connection lifecycle and result-shape behaviour against the mock driver

use mariapool_core::mock::{MockDriver, PoolEvent, Target};
use mariapool_core::{Client, ConnectOptions, Error, Query, QueryOutput, StatementKind};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
}

async fn connected() -> (MockDriver, Client<MockDriver>) {
    let driver = MockDriver::new();
    let client = Client::with_driver(driver.clone(), ConnectOptions::default());
    client.connect().await.expect("connect");
    (driver, client)
}

#[tokio::test]
async fn every_query_method_fails_before_connect() {
    let driver = MockDriver::new();
    let client = Client::with_driver(driver.clone(), ConnectOptions::default());

    assert!(matches!(client.query("SELECT 1").await, Err(Error::NotConnected)));
    assert!(matches!(
        client.select::<User>("SELECT * FROM users").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        client.insert("INSERT INTO users (name) VALUES ('ada')").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        client.update("UPDATE users SET name = 'x'").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        client.delete("DELETE FROM users").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(client.transaction().await, Err(Error::NotConnected)));

    // Never reached the driver
    assert!(driver.statements().is_empty());
    assert!(driver.events().is_empty());
}

#[tokio::test]
async fn lifecycle_calls_are_noops_while_disconnected() {
    let driver = MockDriver::new();
    let client = Client::with_driver(driver.clone(), ConnectOptions::default());

    client.start().await.unwrap();
    client.end().await.unwrap();
    client.rollback().await.unwrap();
    client.release().await;
    client.close().await;
    assert!(client.get_connection().await.unwrap().is_none());

    assert!(driver.statements().is_empty());
    assert!(driver.events().is_empty());
}

#[tokio::test]
async fn select_with_table_placeholder() {
    let (driver, client) = connected().await;
    driver.push_rows(vec![
        json!({"id": 1, "name": "ada"}),
        json!({"id": 2, "name": "grace"}),
    ]);

    let users: Vec<User> = client
        .select(Query::new("SELECT * FROM %t").table("users"))
        .await
        .unwrap();

    assert_eq!(
        users,
        vec![
            User { id: 1, name: "ada".into() },
            User { id: 2, name: "grace".into() },
        ]
    );
    assert_eq!(driver.sql_log(), vec!["SELECT * FROM `users`"]);
}

#[tokio::test]
async fn select_prefix_always_yields_rows() {
    let (_driver, client) = connected().await;

    // Nothing scripted: still a (empty) row collection
    let output = client.query("SELECT * FROM empty_table").await.unwrap();
    assert_eq!(output, QueryOutput::Rows(Vec::new()));
}

#[tokio::test]
async fn other_statements_yield_metadata() {
    let (_driver, client) = connected().await;

    for sql in [
        "INSERT INTO t VALUES (1)",
        "UPDATE t SET x = 2",
        "DELETE FROM t",
        "select * from t",
    ] {
        match client.query(sql).await.unwrap() {
            QueryOutput::Write(result) => assert_eq!(result.affected_rows, 1),
            QueryOutput::Rows(_) => panic!("{} should not yield rows", sql),
        }
    }
}

#[tokio::test]
async fn explicit_kind_overrides_prefix() {
    let (driver, client) = connected().await;
    driver.push_rows(vec![json!({"n": 1})]);

    let output = client
        .query(Query::new("with x as (select 1 as n) select * from x").kind(StatementKind::Read))
        .await
        .unwrap();

    assert_eq!(output.into_rows().unwrap().len(), 1);
}

#[tokio::test]
async fn typed_select_accepts_lowercase() {
    let (driver, client) = connected().await;
    driver.push_rows(vec![json!({"id": 7, "name": "linus"})]);

    let users: Vec<User> = client.select("select * from users").await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(driver.statements()[0].kind, StatementKind::Read);
}

#[tokio::test]
async fn insert_reports_insert_id() {
    let (driver, client) = connected().await;

    let first = client
        .insert(Query::new("INSERT INTO %d.%t (name) VALUES (?)").database("app").table("users").bind("ada"))
        .await
        .unwrap();
    let second = client
        .insert(Query::new("INSERT INTO users (name) VALUES (?)").bind("grace"))
        .await
        .unwrap();

    assert_eq!(first.affected_rows, 1);
    assert!(second.insert_id > first.insert_id);

    let statements = driver.statements();
    assert_eq!(statements[0].sql, "INSERT INTO `app`.`users` (name) VALUES (?)");
    assert_eq!(statements[0].values, vec![json!("ada")]);
}

#[tokio::test]
async fn indexed_placeholders_reach_driver() {
    let (driver, client) = connected().await;

    client
        .update(
            Query::new("UPDATE %d0.%t0 a JOIN %d1.%t1 b ON a.id = b.id SET a.x = ?")
                .database(["left_db", "right_db"])
                .table(vec!["orders", "archive"])
                .bind(3),
        )
        .await
        .unwrap();

    assert_eq!(
        driver.sql_log(),
        vec!["UPDATE `left_db`.`orders` a JOIN `right_db`.`archive` b ON a.id = b.id SET a.x = ?"]
    );
}

#[tokio::test]
async fn driver_errors_pass_through() {
    let (driver, client) = connected().await;
    driver.fail_next("Duplicate entry 'ada' for key 'name'");

    let err = client
        .insert("INSERT INTO users (name) VALUES ('ada')")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Driver(_)));
    assert!(err.to_string().contains("Duplicate entry"));
}

#[tokio::test]
async fn row_that_does_not_fit_is_a_decode_error() {
    let (driver, client) = connected().await;
    driver.push_rows(vec![json!({"id": "not a number", "name": "ada"})]);

    let err = client.select::<User>("SELECT * FROM users").await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[tokio::test]
async fn close_then_query_is_not_connected() {
    let (driver, client) = connected().await;
    client.close().await;

    assert!(matches!(client.query("SELECT 1").await, Err(Error::NotConnected)));
    assert!(!client.is_connected().await);
    assert_eq!(driver.events().last(), Some(&PoolEvent::Closed));

    // Closing again is a no-op
    client.close().await;
    assert_eq!(
        driver.events().iter().filter(|e| **e == PoolEvent::Closed).count(),
        1
    );
}

#[tokio::test]
async fn concurrent_queries_without_pin_use_pool() {
    let (driver, client) = connected().await;
    let client = std::sync::Arc::new(client);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .query(Query::new("UPDATE t SET x = ?").bind(i))
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let statements = driver.statements();
    assert_eq!(statements.len(), 8);
    assert!(statements.iter().all(|s| s.target == Target::Pool));
}
