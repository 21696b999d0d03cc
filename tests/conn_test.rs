//! End-to-end tests against a live server, in the teacher's own
//! `#[tokio::test]`-against-a-socket style (`tests/pg_test.rs`). These need
//! `EDGEWIRE_TEST_ADDR`/`EDGEWIRE_TEST_PASSWORD` pointing at a running
//! instance and are not run as part of a plain unit-test pass.

use std::net::SocketAddr;
use std::time::Duration;

use edgewire::conn::{query_rows, Connection, ConnectionOptions};
use edgewire::query::{Cardinality, IoFormat, QueryCaches};
use edgewire::protocol::message::Capabilities;
use edgewire::value::Value;

fn default_addrs() -> Vec<SocketAddr> {
  std::env::var("EDGEWIRE_TEST_ADDR")
    .unwrap_or_else(|_| "127.0.0.1:5656".to_string())
    .parse::<SocketAddr>()
    .map(|addr| vec![addr])
    .unwrap()
}

fn default_connection_options() -> ConnectionOptions {
  ConnectionOptions {
    password: std::env::var("EDGEWIRE_TEST_PASSWORD").ok(),
    database: Some("edgedb".to_string()),
    connect_timeout: Some(Duration::from_secs(5)),
    ..Default::default()
  }
}

#[tokio::test]
#[ignore = "requires a live server, see EDGEWIRE_TEST_ADDR"]
async fn test_connect_and_close() {
  let conn = Connection::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
  conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live server, see EDGEWIRE_TEST_ADDR"]
async fn test_invalid_password_fails_authentication() {
  let err = Connection::connect_tcp(
    default_addrs(),
    ConnectionOptions {
      password: Some("definitely-wrong".to_string()),
      ..default_connection_options()
    },
  )
  .await
  .unwrap_err();

  assert!(matches!(err, edgewire::ClientError::Authentication(_)));
}

#[tokio::test]
#[ignore = "requires a live server, see EDGEWIRE_TEST_ADDR"]
async fn test_select_scalar_round_trips() {
  let mut conn = Connection::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
  let caches = QueryCaches::new();

  let rows: Vec<i64> = query_rows(
    &mut conn,
    &caches,
    "select 1 + 1",
    IoFormat::Binary,
    Cardinality::One,
    Value::Object(Vec::new()),
    Capabilities::empty(),
  )
  .await
  .unwrap();

  assert_eq!(rows, vec![2]);
  conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live server, see EDGEWIRE_TEST_ADDR"]
async fn test_type_id_cache_is_reused_across_identical_queries() {
  let mut conn = Connection::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
  let caches = QueryCaches::new();

  for _ in 0..3 {
    let rows: Vec<i64> = query_rows(
      &mut conn,
      &caches,
      "select 41 + 1",
      IoFormat::Binary,
      Cardinality::One,
      Value::Object(Vec::new()),
      Capabilities::empty(),
    )
    .await
    .unwrap();
    assert_eq!(rows, vec![42]);
  }

  conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live server, see EDGEWIRE_TEST_ADDR"]
async fn test_query_error_does_not_poison_the_connection() {
  let mut conn = Connection::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
  let caches = QueryCaches::new();

  let err = query_rows::<i64>(
    &mut conn,
    &caches,
    "select 1 / 0",
    IoFormat::Binary,
    Cardinality::One,
    Value::Object(Vec::new()),
    Capabilities::empty(),
  )
  .await
  .unwrap_err();
  assert!(matches!(err, edgewire::ClientError::Query(_)));
  assert!(conn.is_usable());

  let rows: Vec<i64> = query_rows(
    &mut conn,
    &caches,
    "select 1",
    IoFormat::Binary,
    Cardinality::One,
    Value::Object(Vec::new()),
    Capabilities::empty(),
  )
  .await
  .unwrap();
  assert_eq!(rows, vec![1]);

  conn.close().await.unwrap();
}
