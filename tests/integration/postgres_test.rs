//! PostgreSQL execution tests.
//!
//! These need a live database; set DATABASE_URL to run them.

use sqlguard::config::{ConnectionConfig, ExecutionConfig};
use sqlguard::db::{ExecutionError, ExecutionRequest, PostgresBackend, QueryBackend, Value};
use sqlguard::error::ErrorKind;
use sqlguard::query::{classify, QueryExecutor};
use sqlguard::safety::ValidationPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test backend.
async fn get_test_backend() -> Option<Arc<PostgresBackend>> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    let backend = PostgresBackend::connect(&config, &ExecutionConfig::default())
        .await
        .ok()?;
    Some(Arc::new(backend))
}

fn request(sql: &str) -> ExecutionRequest {
    ExecutionRequest::new(sql, "public", Duration::from_secs(5))
}

#[tokio::test]
async fn test_select_through_executor() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let policy = Arc::new(ValidationPolicy::new("public", 2));
    let executor = QueryExecutor::new(backend.clone(), policy);
    let envelope = executor
        .execute("SELECT n, 'row ' || n AS label FROM generate_series(1, 5) AS g(n)")
        .await;

    let data = envelope.data().expect("expected success");
    assert_eq!(data.columns, vec!["n".to_string(), "label".to_string()]);
    assert_eq!(data.row_count, 2);
    assert!(data.truncated);
    assert_eq!(data.rows[0][1], Value::String("row 1".to_string()));

    backend.close().await;
}

#[tokio::test]
async fn test_nulls_and_empty_results() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = backend
        .execute(&request("SELECT NULL::text AS nothing"))
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Null]]);

    let empty = backend
        .execute(&request("SELECT 1 AS one WHERE false"))
        .await
        .unwrap();
    assert_eq!(empty.columns, vec!["one".to_string()]);
    assert!(empty.is_empty());

    backend.close().await;
}

#[tokio::test]
async fn test_session_is_read_only() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = backend
        .execute(&request("CREATE TABLE sqlguard_should_not_exist (id int)"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("25006"));

    backend.close().await;
}

#[tokio::test]
async fn test_statement_timeout_is_enforced() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let slow = ExecutionRequest::new("SELECT pg_sleep(5)", "public", Duration::from_millis(200));
    let err = backend.execute(&slow).await.unwrap_err();
    assert_eq!(classify(&ExecutionError::from(err)).kind, ErrorKind::QueryTimeout);

    backend.close().await;
}

#[tokio::test]
async fn test_search_path_is_applied() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = backend
        .execute(&ExecutionRequest::new(
            "SELECT current_setting('search_path') AS path",
            "tenant_x",
            Duration::from_secs(5),
        ))
        .await
        .unwrap();
    let path = result.rows[0][0].to_display_string();
    assert!(path.starts_with("\"tenant_x\""));
    assert!(path.ends_with("public"));

    backend.close().await;
}

#[tokio::test]
async fn test_missing_relation_is_not_found() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let policy = Arc::new(ValidationPolicy::new("public", 10));
    let executor = QueryExecutor::new(backend.clone(), policy);
    let envelope = executor.execute("SELECT * FROM sqlguard_no_such_table").await;
    let error = envelope.error().expect("expected failure");
    assert_eq!(error.code, ErrorKind::NotFound);
    assert!(error.message.contains("sqlguard_no_such_table"));

    backend.close().await;
}

#[tokio::test]
async fn test_connections_are_released() {
    let Some(backend) = get_test_backend().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    for sql in ["SELECT 1", "SELECT * FROM sqlguard_no_such_table", "SELEC 1"] {
        let _ = backend.execute(&request(sql)).await;
    }
    assert_eq!(backend.connections_in_use(), 0);

    backend.close().await;
}
