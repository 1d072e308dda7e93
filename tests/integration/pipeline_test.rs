//! End-to-end pipeline tests against in-memory backends.
//!
//! Covers the path from raw SQL text to the serialized envelope.

use serde_json::Value as Json;
use sqlguard::db::{DriverError, FailingBackend, MockBackend, QueryBackend, RawResultSet, Value};
use sqlguard::error::ErrorKind;
use sqlguard::query::{Envelope, QueryExecutor};
use sqlguard::safety::ValidationPolicy;
use std::sync::Arc;
use std::time::Duration;

fn executor(backend: Arc<dyn QueryBackend>, policy: ValidationPolicy) -> QueryExecutor {
    QueryExecutor::new(backend, Arc::new(policy))
}

fn to_json(envelope: &Envelope) -> Json {
    serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
}

fn error_code(envelope: &Envelope) -> ErrorKind {
    envelope.error().expect("expected a failure envelope").code
}

#[tokio::test]
async fn test_success_envelope_shape() {
    let backend = Arc::new(MockBackend::with_default(RawResultSet::with_data(
        vec!["id".to_string(), "email".to_string()],
        vec![
            vec![Value::Int(1), Value::String("a@example.com".to_string())],
            vec![Value::Int(2), Value::Null],
        ],
    )));
    let executor = executor(backend.clone(), ValidationPolicy::new("public", 100))
        .with_tenant("acme")
        .with_project("p-1");

    let envelope = executor.execute("SELECT id, email FROM users").await;
    let json = to_json(&envelope);

    assert_eq!(json["success"], true);
    assert_eq!(json["schema"], "public");
    assert_eq!(json["tenant_id"], "acme");
    assert_eq!(json["project_id"], "p-1");
    assert_eq!(json["data"]["columns"], serde_json::json!(["id", "email"]));
    assert_eq!(json["data"]["rows"][0], serde_json::json!([1, "a@example.com"]));
    assert_eq!(json["data"]["rows"][1][1], Json::Null);
    assert_eq!(json["data"]["row_count"], 2);
    assert_eq!(json["data"]["truncated"], false);
    assert_eq!(json["data"]["tables_accessed"], serde_json::json!(["users"]));
    assert_eq!(
        json["data"]["sql_executed"],
        "SELECT id, email FROM users LIMIT 100"
    );
    assert!(json.get("warnings").is_none());
    assert!(json["timing_ms"].is_u64());

    assert_eq!(
        backend.last_sql().as_deref(),
        Some("SELECT id, email FROM users LIMIT 100")
    );
}

#[tokio::test]
async fn test_failure_envelope_shape() {
    let backend = Arc::new(MockBackend::new());
    let executor = executor(backend.clone(), ValidationPolicy::new("public", 100));

    let envelope = executor.execute("DROP TABLE users").await;
    let json = to_json(&envelope);

    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "FORBIDDEN_STATEMENT_TYPE");
    assert!(json["error"]["message"].as_str().unwrap().contains("DROP"));
    assert!(json.get("data").is_none());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_rejections_never_reach_backend() {
    let backend = Arc::new(MockBackend::new());
    let policy = ValidationPolicy::new("public", 100)
        .with_allowed_tables(["users", "orders"])
        .with_denied_tables(["api_keys"]);
    let executor = executor(backend.clone(), policy);

    let cases = [
        ("", ErrorKind::EmptyStatement),
        ("SELEC * FRM users", ErrorKind::ParseError),
        ("SELECT 1; SELECT 2", ErrorKind::MultipleStatements),
        ("UPDATE users SET name = 'x'", ErrorKind::ForbiddenStatementType),
        ("SELECT pg_sleep(10)", ErrorKind::DangerousFunction),
        ("SELECT * FROM invoices", ErrorKind::TableNotAllowed),
        ("SELECT * FROM api_keys", ErrorKind::TableNotAllowed),
        ("SELECT * FROM billing.users", ErrorKind::SchemaNotAllowed),
    ];

    for (sql, expected) in cases {
        let envelope = executor.execute(sql).await;
        assert_eq!(error_code(&envelope), expected, "for {:?}", sql);
    }

    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_existing_smaller_limit_is_kept() {
    let backend = Arc::new(MockBackend::with_rows(3));
    let executor = executor(backend.clone(), ValidationPolicy::new("public", 100));

    let envelope = executor.execute("SELECT id FROM users LIMIT 3").await;
    let data = envelope.data().unwrap();

    assert_eq!(data.sql_executed, "SELECT id FROM users LIMIT 3");
    assert!(!data.truncated);
}

#[tokio::test]
async fn test_oversized_limit_is_capped_with_warning() {
    let backend = Arc::new(MockBackend::with_rows(2));
    let executor = executor(backend, ValidationPolicy::new("public", 10));

    let envelope = executor.execute("SELECT id FROM users LIMIT 5000").await;
    let Envelope::Success(body) = envelope else {
        panic!("expected success");
    };

    assert_eq!(body.data.sql_executed, "SELECT id FROM users LIMIT 10");
    assert_eq!(body.warnings.len(), 1);
    assert!(body.warnings[0].contains("5000"));
}

#[tokio::test]
async fn test_truncated_when_row_count_hits_cap() {
    let backend = Arc::new(MockBackend::with_rows(10));
    let executor = executor(backend, ValidationPolicy::new("public", 10));

    let envelope = executor.execute("SELECT id FROM users").await;
    let data = envelope.data().unwrap();

    assert_eq!(data.row_count, 10);
    assert!(data.truncated);
}

#[tokio::test]
async fn test_request_carries_schema_and_timeout() {
    let backend = Arc::new(MockBackend::new());
    let executor = executor(backend.clone(), ValidationPolicy::new("Tenant_7", 50))
        .with_timeout(Duration::from_secs(4));

    let envelope = executor.execute("SELECT * FROM orders").await;
    assert!(envelope.is_success());

    let request = &backend.requests()[0];
    assert_eq!(request.schema, "tenant_7");
    assert_eq!(request.timeout, Duration::from_secs(4));
}

#[tokio::test]
async fn test_timeout_is_classified() {
    let executor = executor(
        Arc::new(FailingBackend::timeout()),
        ValidationPolicy::new("public", 100),
    );

    let envelope = executor.execute("SELECT * FROM events").await;
    assert_eq!(error_code(&envelope), ErrorKind::QueryTimeout);
}

#[tokio::test]
async fn test_unreachable_database_is_generalized() {
    let executor = executor(
        Arc::new(FailingBackend::unreachable()),
        ValidationPolicy::new("public", 100),
    );

    let envelope = executor.execute("SELECT * FROM events").await;
    let error = envelope.error().unwrap();
    assert_eq!(error.code, ErrorKind::ConnectionFailure);
    assert!(!error.message.contains("127.0.0.1"));
}

#[tokio::test]
async fn test_missing_column_message_is_passed_through() {
    let backend = Arc::new(MockBackend::new().then_err(DriverError::database(
        Some("42703"),
        "column \"emal\" does not exist",
    )));
    let executor = executor(backend, ValidationPolicy::new("public", 100));

    let envelope = executor.execute("SELECT emal FROM users").await;
    let error = envelope.error().unwrap();
    assert_eq!(error.code, ErrorKind::NotFound);
    assert!(error.message.contains("emal"));
}

#[tokio::test]
async fn test_internal_details_are_hidden() {
    let backend = Arc::new(MockBackend::new().then_err(DriverError::database(
        Some("XX000"),
        "could not read block 12 in file \"base/16384/2619\"",
    )));
    let executor = executor(backend, ValidationPolicy::new("public", 100));

    let envelope = executor.execute("SELECT * FROM users").await;
    let error = envelope.error().unwrap();
    assert_eq!(error.code, ErrorKind::InternalError);
    assert!(!error.message.contains("base/16384"));
}

#[tokio::test]
async fn test_concurrent_queries_share_executor() {
    let backend = Arc::new(MockBackend::with_rows(1).with_delay(Duration::from_millis(20)));
    let executor = executor(backend.clone(), ValidationPolicy::new("public", 100));

    let mut handles = Vec::new();
    for i in 0..8 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            executor.execute(&format!("SELECT {} AS n FROM users", i)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    assert_eq!(backend.completed(), 8);
    assert_eq!(backend.in_flight(), 0);
}

#[test]
fn test_malformed_tool_result_degrades() {
    let envelope = Envelope::from_json("{\"success\": tru");
    assert_eq!(error_code(&envelope), ErrorKind::InternalError);
}
