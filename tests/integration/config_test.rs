//! Configuration loading tests.
//!
//! Loads config files from disk and checks that the resulting policy governs
//! the pipeline.

use sqlguard::config::Config;
use sqlguard::db::MockBackend;
use sqlguard::error::ErrorKind;
use sqlguard::query::QueryExecutor;
use sqlguard::safety::Dialect;
use std::collections::HashMap;
use std::sync::Arc;

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_file_policy_drives_executor() {
    let (_dir, path) = write_config(
        r#"
[policy]
primary_schema = "tenant_42"
allowed_tables = ["orders"]
max_row_limit = 25
tenant_id = "acme"

[execution]
timeout_secs = 3
"#,
    );
    let config = Config::load_from_file(&path).unwrap();
    config.validate().unwrap();

    let backend = Arc::new(MockBackend::with_rows(1));
    let executor = QueryExecutor::new(backend.clone(), Arc::new(config.policy.to_policy()))
        .with_timeout(config.execution.timeout())
        .with_tenant(config.policy.tenant_id.clone().unwrap());

    let rejected = executor.execute("SELECT * FROM users").await;
    assert_eq!(rejected.error().unwrap().code, ErrorKind::TableNotAllowed);

    let envelope = executor.execute("SELECT * FROM orders").await;
    let data = envelope.data().unwrap();
    assert_eq!(data.sql_executed, "SELECT * FROM orders LIMIT 25");

    let request = &backend.requests()[0];
    assert_eq!(request.schema, "tenant_42");
    assert_eq!(request.timeout.as_secs(), 3);
}

#[test]
fn test_env_overrides_file() {
    let (_dir, path) = write_config("[policy]\nmax_row_limit = 25\n");
    let env: HashMap<&str, &str> = [("SQLGUARD_MAX_ROWS", "7"), ("SQLGUARD_SCHEMA", "sales")]
        .into_iter()
        .collect();

    let mut config = Config::load_from_file(&path).unwrap();
    config
        .apply_env(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();

    let policy = config.policy.to_policy();
    assert_eq!(policy.max_row_limit(), 7);
    assert_eq!(policy.primary_schema(), "sales");
}

#[test]
fn test_invalid_file_values() {
    let (_dir, path) = write_config("[policy]\nmax_row_limit = 0\n");
    let config = Config::load_from_file(&path).unwrap();
    assert!(config.validate().is_err());

    let (_dir, path) = write_config("[policy]\nmax_row_limit = -5\n");
    assert!(Config::load_from_file(&path).is_err());
}

#[test]
fn test_dialect_from_file() {
    let (_dir, path) = write_config("[policy]\ndialect = \"mysql\"\n");
    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.policy.to_policy().dialect(), Dialect::MySql);
}
