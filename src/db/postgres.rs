//! PostgreSQL execution backend.
//!
//! Provides the `PostgresBackend` struct that implements the `QueryBackend`
//! trait using a sqlx connection pool.

use crate::config::{ConnectionConfig, ExecutionConfig};
use crate::db::{DriverError, ExecutionRequest, QueryBackend, RawResultSet, Row, Value};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL backend over a shared pool.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Creates a backend from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a pool for `config`, retrying transient failures with backoff.
    pub async fn connect(config: &ConnectionConfig, execution: &ExecutionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(execution.max_connections)
                .acquire_timeout(Duration::from_secs(execution.acquire_timeout_secs))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Successfully connected to database");
                    return Ok(Self { pool });
                }
                Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(map_connection_error(e, config)),
            }
        }
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Number of connections currently checked out of the pool.
    pub fn connections_in_use(&self) -> u32 {
        self.pool.size().saturating_sub(self.pool.num_idle() as u32)
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<RawResultSet, sqlx::Error> {
        // One checkout per call. Dropping the transaction rolls it back and
        // returns the connection, on every exit path.
        let mut tx = self.pool.begin().await?;
        let conn: &mut PgConnection = &mut tx;

        prepare_session(&mut *conn, request).await?;

        let statement = conn.prepare(request.sql.as_str()).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();

        // Simple query protocol so every value arrives in text form.
        let rows: Vec<PgRow> = (&mut *conn)
            .fetch_all(sqlx::raw_sql(request.sql.as_str()))
            .await?;

        tx.rollback().await?;

        Ok(RawResultSet {
            columns,
            rows: rows.iter().map(convert_row).collect(),
        })
    }
}

#[async_trait]
impl QueryBackend for PostgresBackend {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<RawResultSet, DriverError> {
        let start = Instant::now();

        let result = self.run(request).await.map_err(map_driver_error);

        match &result {
            Ok(set) => debug!(
                rows = set.row_count(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "statement executed"
            ),
            Err(e) => debug!(
                code = e.code().unwrap_or("-"),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "statement failed"
            ),
        }

        result
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Marks the transaction read-only and applies timeout and search path.
///
/// Both settings are transaction-local and bound as parameters, so nothing
/// from the request is spliced into SQL text.
async fn prepare_session(
    conn: &mut PgConnection,
    request: &ExecutionRequest,
) -> std::result::Result<(), sqlx::Error> {
    conn.execute("SET TRANSACTION READ ONLY").await?;

    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(statement_timeout_setting(request.timeout))
        .execute(&mut *conn)
        .await?;

    sqlx::query("SELECT set_config('search_path', $1, true)")
        .bind(search_path_setting(&request.schema))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Milliseconds, as Postgres expects for a unitless `statement_timeout`.
fn statement_timeout_setting(timeout: Duration) -> String {
    timeout.as_millis().max(1).to_string()
}

/// The target schema first, then `public`.
fn search_path_setting(schema: &str) -> String {
    let quoted = format!("\"{}\"", schema.replace('"', "\"\""));
    if schema == "public" {
        quoted
    } else {
        format!("{}, public", quoted)
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // Everything else keeps its server text form
        _ => row
            .try_get_unchecked::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Maps a sqlx error onto the driver taxonomy the classifier understands.
fn map_driver_error(error: sqlx::Error) -> DriverError {
    match error {
        sqlx::Error::Database(db) => DriverError::Database {
            code: db.code().map(|code| code.into_owned()),
            message: db.message().to_string(),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => DriverError::Connection(error.to_string()),
        other => DriverError::Other(other.to_string()),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps pool construction errors to operator-facing messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> GuardError {
    let target = config.display_string();
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        GuardError::connection(format!(
            "Cannot connect to {target}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        GuardError::connection(format!(
            "Authentication failed for {target}. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        GuardError::connection(format!("Database for {target} does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        GuardError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        GuardError::connection(format!(
            "Connection to {target} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        GuardError::connection(error.to_string())
    }
}
