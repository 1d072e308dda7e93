//! Execution adapter for sqlguard.
//!
//! Provides a trait-based interface over the relational backend so the query
//! pipeline can run against PostgreSQL in production and in-memory backends in
//! tests. Each call checks out exactly one connection, runs one read-only
//! statement under a statement timeout and releases the connection on every
//! exit path.

mod mock;
mod postgres;
mod types;

pub use mock::{FailingBackend, MockBackend};
pub use postgres::PostgresBackend;
pub use types::{RawResultSet, Row, Value};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Everything a backend needs to run one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Rewritten SQL, executed exactly as given.
    pub sql: String,
    /// Schema placed first on the search path.
    pub schema: String,
    /// Server-side statement timeout.
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(sql: impl Into<String>, schema: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sql: sql.into(),
            schema: schema.into(),
            timeout,
        }
    }
}

/// A failure reported by the database driver.
///
/// Raw messages in here are never shown to callers directly; they go through
/// [`crate::query::classify`] first.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The server rejected the statement or the session.
    #[error("database error: {message}")]
    Database {
        /// SQLSTATE code, when the server sent one.
        code: Option<String>,
        message: String,
    },

    /// The connection could not be established, or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other driver-side failure (protocol, decoding, pool state).
    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    pub fn database(code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Database {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Returns the SQLSTATE code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns the raw driver message.
    pub fn message(&self) -> &str {
        match self {
            Self::Database { message, .. } => message,
            Self::Connection(message) | Self::Other(message) => message,
        }
    }
}

/// Anything that can go wrong between handing SQL to the adapter and getting
/// rows back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A fault outside the driver, such as a panicked execution task.
    #[error("unexpected execution failure: {0}")]
    Unexpected(String),
}

/// Trait for backends that can execute a single read-only statement.
///
/// Implementations must be thread-safe (Send + Sync) so one backend can serve
/// many conversations concurrently.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Runs `request.sql` in a read-only session and materializes every row.
    async fn execute(&self, request: &ExecutionRequest) -> Result<RawResultSet, DriverError>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}
