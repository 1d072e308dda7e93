//! Error types for sqlguard.
//!
//! Two layers live here. [`ErrorKind`] is the closed taxonomy that crosses the
//! envelope boundary and is shown to generators and end users. [`GuardError`]
//! covers everything outside that contract: configuration, pool setup,
//! generator transport and internal faults.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds reported in a failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The SQL text could not be parsed under the policy dialect.
    ParseError,
    /// The text contained no statement at all.
    EmptyStatement,
    /// More than one top-level statement was supplied.
    MultipleStatements,
    /// The statement is not a read-only SELECT or set operation.
    ForbiddenStatementType,
    /// A deny-listed function was called.
    DangerousFunction,
    /// A table outside the allow list (or inside the deny list) was referenced.
    TableNotAllowed,
    /// A schema qualifier outside the readable schemas was used.
    SchemaNotAllowed,
    /// The statement timeout cancelled the query.
    QueryTimeout,
    /// The backend could not be reached or rejected the session.
    ConnectionFailure,
    /// A referenced relation, column or function does not exist.
    NotFound,
    /// Anything else.
    InternalError,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        Self::ParseError,
        Self::EmptyStatement,
        Self::MultipleStatements,
        Self::ForbiddenStatementType,
        Self::DangerousFunction,
        Self::TableNotAllowed,
        Self::SchemaNotAllowed,
        Self::QueryTimeout,
        Self::ConnectionFailure,
        Self::NotFound,
        Self::InternalError,
    ];

    /// Returns the wire code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::EmptyStatement => "EMPTY_STATEMENT",
            Self::MultipleStatements => "MULTIPLE_STATEMENTS",
            Self::ForbiddenStatementType => "FORBIDDEN_STATEMENT_TYPE",
            Self::DangerousFunction => "DANGEROUS_FUNCTION",
            Self::TableNotAllowed => "TABLE_NOT_ALLOWED",
            Self::SchemaNotAllowed => "SCHEMA_NOT_ALLOWED",
            Self::QueryTimeout => "QUERY_TIMEOUT",
            Self::ConnectionFailure => "CONNECTION_FAILURE",
            Self::NotFound => "NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true for kinds produced by the validator, before any backend
    /// round trip.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::ParseError
                | Self::EmptyStatement
                | Self::MultipleStatements
                | Self::ForbiddenStatementType
                | Self::DangerousFunction
                | Self::TableNotAllowed
                | Self::SchemaNotAllowed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for sqlguard operations that sit outside the envelope.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Database pool construction errors (bad URL, unreachable host).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration errors (invalid config file, out-of-range values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors returned by the upstream SQL generator.
    #[error("Generator error: {0}")]
    Generator(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a generator error with the given message.
    pub fn generator(msg: impl Into<String>) -> Self {
        Self::Generator(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Config(_) => "Configuration Error",
            Self::Generator(_) => "Generator Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using GuardError.
pub type Result<T> = std::result::Result<T, GuardError>;
