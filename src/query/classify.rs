//! Error classification.
//!
//! Maps driver and execution failures onto the closed [`ErrorKind`] taxonomy
//! and decides, per branch, whether the underlying text may be shown to the
//! caller. Raw driver text only leaves through a [`Disclosure::Verbatim`]
//! branch; everything else is replaced by a fixed message and logged.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::db::{DriverError, ExecutionError};
use crate::error::ErrorKind;
use crate::safety::ValidationError;

/// SQLSTATE for a statement cancelled by `statement_timeout` or a cancel request.
const SQLSTATE_QUERY_CANCELED: &str = "57014";

pub(crate) const TIMEOUT_MESSAGE: &str = "The query took too long and was cancelled. \
     Narrow it with filters (for example a date range or a WHERE clause on an indexed column) \
     or a smaller LIMIT, then try again.";

pub(crate) const AUTH_MESSAGE: &str =
    "The database refused the service credentials. Please contact an administrator.";

pub(crate) const UNREACHABLE_MESSAGE: &str =
    "Could not connect to the database. Please try again later.";

pub(crate) const DATABASE_MESSAGE: &str =
    "The database could not run this query. Try rephrasing or simplifying it.";

pub(crate) const DRIVER_MESSAGE: &str =
    "The database driver reported an unexpected problem. Please try again later.";

pub(crate) const UNEXPECTED_MESSAGE: &str =
    "An unexpected error occurred while running the query.";

/// Whether a classified message is the underlying text or a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disclosure {
    /// The message is the underlying text, judged safe and actionable.
    Verbatim,
    /// The underlying text was withheld and replaced by a fixed message.
    Generalized,
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Message safe to show to the end user.
    pub message: String,
    /// Extra non-sensitive context, such as a SQLSTATE code.
    pub detail: Option<String>,
    pub disclosure: Disclosure,
}

impl Classification {
    fn verbatim(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            disclosure: Disclosure::Verbatim,
        }
    }

    fn generalized(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
            detail: None,
            disclosure: Disclosure::Generalized,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<&ValidationError> for Classification {
    /// Validator messages describe what was rejected and are always safe.
    fn from(error: &ValidationError) -> Self {
        Self::verbatim(error.kind, error.message.clone())
    }
}

/// Classifies an execution failure.
pub fn classify(error: &ExecutionError) -> Classification {
    let classification = match error {
        ExecutionError::Driver(driver) => classify_driver(driver),
        ExecutionError::Unexpected(detail) => {
            error!(detail = %detail, "unexpected execution failure");
            Classification::generalized(ErrorKind::InternalError, UNEXPECTED_MESSAGE)
        }
    };

    debug!(
        kind = %classification.kind,
        disclosure = ?classification.disclosure,
        "classified execution failure"
    );
    classification
}

fn classify_driver(error: &DriverError) -> Classification {
    let code = error.code().unwrap_or_default();
    let lower = error.message().to_lowercase();

    if code == SQLSTATE_QUERY_CANCELED || is_timeout(&lower) {
        return Classification::generalized(ErrorKind::QueryTimeout, TIMEOUT_MESSAGE);
    }

    // Class 28: invalid authorization specification
    if code.starts_with("28") || lower.contains("authentication failed") {
        warn!(code, "database authentication failed");
        return Classification::generalized(ErrorKind::ConnectionFailure, AUTH_MESSAGE);
    }

    // Class 08: connection exception
    if code.starts_with("08")
        || matches!(error, DriverError::Connection(_))
        || lower.contains("could not connect")
        || lower.contains("connection refused")
    {
        warn!(code, message = error.message(), "database unreachable");
        return Classification::generalized(ErrorKind::ConnectionFailure, UNREACHABLE_MESSAGE);
    }

    match error {
        DriverError::Database { message, .. } if lower.contains("does not exist") => {
            Classification::verbatim(ErrorKind::NotFound, message.clone())
        }
        DriverError::Database { message, .. } => {
            warn!(code, message = %message, "database error generalized");
            let classification =
                Classification::generalized(ErrorKind::InternalError, DATABASE_MESSAGE);
            if code.is_empty() {
                classification
            } else {
                classification.with_detail(format!("SQLSTATE {}", code))
            }
        }
        _ => {
            warn!(message = error.message(), "driver error generalized");
            Classification::generalized(ErrorKind::InternalError, DRIVER_MESSAGE)
        }
    }
}

fn is_timeout(lower: &str) -> bool {
    lower.contains("statement timeout")
        || lower.contains("canceling statement")
        || lower.contains("query timed out")
}
