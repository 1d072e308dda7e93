//! The success/failure wire shape returned for every query.
//!
//! ```json
//! {"success": true, "data": {...}, "schema": "public", "timing_ms": 12}
//! {"success": false, "error": {"code": "TABLE_NOT_ALLOWED", "message": "..."}}
//! ```

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use super::classify::Classification;
use crate::db::Row;
use crate::error::ErrorKind;
use crate::safety::ValidationError;

/// Tabular payload of a successful query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryData {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// Set whenever the row count reached the cap, since more rows may exist.
    pub truncated: bool,
    /// The rewritten SQL that actually ran.
    pub sql_executed: String,
    pub tables_accessed: BTreeSet<String>,
}

/// Body of a success envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessBody {
    pub data: QueryData,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub timing_ms: u64,
}

/// Body of a failure envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Exactly one of success or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success(SuccessBody),
    Failure(ErrorBody),
}

impl Envelope {
    /// Creates a failure envelope.
    pub fn failure(code: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure(ErrorBody {
            code,
            message: message.into(),
            detail: None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the success payload, if any.
    pub fn data(&self) -> Option<&QueryData> {
        match self {
            Self::Success(body) => Some(&body.data),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure body, if any.
    pub fn error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Success(_) => None,
            Self::Failure(body) => Some(body),
        }
    }

    /// Parses an envelope that crossed a process boundary.
    ///
    /// Malformed input becomes an `INTERNAL_ERROR` failure so callers always
    /// get an envelope back.
    pub fn from_json(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_else(|e| {
            warn!(error = %e, "malformed envelope");
            Self::failure(
                ErrorKind::InternalError,
                "The query tool returned a malformed result.",
            )
        })
    }

    /// Serializes to the wire shape.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Classification> for Envelope {
    fn from(classification: Classification) -> Self {
        Self::Failure(ErrorBody {
            code: classification.kind,
            message: classification.message,
            detail: classification.detail,
        })
    }
}

impl From<ValidationError> for Envelope {
    fn from(error: ValidationError) -> Self {
        Self::failure(error.kind, error.message)
    }
}

#[derive(Serialize)]
struct SuccessWire<'a> {
    success: bool,
    #[serde(flatten)]
    body: &'a SuccessBody,
}

#[derive(Serialize)]
struct FailureWire<'a> {
    success: bool,
    error: &'a ErrorBody,
}

#[derive(Deserialize)]
struct OwnedFailureWire {
    error: ErrorBody,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(body) => SuccessWire {
                success: true,
                body,
            }
            .serialize(serializer),
            Self::Failure(error) => FailureWire {
                success: false,
                error,
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let success = value
            .get("success")
            .and_then(serde_json::Value::as_bool)
            .ok_or_else(|| de::Error::missing_field("success"))?;

        if success {
            SuccessBody::deserialize(value)
                .map(Self::Success)
                .map_err(de::Error::custom)
        } else {
            OwnedFailureWire::deserialize(value)
                .map(|wire| Self::Failure(wire.error))
                .map_err(de::Error::custom)
        }
    }
}
