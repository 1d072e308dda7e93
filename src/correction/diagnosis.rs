//! Secondary diagnosis of failed queries.
//!
//! The envelope's [`ErrorKind`] stays authoritative. The category chosen here
//! only decides what guidance the generator gets, using an ordered table of
//! substring rules over the already-classified message.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::error::ErrorKind;

/// Advisory category of a failure, used to tailor guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    Syntax,
    ColumnNotFound,
    TableNotFound,
    Permission,
    Timeout,
    TypeMismatch,
    /// Anything unrecognized, and the fallback when context is missing.
    Execution,
}

impl DiagnosticCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::ColumnNotFound => "column_not_found",
            Self::TableNotFound => "table_not_found",
            Self::Permission => "permission",
            Self::Timeout => "timeout",
            Self::TypeMismatch => "type_mismatch",
            Self::Execution => "execution",
        }
    }

    /// Short human label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Syntax => "SQL syntax error",
            Self::ColumnNotFound => "unknown column",
            Self::TableNotFound => "unknown table",
            Self::Permission => "query not permitted",
            Self::Timeout => "query too slow",
            Self::TypeMismatch => "type mismatch",
            Self::Execution => "execution failure",
        }
    }

    /// True when the failure points at a durable fact about the schema that
    /// is worth recording.
    pub fn reveals_pattern(&self) -> bool {
        matches!(
            self,
            Self::ColumnNotFound | Self::TableNotFound | Self::TypeMismatch
        )
    }

    /// Falls back on the authoritative kind when no message rule matched.
    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ParseError | ErrorKind::EmptyStatement | ErrorKind::MultipleStatements => {
                Self::Syntax
            }
            ErrorKind::ForbiddenStatementType
            | ErrorKind::DangerousFunction
            | ErrorKind::TableNotAllowed
            | ErrorKind::SchemaNotAllowed => Self::Permission,
            ErrorKind::QueryTimeout => Self::Timeout,
            ErrorKind::NotFound | ErrorKind::ConnectionFailure | ErrorKind::InternalError => {
                Self::Execution
            }
        }
    }
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message matches a rule when it contains every pattern (lower-cased).
struct Rule {
    category: DiagnosticCategory,
    all_of: &'static [&'static str],
}

const fn rule(category: DiagnosticCategory, all_of: &'static [&'static str]) -> Rule {
    Rule { category, all_of }
}

/// First match wins. Type rules sit above the not-found rules because
/// "operator does not exist" would otherwise read as a missing object.
const RULES: &[Rule] = &[
    rule(DiagnosticCategory::TypeMismatch, &["operator does not exist"]),
    rule(DiagnosticCategory::TypeMismatch, &["invalid input syntax for type"]),
    rule(DiagnosticCategory::TypeMismatch, &["cannot be cast"]),
    rule(DiagnosticCategory::TypeMismatch, &["cannot cast"]),
    rule(DiagnosticCategory::TypeMismatch, &["no function matches"]),
    rule(DiagnosticCategory::TypeMismatch, &["type mismatch"]),
    rule(DiagnosticCategory::ColumnNotFound, &["column", "does not exist"]),
    rule(DiagnosticCategory::ColumnNotFound, &["unknown column"]),
    rule(DiagnosticCategory::ColumnNotFound, &["no such column"]),
    rule(DiagnosticCategory::TableNotFound, &["relation", "does not exist"]),
    rule(DiagnosticCategory::TableNotFound, &["table", "does not exist"]),
    rule(DiagnosticCategory::TableNotFound, &["no such table"]),
    rule(DiagnosticCategory::TableNotFound, &["unknown table"]),
    rule(DiagnosticCategory::Permission, &["permission denied"]),
    rule(DiagnosticCategory::Permission, &["not allowed"]),
    rule(DiagnosticCategory::Permission, &["not accessible"]),
    rule(DiagnosticCategory::Permission, &["not permitted"]),
    rule(DiagnosticCategory::Timeout, &["timed out"]),
    rule(DiagnosticCategory::Timeout, &["timeout"]),
    rule(DiagnosticCategory::Timeout, &["took too long"]),
    rule(DiagnosticCategory::Syntax, &["syntax error"]),
    rule(DiagnosticCategory::Syntax, &["could not parse"]),
    rule(DiagnosticCategory::Syntax, &["parse error"]),
];

/// Picks a category for a failure message, falling back on `kind`.
pub fn categorize(kind: Option<ErrorKind>, message: &str) -> DiagnosticCategory {
    let lower = message.to_lowercase();

    RULES
        .iter()
        .find(|rule| rule.all_of.iter().all(|pattern| lower.contains(pattern)))
        .map(|rule| rule.category)
        .or_else(|| kind.map(DiagnosticCategory::from_kind))
        .unwrap_or(DiagnosticCategory::Execution)
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?i)\b(?:column|relation|table|function)\s+(?:"([^"]+)"|'([^']+)'|`([^`]+)`|([A-Za-z_][\w.]*))"#,
            )
            .ok()
        })
        .as_ref()
}

/// Pulls the offending name out of messages like `column "emal" does not exist`.
pub fn missing_identifier(message: &str) -> Option<String> {
    let captures = identifier_pattern()?.captures(message)?;
    (1..=4)
        .find_map(|group| captures.get(group))
        .map(|m| m.as_str().to_string())
}

/// Category-specific advice for the generator.
pub fn guidance(
    category: DiagnosticCategory,
    identifier: Option<&str>,
    tables: &BTreeSet<String>,
) -> String {
    let table_list = if tables.is_empty() {
        "the referenced tables".to_string()
    } else {
        tables.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    match category {
        DiagnosticCategory::Syntax => "Check the SQL syntax. Balance parentheses, separate \
             select-list items with commas and quote string literals. Send exactly one SELECT \
             statement with nothing after it."
            .to_string(),
        DiagnosticCategory::ColumnNotFound => match identifier {
            Some(name) => format!(
                "Column '{}' does not exist on {}. Look up the real column names in the schema \
                 and qualify columns with a table alias when joining.",
                name, table_list
            ),
            None => format!(
                "A column does not exist on {}. Look up the real column names in the schema.",
                table_list
            ),
        },
        DiagnosticCategory::TableNotFound => match identifier {
            Some(name) => format!(
                "Table '{}' does not exist. Use only tables listed in the schema and check the \
                 spelling and schema qualifier.",
                name
            ),
            None => "A table does not exist. Use only tables listed in the schema.".to_string(),
        },
        DiagnosticCategory::Permission => "The query used something that is not permitted. \
             Rewrite it as a single read-only SELECT over permitted tables in the allowed \
             schema, without restricted functions."
            .to_string(),
        DiagnosticCategory::Timeout => "The query ran too long. Add selective WHERE filters \
             such as a date range, aggregate before joining large tables, or request fewer rows."
            .to_string(),
        DiagnosticCategory::TypeMismatch => "A value or operator was applied to the wrong type. \
             Compare values of the same type and add explicit casts where needed, for example \
             CAST(created_at AS date)."
            .to_string(),
        DiagnosticCategory::Execution => "The query failed while running. Simplify it, for \
             example by removing joins or subqueries, and try a different approach."
            .to_string(),
    }
}

/// Plain-language explanation for an end user.
pub fn plain_explanation(category: DiagnosticCategory) -> &'static str {
    match category {
        DiagnosticCategory::Syntax => {
            "The generated query was not valid SQL, and repeated attempts could not fix it."
        }
        DiagnosticCategory::ColumnNotFound => {
            "The question refers to a field that could not be matched to any column in the data."
        }
        DiagnosticCategory::TableNotFound => {
            "The question refers to data that could not be matched to any available table."
        }
        DiagnosticCategory::Permission => {
            "Answering this would require data or operations that this workspace is not allowed to use."
        }
        DiagnosticCategory::Timeout => "The query needed to scan too much data and was stopped.",
        DiagnosticCategory::TypeMismatch => {
            "The query compared or combined values of incompatible types."
        }
        DiagnosticCategory::Execution => "The database could not run the query.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column() {
        assert_eq!(
            categorize(Some(ErrorKind::NotFound), "column \"emal\" does not exist"),
            DiagnosticCategory::ColumnNotFound
        );
    }

    #[test]
    fn test_missing_relation() {
        assert_eq!(
            categorize(Some(ErrorKind::NotFound), "relation \"userz\" does not exist"),
            DiagnosticCategory::TableNotFound
        );
    }

    #[test]
    fn test_operator_mismatch_beats_not_found() {
        assert_eq!(
            categorize(
                Some(ErrorKind::NotFound),
                "operator does not exist: integer = text"
            ),
            DiagnosticCategory::TypeMismatch
        );
    }

    #[test]
    fn test_policy_messages() {
        assert_eq!(
            categorize(
                Some(ErrorKind::TableNotAllowed),
                "Table 'payments' is not allowed. Allowed tables: orders, users."
            ),
            DiagnosticCategory::Permission
        );
        assert_eq!(
            categorize(
                Some(ErrorKind::ForbiddenStatementType),
                "Only read-only SELECT queries are allowed; INSERT statements are not permitted."
            ),
            DiagnosticCategory::Permission
        );
    }

    #[test]
    fn test_parse_error() {
        assert_eq!(
            categorize(
                Some(ErrorKind::ParseError),
                "Could not parse SQL: sql parser error: Expected: an expression, found: EOF"
            ),
            DiagnosticCategory::Syntax
        );
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            categorize(
                Some(ErrorKind::QueryTimeout),
                "The query took too long and was cancelled."
            ),
            DiagnosticCategory::Timeout
        );
    }

    #[test]
    fn test_falls_back_on_kind_then_execution() {
        assert_eq!(
            categorize(Some(ErrorKind::MultipleStatements), "Only one, please"),
            DiagnosticCategory::Syntax
        );
        assert_eq!(
            categorize(Some(ErrorKind::InternalError), "The database could not run this query."),
            DiagnosticCategory::Execution
        );
        assert_eq!(categorize(None, ""), DiagnosticCategory::Execution);
    }

    #[test]
    fn test_missing_identifier_extraction() {
        assert_eq!(
            missing_identifier("column \"emal\" does not exist").as_deref(),
            Some("emal")
        );
        assert_eq!(
            missing_identifier("column u.emal does not exist").as_deref(),
            Some("u.emal")
        );
        assert_eq!(
            missing_identifier("relation \"public.userz\" does not exist").as_deref(),
            Some("public.userz")
        );
        assert_eq!(
            missing_identifier("Table 'payments' is not allowed.").as_deref(),
            Some("payments")
        );
        assert_eq!(missing_identifier("canceling statement"), None);
    }

    #[test]
    fn test_guidance_names_identifier_and_tables() {
        let tables = BTreeSet::from(["users".to_string()]);
        let text = guidance(DiagnosticCategory::ColumnNotFound, Some("emal"), &tables);
        assert!(text.contains("'emal'"));
        assert!(text.contains("users"));
    }

    #[test]
    fn test_every_category_has_text() {
        for category in [
            DiagnosticCategory::Syntax,
            DiagnosticCategory::ColumnNotFound,
            DiagnosticCategory::TableNotFound,
            DiagnosticCategory::Permission,
            DiagnosticCategory::Timeout,
            DiagnosticCategory::TypeMismatch,
            DiagnosticCategory::Execution,
        ] {
            assert!(!guidance(category, None, &BTreeSet::new()).is_empty());
            assert!(!plain_explanation(category).is_empty());
            assert!(!category.label().is_empty());
        }
    }
}
