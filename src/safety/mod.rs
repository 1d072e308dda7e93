//! Query safety: policy validation and row-limit enforcement.
//!
//! Parses generator-produced SQL with sqlparser, rejects anything that is not a
//! single read-only query within the tenant's table/schema policy, and rewrites
//! the accepted tree so that it can never return more than the policy's row cap.

mod functions;
mod limit;
mod tables;
mod validator;

pub use functions::{is_dangerous_function, DANGEROUS_FUNCTIONS};
pub use limit::{enforce_limit, rewrite_limit, LimitAction, LimitRewrite};
pub use tables::{extract_tables, TableRef};
pub use validator::validate;

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::error::ErrorKind;

/// Schema that is always readable in addition to the primary schema.
pub const PUBLIC_SCHEMA: &str = "public";

/// SQL grammar used to parse and validate a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,
    MySql,
    Sqlite,
    Snowflake,
    BigQuery,
    Generic,
}

impl Dialect {
    /// Returns the dialect as a string for configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Snowflake => "snowflake",
            Self::BigQuery => "bigquery",
            Self::Generic => "generic",
        }
    }

    /// Parses a dialect from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "sqlite" => Some(Self::Sqlite),
            "snowflake" => Some(Self::Snowflake),
            "bigquery" => Some(Self::BigQuery),
            "generic" | "ansi" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Returns the sqlparser dialect implementation.
    pub(crate) fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        use sqlparser::dialect::{
            BigQueryDialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
            SnowflakeDialect,
        };

        match self {
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::MySql => Box::new(MySqlDialect {}),
            Self::Sqlite => Box::new(SQLiteDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {}),
            Self::BigQuery => Box::new(BigQueryDialect {}),
            Self::Generic => Box::new(GenericDialect {}),
        }
    }

    /// Returns true if unqualified `pg_*` relations resolve to `pg_catalog`.
    pub(crate) fn has_implicit_pg_catalog(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tenant access policy applied to every query.
///
/// Built once per project and shared read-only afterwards. All names are
/// stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    primary_schema: String,
    additional_readable_schemas: BTreeSet<String>,
    allowed_tables: BTreeSet<String>,
    denied_tables: BTreeSet<String>,
    max_row_limit: u64,
    dialect: Dialect,
}

impl ValidationPolicy {
    /// Creates a policy over `primary_schema` that caps results at `max_row_limit` rows.
    pub fn new(primary_schema: impl Into<String>, max_row_limit: u64) -> Self {
        Self {
            primary_schema: primary_schema.into().to_lowercase(),
            additional_readable_schemas: BTreeSet::new(),
            allowed_tables: BTreeSet::new(),
            denied_tables: BTreeSet::new(),
            max_row_limit,
            dialect: Dialect::default(),
        }
    }

    /// Sets the dialect used for parsing.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Adds schemas that may be referenced explicitly besides the primary one.
    pub fn with_readable_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.additional_readable_schemas
            .extend(schemas.into_iter().map(|s| s.as_ref().to_lowercase()));
        self
    }

    /// Restricts queries to these tables. An empty allow list permits all tables.
    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_tables
            .extend(tables.into_iter().map(|s| s.as_ref().to_lowercase()));
        self
    }

    /// Forbids these tables regardless of the allow list.
    pub fn with_denied_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.denied_tables
            .extend(tables.into_iter().map(|s| s.as_ref().to_lowercase()));
        self
    }

    pub fn primary_schema(&self) -> &str {
        &self.primary_schema
    }

    pub fn additional_readable_schemas(&self) -> &BTreeSet<String> {
        &self.additional_readable_schemas
    }

    pub fn allowed_tables(&self) -> &BTreeSet<String> {
        &self.allowed_tables
    }

    pub fn denied_tables(&self) -> &BTreeSet<String> {
        &self.denied_tables
    }

    pub fn max_row_limit(&self) -> u64 {
        self.max_row_limit
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Returns true if an explicit `schema.` qualifier is permitted.
    pub fn is_schema_readable(&self, schema: &str) -> bool {
        let schema = schema.to_lowercase();
        schema == self.primary_schema
            || schema == PUBLIC_SCHEMA
            || self.additional_readable_schemas.contains(&schema)
    }
}

/// A validated single statement together with the real tables it reads.
///
/// Only the limit rewriter changes the tree after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    statement: Statement,
    tables: BTreeSet<String>,
}

impl ParsedStatement {
    pub(crate) fn new(statement: Statement, tables: BTreeSet<String>) -> Self {
        Self { statement, tables }
    }

    /// Returns the underlying syntax tree.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub(crate) fn statement_mut(&mut self) -> &mut Statement {
        &mut self.statement
    }

    /// Real relations referenced by the statement, CTE names excluded.
    pub fn tables_referenced(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// Renders the statement back to SQL.
    pub fn to_sql(&self) -> String {
        self.statement.to_string()
    }
}

impl fmt::Display for ParsedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement)
    }
}

/// Rejection produced by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Failure kind reported in the envelope.
    pub kind: ErrorKind,
    /// Message safe to show to the end user.
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The kind of SQL statement detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Union,
    Intersect,
    Except,
    Insert,
    Update,
    Delete,
    Merge,
    Drop,
    Alter,
    Truncate,
    Create,
    Grant,
    Revoke,
    Set,
    Explain,
    Show,
    Copy,
    Values,
    Table,
    /// `SELECT ... INTO new_table`.
    SelectInto,
    /// `SELECT ... FOR UPDATE` and friends.
    LockingRead,
    /// Any other vendor command, named by its leading keyword.
    Command(String),
}

impl StatementType {
    /// Returns true for the statement kinds a read-only query may consist of.
    pub fn is_read_only(&self) -> bool {
        match self {
            Self::Select | Self::Union | Self::Intersect | Self::Except => true,
            Self::Insert
            | Self::Update
            | Self::Delete
            | Self::Merge
            | Self::Drop
            | Self::Alter
            | Self::Truncate
            | Self::Create
            | Self::Grant
            | Self::Revoke
            | Self::Set
            | Self::Explain
            | Self::Show
            | Self::Copy
            | Self::Values
            | Self::Table
            | Self::SelectInto
            | Self::LockingRead
            | Self::Command(_) => false,
        }
    }

    /// Maps the leading keyword of a rendered statement to a type.
    pub(crate) fn from_keyword(keyword: &str) -> Self {
        match keyword.to_uppercase().as_str() {
            "SELECT" => Self::Select,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "DROP" => Self::Drop,
            "ALTER" => Self::Alter,
            "TRUNCATE" => Self::Truncate,
            "CREATE" => Self::Create,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            "SET" | "RESET" => Self::Set,
            "EXPLAIN" | "DESCRIBE" | "DESC" => Self::Explain,
            "SHOW" => Self::Show,
            "COPY" => Self::Copy,
            "VALUES" => Self::Values,
            "TABLE" => Self::Table,
            "" => Self::Command("UNKNOWN".to_string()),
            other => Self::Command(other.to_string()),
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Union => write!(f, "UNION"),
            Self::Intersect => write!(f, "INTERSECT"),
            Self::Except => write!(f, "EXCEPT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Merge => write!(f, "MERGE"),
            Self::Drop => write!(f, "DROP"),
            Self::Alter => write!(f, "ALTER"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Set => write!(f, "SET"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::Show => write!(f, "SHOW"),
            Self::Copy => write!(f, "COPY"),
            Self::Values => write!(f, "VALUES"),
            Self::Table => write!(f, "TABLE"),
            Self::SelectInto => write!(f, "SELECT INTO"),
            Self::LockingRead => write!(f, "SELECT FOR UPDATE/SHARE"),
            Self::Command(keyword) => write!(f, "{}", keyword),
        }
    }
}
