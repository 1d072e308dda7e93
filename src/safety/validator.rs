//! Policy validation for generated SQL.
//!
//! Uses sqlparser-rs to parse the text under the policy's dialect, then applies
//! the checks in a fixed order, stopping at the first failure: statement count,
//! root statement type, nested writes, deny-listed functions, table and schema
//! access.

use sqlparser::ast::{Expr, ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use tracing::{debug, info};

use crate::error::ErrorKind;

use super::functions::is_dangerous_function;
use super::tables::{RelationCollector, TableRef};
use super::{ParsedStatement, StatementType, ValidationError, ValidationPolicy};

/// Validates `sql` against `policy` and returns the parsed statement.
///
/// The returned tree is exactly what was parsed; see
/// [`rewrite_limit`](super::rewrite_limit) for the row cap.
pub fn validate(
    sql: &str,
    policy: &ValidationPolicy,
) -> std::result::Result<ParsedStatement, ValidationError> {
    let result = validate_inner(sql, policy);
    match &result {
        Ok(parsed) => debug!(
            tables = parsed.tables_referenced().len(),
            "SQL passed policy validation"
        ),
        Err(e) => info!(kind = %e.kind, reason = %e.message, "SQL rejected by policy"),
    }
    result
}

fn validate_inner(
    sql: &str,
    policy: &ValidationPolicy,
) -> std::result::Result<ParsedStatement, ValidationError> {
    let dialect = policy.dialect().parser_dialect();
    let mut statements = Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| {
        ValidationError::new(ErrorKind::ParseError, format!("Could not parse SQL: {}", e))
    })?;

    let statement = match statements.len() {
        0 => {
            return Err(ValidationError::new(
                ErrorKind::EmptyStatement,
                "No SQL statement was provided.",
            ))
        }
        1 => statements.remove(0),
        n => {
            return Err(ValidationError::new(
                ErrorKind::MultipleStatements,
                format!("Only a single statement may be executed; found {}.", n),
            ))
        }
    };

    check_root(&statement)?;
    check_nested_writes(&statement)?;
    check_functions(&statement)?;
    let tables = check_tables(&statement, policy)?;

    Ok(ParsedStatement::new(statement, tables))
}

fn forbidden(statement_type: StatementType) -> ValidationError {
    ValidationError::new(
        ErrorKind::ForbiddenStatementType,
        format!(
            "Only read-only SELECT queries are allowed; {} statements are not permitted.",
            statement_type
        ),
    )
}

/// Accepts only a query whose body is a SELECT or a set operation over SELECTs.
fn check_root(statement: &Statement) -> std::result::Result<(), ValidationError> {
    match statement {
        Statement::Query(query) => check_query_body(&query.body),
        other => Err(forbidden(statement_type(other))),
    }
}

fn check_query_body(body: &SetExpr) -> std::result::Result<(), ValidationError> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => {
            Err(forbidden(StatementType::SelectInto))
        }
        SetExpr::Select(_) => Ok(()),
        SetExpr::Query(query) => check_query_body(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            check_query_body(left)?;
            check_query_body(right)
        }
        other => Err(forbidden(set_expr_type(other))),
    }
}

/// Returns the statement type of a parsed statement.
pub(crate) fn statement_type(statement: &Statement) -> StatementType {
    match statement {
        Statement::Query(query) => query_type(query),
        Statement::Insert { .. } => StatementType::Insert,
        Statement::Update { .. } => StatementType::Update,
        Statement::Delete { .. } => StatementType::Delete,
        Statement::Merge { .. } => StatementType::Merge,
        Statement::Drop { .. } => StatementType::Drop,
        Statement::Truncate { .. } => StatementType::Truncate,
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. } => StatementType::Alter,
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. } => StatementType::Create,
        Statement::Grant { .. } => StatementType::Grant,
        Statement::Revoke { .. } => StatementType::Revoke,
        Statement::SetVariable { .. }
        | Statement::SetRole { .. }
        | Statement::SetTimeZone { .. }
        | Statement::SetNames { .. }
        | Statement::SetTransaction { .. } => StatementType::Set,
        Statement::Explain { .. } | Statement::ExplainTable { .. } => StatementType::Explain,
        Statement::ShowVariable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. } => StatementType::Show,
        Statement::Copy { .. } => StatementType::Copy,
        // Vendor commands: name them by their leading keyword
        other => StatementType::from_keyword(&leading_keyword(&other.to_string())),
    }
}

fn query_type(query: &Query) -> StatementType {
    if !query.locks.is_empty() {
        return StatementType::LockingRead;
    }
    set_expr_type(&query.body)
}

fn set_expr_type(body: &SetExpr) -> StatementType {
    match body {
        SetExpr::Select(select) if select.into.is_some() => StatementType::SelectInto,
        SetExpr::Select(_) => StatementType::Select,
        SetExpr::Query(query) => query_type(query),
        SetExpr::SetOperation { op, .. } => match op.to_string().to_uppercase().as_str() {
            "UNION" => StatementType::Union,
            "INTERSECT" => StatementType::Intersect,
            _ => StatementType::Except,
        },
        SetExpr::Values(_) => StatementType::Values,
        SetExpr::Table(_) => StatementType::Table,
        SetExpr::Insert(statement) | SetExpr::Update(statement) => statement_type(statement),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.trim_start_matches('(')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Rejects writes, `SELECT INTO` and row locks anywhere below the root.
fn check_nested_writes(statement: &Statement) -> std::result::Result<(), ValidationError> {
    match statement.visit(&mut NestedWriteScan) {
        ControlFlow::Break(err) => Err(err),
        ControlFlow::Continue(()) => Ok(()),
    }
}

struct NestedWriteScan;

impl Visitor for NestedWriteScan {
    type Break = ValidationError;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Query(_) => ControlFlow::Continue(()),
            other => ControlFlow::Break(forbidden(statement_type(other))),
        }
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let found = query_type(query);
        match found {
            StatementType::LockingRead | StatementType::SelectInto => {
                ControlFlow::Break(forbidden(found))
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

/// Rejects calls to deny-listed functions, including table-function syntax.
fn check_functions(statement: &Statement) -> std::result::Result<(), ValidationError> {
    match statement.visit(&mut FunctionScan) {
        ControlFlow::Break(err) => Err(err),
        ControlFlow::Continue(()) => Ok(()),
    }
}

struct FunctionScan;

impl FunctionScan {
    fn check(name: &ObjectName) -> ControlFlow<ValidationError> {
        let Some(last) = name.0.last() else {
            return ControlFlow::Continue(());
        };
        let bare = last.value.to_lowercase();
        if is_dangerous_function(&bare) {
            return ControlFlow::Break(ValidationError::new(
                ErrorKind::DangerousFunction,
                format!("Function '{}' is not allowed in queries.", bare),
            ));
        }
        ControlFlow::Continue(())
    }
}

impl Visitor for FunctionScan {
    type Break = ValidationError;

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => Self::check(&function.name),
            _ => ControlFlow::Continue(()),
        }
    }

    /// Function calls in `FROM`: `LATERAL f(...)` and `f(...) AS t`. Plain
    /// tables are left to the table rules even when named like a function.
    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Function { name, .. } => Self::check(name),
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => Self::check(name),
            _ => ControlFlow::Continue(()),
        }
    }
}

/// Applies the deny list, allow list and schema rules to every real table.
fn check_tables(
    statement: &Statement,
    policy: &ValidationPolicy,
) -> std::result::Result<BTreeSet<String>, ValidationError> {
    let collector = RelationCollector::collect(statement);
    let mut referenced = BTreeSet::new();

    for table in collector.real_tables() {
        check_table(&table, policy)?;
        referenced.insert(table.qualified());
    }

    Ok(referenced)
}

fn check_table(
    table: &TableRef,
    policy: &ValidationPolicy,
) -> std::result::Result<(), ValidationError> {
    let qualified = table.qualified();
    let listed = |set: &BTreeSet<String>| set.contains(&table.name) || set.contains(&qualified);

    if listed(policy.denied_tables()) {
        return Err(ValidationError::new(
            ErrorKind::TableNotAllowed,
            format!("Access to table '{}' is not allowed.", qualified),
        ));
    }

    if !policy.allowed_tables().is_empty() && !listed(policy.allowed_tables()) {
        return Err(ValidationError::new(
            ErrorKind::TableNotAllowed,
            format!(
                "Table '{}' is not available in this project. Use one of: {}.",
                qualified,
                policy
                    .allowed_tables()
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }

    let schema = match &table.schema {
        Some(schema) => Some(schema.as_str()),
        None if policy.dialect().has_implicit_pg_catalog() && table.name.starts_with("pg_") => {
            Some("pg_catalog")
        }
        None => None,
    };

    if let Some(schema) = schema {
        if !policy.is_schema_readable(schema) {
            return Err(ValidationError::new(
                ErrorKind::SchemaNotAllowed,
                format!(
                    "Schema '{}' is not accessible. Query tables in '{}' instead.",
                    schema,
                    policy.primary_schema()
                ),
            ));
        }
    }

    Ok(())
}
