//! Row-limit enforcement.
//!
//! Mutates the outer query of a validated statement so that it returns at most
//! `max_row_limit` rows. Only a literal non-negative integer is trusted as a
//! row count; anything else is replaced by the cap.

use sqlparser::ast::{Expr, Fetch, Query, Statement, Value};

use super::ParsedStatement;

/// What the rewriter did to the statement's LIMIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitAction {
    /// No limit was present; one equal to the cap was attached.
    Attached,
    /// A literal limit within the cap was left as is.
    Kept,
    /// A literal limit above the cap was lowered to the cap.
    Capped { requested: u64 },
    /// A limit that is not a literal was replaced by the cap.
    ReplacedNonLiteral,
}

impl LimitAction {
    /// Returns true when an existing limit was reduced or replaced.
    pub fn was_capped(&self) -> bool {
        matches!(self, Self::Capped { .. } | Self::ReplacedNonLiteral)
    }

    /// Returns a caveat for the result envelope, if the caller should be told.
    pub fn warning(&self, max_row_limit: u64) -> Option<String> {
        match self {
            Self::Attached | Self::Kept => None,
            Self::Capped { requested } => Some(format!(
                "Requested LIMIT {} exceeds the maximum of {} rows; the limit was lowered to {}.",
                requested, max_row_limit, max_row_limit
            )),
            Self::ReplacedNonLiteral => Some(format!(
                "LIMIT was not a plain number and was replaced with the maximum of {} rows.",
                max_row_limit
            )),
        }
    }
}

/// A statement after limit enforcement.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitRewrite {
    pub statement: ParsedStatement,
    pub action: LimitAction,
}

impl LimitRewrite {
    pub fn was_capped(&self) -> bool {
        self.action.was_capped()
    }

    /// SQL that is actually sent to the backend.
    pub fn executed_sql(&self) -> String {
        self.statement.to_sql()
    }
}

/// Enforces `max_row_limit` on `statement` and reports whether a limit was lowered.
pub fn enforce_limit(statement: ParsedStatement, max_row_limit: u64) -> (ParsedStatement, bool) {
    let rewrite = rewrite_limit(statement, max_row_limit);
    let was_capped = rewrite.was_capped();
    (rewrite.statement, was_capped)
}

/// Enforces `max_row_limit` on the outer query of `statement`.
///
/// Set operations are limited as a whole, never per branch. A `FETCH FIRST`
/// clause is folded into the same rule and replaced by `LIMIT`.
pub fn rewrite_limit(mut statement: ParsedStatement, max_row_limit: u64) -> LimitRewrite {
    let action = match statement.statement_mut() {
        Statement::Query(query) => cap_query(query, max_row_limit),
        // Validation only lets queries through
        _ => LimitAction::Kept,
    };

    LimitRewrite { statement, action }
}

fn cap_query(query: &mut Query, max_row_limit: u64) -> LimitAction {
    let fetched = query.fetch.take().map(|fetch| fetch_row_count(&fetch));

    // Outer None: no limit at all. Inner None: a limit that is not a literal.
    let requested: Option<Option<u64>> = match (&query.limit, fetched) {
        (Some(limit), _) => Some(literal_row_count(limit)),
        (None, Some(fetched)) => Some(fetched),
        (None, None) => None,
    };

    let (action, rows) = match requested {
        None => (LimitAction::Attached, max_row_limit),
        Some(Some(rows)) if rows <= max_row_limit => (LimitAction::Kept, rows),
        Some(Some(rows)) => (LimitAction::Capped { requested: rows }, max_row_limit),
        Some(None) => (LimitAction::ReplacedNonLiteral, max_row_limit),
    };

    let untouched = action == LimitAction::Kept && query.limit.is_some();
    if !untouched {
        query.limit = Some(number(rows));
    }

    action
}

fn literal_row_count(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse::<u64>().ok(),
        Expr::Nested(inner) => literal_row_count(inner),
        _ => None,
    }
}

fn fetch_row_count(fetch: &Fetch) -> Option<u64> {
    if fetch.percent || fetch.with_ties {
        return None;
    }
    match &fetch.quantity {
        // FETCH FIRST ROW ONLY
        None => Some(1),
        Some(quantity) => literal_row_count(quantity),
    }
}

fn number(rows: u64) -> Expr {
    Expr::Value(Value::Number(rows.to_string(), false))
}
