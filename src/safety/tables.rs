//! Table reference extraction.
//!
//! Walks every relation in a statement, including those inside subqueries,
//! CTE bodies and set operations, and separates real tables from CTE aliases.

use sqlparser::ast::{ObjectName, Query, Statement, Visit, Visitor};
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::ops::ControlFlow;

use super::Dialect;

/// A relation named in a query, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    /// Explicit schema qualifier, if any.
    pub schema: Option<String>,
    /// Bare table name.
    pub name: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_lowercase),
            name: name.to_lowercase(),
        }
    }

    /// Builds a reference from `[catalog.][schema.]table`.
    pub(crate) fn from_object_name(name: &ObjectName) -> Option<Self> {
        let parts: Vec<String> = name
            .0
            .iter()
            .map(|ident| ident.value.to_lowercase())
            .collect();
        let (table, qualifiers) = parts.split_last()?;
        Some(Self {
            schema: qualifiers.last().cloned(),
            name: table.clone(),
        })
    }

    /// Returns `schema.table` or the bare name when unqualified.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// CTE names in effect for one query.
#[derive(Debug, Default)]
struct CteScope {
    /// Names an unqualified relation in this query resolves to instead of a table.
    visible: BTreeSet<String>,
    /// CTE bodies of this query not yet entered, in order: body address and name.
    pending: VecDeque<(usize, String)>,
}

fn address(query: &Query) -> usize {
    query as *const Query as usize
}

/// Collects real table references in one pass, resolving CTE names by scope.
///
/// A CTE name shadows relations in the query that owns the `WITH`, in its
/// subqueries and in later sibling CTEs. It shadows its own body only under
/// `WITH RECURSIVE`, and never an enclosing query.
#[derive(Debug, Default)]
pub(crate) struct RelationCollector {
    relations: Vec<TableRef>,
    scopes: Vec<CteScope>,
}

impl RelationCollector {
    pub(crate) fn collect(statement: &Statement) -> Self {
        let mut collector = Self::default();
        let _ = statement.visit(&mut collector);
        collector
    }

    /// Relations that are not references to a CTE, deduplicated, in first-seen order.
    pub(crate) fn real_tables(&self) -> Vec<TableRef> {
        let mut seen = BTreeSet::new();
        self.relations
            .iter()
            .filter(|table| seen.insert((*table).clone()))
            .cloned()
            .collect()
    }

    fn is_cte(&self, table: &TableRef) -> bool {
        table.schema.is_none()
            && self
                .scopes
                .last()
                .is_some_and(|scope| scope.visible.contains(&table.name))
    }
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let mut visible = BTreeSet::new();
        if let Some(parent) = self.scopes.last_mut() {
            visible = parent.visible.clone();
            // Entering a CTE body: its name becomes visible to the parent
            // only from here on, so later siblings and the main body see it.
            let is_next_body = parent
                .pending
                .front()
                .is_some_and(|(body, _)| *body == address(query));
            if is_next_body {
                if let Some((_, name)) = parent.pending.pop_front() {
                    parent.visible.insert(name);
                }
            }
        }

        let mut pending = VecDeque::new();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.to_lowercase();
                if with.recursive {
                    visible.insert(name.clone());
                }
                pending.push_back((address(&cte.query), name));
            }
        }

        self.scopes.push(CteScope { visible, pending });
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(table) = TableRef::from_object_name(relation) {
            if !self.is_cte(&table) {
                self.relations.push(table);
            }
        }
        ControlFlow::Continue(())
    }
}

/// Best-effort list of real tables referenced by `sql`.
///
/// Returns an empty set when the text does not parse. Used for diagnostics,
/// never for access decisions.
pub fn extract_tables(sql: &str, dialect: Dialect) -> BTreeSet<String> {
    let parser_dialect = dialect.parser_dialect();
    let Ok(statements) = Parser::parse_sql(parser_dialect.as_ref(), sql) else {
        return BTreeSet::new();
    };

    statements
        .iter()
        .flat_map(|statement| RelationCollector::collect(statement).real_tables())
        .map(|table| table.qualified())
        .collect()
}
