//! Statement parsing and classification
//!
//! Statement text arrives with JDBC-style `?` placeholders. They are
//! renumbered to PostgreSQL `$n` form before parsing so every placeholder in
//! the tree carries a distinct name.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;

use serde::Serialize;
use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, ObjectName, Query, Statement, Value, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::catalog::SchemaCatalog;
use crate::database::Database;
use crate::error::{ParseError, SchemaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
    Update,
    Delete,
    Insert,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Insert => "insert",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parsed statement
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    pub statement: Statement,
    /// Text as written in the corpus
    pub original: String,
    /// Distinct placeholder names in the tree
    pub placeholders: BTreeSet<String>,
}

impl ParsedStatement {
    pub fn has_placeholders(&self) -> bool {
        !self.placeholders.is_empty()
    }
}

/// Rewrite `?` placeholders outside quotes and comments to `$1`, `$2`, ...
pub fn renumber_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut counter = 0;

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push(c);
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '?' => {
                counter += 1;
                out.push_str(&format!("${}", counter));
            }
            _ => out.push(c),
        }
    }

    out
}

/// Parse one statement and determine its kind
pub fn parse(sql: &str) -> Result<ParsedStatement, ParseError> {
    let normalized = renumber_placeholders(sql);
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &normalized)?;

    if statements.len() != 1 {
        return Err(ParseError::StatementCount(statements.len()));
    }
    let statement = statements.remove(0);

    let kind = match &statement {
        Statement::Query(_) => StatementKind::Select,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete(_) => StatementKind::Delete,
        Statement::Insert(_) => StatementKind::Insert,
        other => {
            let keyword = other
                .to_string()
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_uppercase();
            return Err(ParseError::UnsupportedKind(keyword));
        }
    };

    let mut placeholders = BTreeSet::new();
    let _ = visit_expressions(&statement, |expr| {
        if let Expr::Value(Value::Placeholder(p)) = expr {
            placeholders.insert(p.clone());
        }
        ControlFlow::<()>::Continue(())
    });

    Ok(ParsedStatement {
        kind,
        statement,
        original: sql.to_string(),
        placeholders,
    })
}

/// Last identifier of a possibly schema-qualified name, lowercased
pub fn base_name(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.to_lowercase())
        .unwrap_or_default()
}

/// Collects the names of common table expressions at any nesting depth
#[derive(Default)]
struct CteNames(BTreeSet<String>);

impl Visitor for CteNames {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.0.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Base tables referenced anywhere in the statement, in first-seen order
pub fn referenced_tables(statement: &Statement) -> Vec<String> {
    let mut ctes = CteNames::default();
    let _ = statement.visit(&mut ctes);
    let ctes = ctes.0;
    let mut tables: Vec<String> = Vec::new();

    let _ = visit_relations(statement, |relation| {
        let name = base_name(relation);
        if !name.is_empty() && !ctes.contains(&name) && !tables.contains(&name) {
            tables.push(name);
        }
        ControlFlow::<()>::Continue(())
    });

    tables
}

/// Resolve the statement's tables and make sure each is catalogued
pub async fn resolve_tables<D: Database>(
    parsed: &ParsedStatement,
    catalog: &mut SchemaCatalog,
    db: &D,
) -> Result<Vec<String>, SchemaError> {
    let tables = referenced_tables(&parsed.statement);
    for table in &tables {
        catalog.introspect(db, table).await?;
    }
    Ok(tables)
}
