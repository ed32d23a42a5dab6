// ============================================================================
// Parameter Binder & Deparser
// ============================================================================
//
// Replaces every placeholder with a literal of the owning column's type,
// taken from the table's sample row when one exists, and records how each
// column was used along the way. SELECTs carrying a LIMIT are capped at one
// row so plan inspection stays cheap.

pub mod walk;

use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;

use log::{debug, warn};
use serde::Serialize;
use sqlparser::ast::{visit_expressions_mut, Expr, Statement, Value};

use crate::catalog::SchemaCatalog;
use crate::classifier::{ParsedStatement, StatementKind};
use crate::database::Database;
use crate::error::{BindError, Result};
use crate::types::{SqlLiteral, SqlType};
use crate::usage::UsageTracker;

pub use walk::{Clause, ColumnRef, ParamOwner, ParamSite, StatementWalk, TableRef, UsageRecord};

/// Alias to table name, shared by every statement of a run
#[derive(Debug, Default, Clone, Serialize)]
pub struct AliasMap(BTreeMap<String, String>);

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, alias: &str, table: &str) {
        let alias = alias.to_lowercase();
        let table = table.to_lowercase();
        if let Some(previous) = self.0.get(&alias) {
            if *previous != table {
                debug!("Alias {} now refers to {} (was {})", alias, table, previous);
            }
        }
        self.0.insert(alias, table);
    }

    /// Table behind a qualifier; a qualifier that is not an alias is taken
    /// to be a table name
    pub fn resolve(&self, qualifier: &str) -> String {
        let qualifier = qualifier.to_lowercase();
        self.0.get(&qualifier).cloned().unwrap_or(qualifier)
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.0.get(alias).map(String::as_str)
    }
}

/// Statement text ready for execution plus the literals spliced into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundStatement {
    pub text: String,
    /// In placeholder visitation order, forced row count last
    pub params: Vec<SqlLiteral>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound(BoundStatement),
    /// The statement is recorded but cannot be rewritten
    Unsupported { reason: String },
}

/// Per-statement binding over run-scoped state
pub struct Binder<'a, D: Database> {
    pub db: &'a D,
    pub catalog: &'a mut SchemaCatalog,
    pub aliases: &'a mut AliasMap,
    pub usage: &'a mut UsageTracker,
}

impl<'a, D: Database> Binder<'a, D> {
    /// Record usage for `parsed` and produce its executable form.
    ///
    /// `tables` are the statement's referenced tables, already catalogued.
    pub async fn bind(
        &mut self,
        query_id: &str,
        parsed: &ParsedStatement,
        tables: &[String],
    ) -> Result<BindOutcome> {
        let walk = walk::walk(&parsed.statement);

        for table in &walk.tables {
            if let Some(alias) = &table.alias {
                self.aliases.register(alias, &table.name);
            }
        }

        for target in &walk.targets {
            self.catalog.introspect(self.db, target).await?;
        }

        self.record_usage(query_id, parsed.kind, &walk, tables);

        if !parsed.has_placeholders() {
            return Ok(BindOutcome::Bound(BoundStatement {
                text: parsed.original.clone(),
                params: Vec::new(),
            }));
        }

        if parsed.kind == StatementKind::Insert {
            warn!("Skipping placeholder binding for INSERT {}", query_id);
            return Ok(BindOutcome::Unsupported {
                reason: "INSERT statements with placeholders are not rewritten".to_string(),
            });
        }

        let mut literals: HashMap<String, SqlLiteral> = HashMap::new();
        let mut params = Vec::with_capacity(walk.params.len());

        for site in &walk.params {
            let owner = site
                .owner
                .as_ref()
                .ok_or_else(|| BindError::UnownedPlaceholder(site.placeholder.clone()))?;

            let literal = match owner {
                ParamOwner::RowCount => SqlLiteral::row_count(1),
                ParamOwner::RowOffset => SqlLiteral::row_count(0),
                ParamOwner::Column {
                    column,
                    table_context,
                } => {
                    self.synthesize(column, table_context.as_deref(), tables)
                        .await?
                }
            };

            debug!("{} {} := {}", query_id, site.placeholder, literal.to_sql());
            params.push(literal.clone());
            literals.insert(site.placeholder.clone(), literal);
        }

        let mut statement = parsed.statement.clone();

        if parsed.kind == StatementKind::Select && walk.has_limit {
            if let Statement::Query(query) = &mut statement {
                let one = Expr::Value(Value::Number("1".to_string(), false));
                if query.limit.is_some() {
                    query.limit = Some(one.clone());
                }
                if let Some(fetch) = &mut query.fetch {
                    fetch.quantity = Some(one);
                }
            }
        }

        let mut unreached = Vec::new();
        let _ = visit_expressions_mut(&mut statement, |expr| {
            let name = match expr {
                Expr::Value(Value::Placeholder(p)) => p.clone(),
                _ => return ControlFlow::<()>::Continue(()),
            };
            match literals.get(&name) {
                Some(literal) => *expr = literal_expr(literal),
                None => unreached.push(name),
            }
            ControlFlow::Continue(())
        });

        if let Some(placeholder) = unreached.into_iter().next() {
            return Err(BindError::UnreachedPlaceholder(placeholder).into());
        }

        Ok(BindOutcome::Bound(BoundStatement {
            text: statement.to_string(),
            params,
        }))
    }

    fn record_usage(
        &mut self,
        query_id: &str,
        kind: StatementKind,
        walk: &StatementWalk,
        tables: &[String],
    ) {
        let kind_tables = match kind {
            StatementKind::Select => tables,
            _ => walk.targets.as_slice(),
        };
        for table in kind_tables {
            self.usage.record_kind(kind, table, query_id);
        }

        // Assignment targets resolved up front so a target read back in the
        // WHERE clause counts as SET usage
        let set_columns: Vec<(String, String)> = match kind {
            StatementKind::Update => walk
                .set_columns()
                .filter_map(|c| self.usage_table(c, walk, tables).map(|t| (t, c.name.clone())))
                .collect(),
            _ => Vec::new(),
        };
        for (table, column) in &set_columns {
            self.usage.record_set(table, column);
        }

        for record in &walk.usages {
            let column = match (kind, record) {
                (_, UsageRecord::JoinPredicate { column }) => {
                    if let Some(table) = self.usage_table(column, walk, tables) {
                        self.usage.record_on(&table, query_id, &column.name);
                    }
                    continue;
                }
                (
                    StatementKind::Select | StatementKind::Delete,
                    UsageRecord::Column { clause: Clause::Where, column }
                    | UsageRecord::InExpression { clause: Clause::Where, column },
                ) => column,
                (
                    StatementKind::Update,
                    UsageRecord::Column { clause: Clause::Where | Clause::Value, column }
                    | UsageRecord::InExpression { clause: Clause::Where | Clause::Value, column },
                ) => column,
                _ => continue,
            };

            let table = match self.usage_table(column, walk, tables) {
                Some(table) => table,
                None => continue,
            };
            if set_columns.iter().any(|(t, c)| *t == table && *c == column.name) {
                self.usage.record_set(&table, &column.name);
            } else {
                self.usage.record_where(&table, query_id, &column.name);
            }
        }
    }

    /// Table a column usage is attributed to. Unqualified columns need a
    /// single candidate: the only table, the only write target, or the only
    /// referenced table carrying that column.
    fn usage_table(&self, column: &ColumnRef, walk: &StatementWalk, tables: &[String]) -> Option<String> {
        if let Some(qualifier) = &column.qualifier {
            return Some(self.aliases.resolve(qualifier));
        }
        if tables.len() == 1 {
            return tables.first().cloned();
        }
        if walk.targets.len() == 1 {
            return walk.targets.first().cloned();
        }

        let mut owners = tables.iter().filter(|t| {
            self.catalog
                .get(t)
                .map(|schema| schema.column(&column.name).is_some())
                .unwrap_or(false)
        });
        match (owners.next(), owners.next()) {
            (Some(table), None) => Some(table.clone()),
            _ => None,
        }
    }

    /// Literal for a placeholder owned by `column`
    async fn synthesize(
        &mut self,
        column: &ColumnRef,
        table_context: Option<&str>,
        tables: &[String],
    ) -> Result<SqlLiteral> {
        let table = match &column.qualifier {
            Some(qualifier) => self.aliases.resolve(qualifier),
            None => self
                .value_table(&column.name, table_context, tables)
                .ok_or_else(|| BindError::NoTableContext(column.name.clone()))?,
        };

        self.catalog.introspect(self.db, &table).await?;
        let sql_type = self.catalog.column_type(&table, &column.name)?;
        let sample = self.catalog.sample_row(self.db, &table).await?;

        Ok(SqlLiteral::synthesize(
            sql_type,
            sample.get(&column.name).map(String::as_str),
        ))
    }

    /// The current table context when it has the column, otherwise the
    /// first referenced table that does, otherwise the context as is
    fn value_table(&self, column: &str, table_context: Option<&str>, tables: &[String]) -> Option<String> {
        let has_column = |table: &str| {
            self.catalog
                .get(table)
                .map(|schema| schema.column(column).is_some())
                .unwrap_or(false)
        };

        table_context
            .filter(|t| has_column(t))
            .map(str::to_string)
            .or_else(|| tables.iter().find(|t| has_column(t)).cloned())
            .or_else(|| table_context.map(str::to_string))
            .or_else(|| tables.first().cloned())
    }
}

fn literal_expr(literal: &SqlLiteral) -> Expr {
    let value = if literal.sql_type == SqlType::Bit {
        Value::SingleQuotedByteStringLiteral(literal.raw.clone())
    } else if literal.sql_type.needs_quotes() {
        Value::SingleQuotedString(literal.raw.clone())
    } else if literal.sql_type.is_boolean() {
        Value::Boolean(literal.raw == "true")
    } else {
        Value::Number(literal.raw.clone(), false)
    };
    Expr::Value(value)
}
