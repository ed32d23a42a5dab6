//! Deparse-order walk over a statement tree
//!
//! The walk is pure: it reports the tables it passed, the column usages it
//! saw and, for every placeholder, the column (or row-count slot) that owns
//! it. Nothing is resolved against the catalog here.

use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_relations, AssignmentTarget, Expr, FromTable, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Join, JoinConstraint, JoinOperator, ObjectName, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Value,
};

use crate::classifier::base_name;

/// Column reference as written, qualifier lowercased
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(qualifier: Option<&str>, name: &str) -> Self {
        Self {
            qualifier: qualifier.map(str::to_lowercase),
            name: name.to_lowercase(),
        }
    }
}

/// Syntactic position a column was seen in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Projection,
    Where,
    /// Assignment target of an UPDATE
    Set,
    /// Right-hand side of an UPDATE assignment
    Value,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageRecord {
    Column { clause: Clause, column: ColumnRef },
    /// Left operand of `IN (...)`
    InExpression { clause: Clause, column: ColumnRef },
    /// Column inside a join's ON condition
    JoinPredicate { column: ColumnRef },
}

/// Table factor met during the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamOwner {
    Column {
        column: ColumnRef,
        /// Table of the most recent FROM/JOIN factor at the time of the visit
        table_context: Option<String>,
    },
    RowCount,
    RowOffset,
}

/// One placeholder occurrence and the slot that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSite {
    pub placeholder: String,
    pub owner: Option<ParamOwner>,
}

#[derive(Debug, Default, Clone)]
pub struct StatementWalk {
    pub tables: Vec<TableRef>,
    /// Tables written to by UPDATE, DELETE or INSERT
    pub targets: Vec<String>,
    pub usages: Vec<UsageRecord>,
    pub params: Vec<ParamSite>,
    /// Top-level query carries a LIMIT clause
    pub has_limit: bool,
}

impl StatementWalk {
    /// Columns assigned by an UPDATE
    pub fn set_columns(&self) -> impl Iterator<Item = &ColumnRef> {
        self.usages.iter().filter_map(|u| match u {
            UsageRecord::Column {
                clause: Clause::Set,
                column,
            } => Some(column),
            _ => None,
        })
    }
}

/// Walk a statement in deparse order
pub fn walk(statement: &Statement) -> StatementWalk {
    let mut walker = Walker::default();

    match statement {
        Statement::Query(query) => walker.query(query, true),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            walker.table_with_joins(table);
            walker.out.targets = walker.out.tables.iter().map(|t| t.name.clone()).collect();

            for assignment in assignments {
                let targets: Vec<&ObjectName> = match &assignment.target {
                    AssignmentTarget::ColumnName(name) => vec![name],
                    AssignmentTarget::Tuple(names) => names.iter().collect(),
                };
                let mut owner = None;
                for target in targets {
                    let column = object_column(target);
                    walker.record(Clause::Set, column.clone());
                    owner = Some(column);
                }
                walker.current_column = owner;
                walker.expr(&assignment.value, Clause::Value);
            }

            if let Some(selection) = selection {
                walker.expr(selection, Clause::Where);
            }
        }
        Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            for table in from {
                walker.table_with_joins(table);
            }
            walker.out.targets = walker.out.tables.iter().map(|t| t.name.clone()).collect();

            if let Some(selection) = &delete.selection {
                walker.expr(selection, Clause::Where);
            }
        }
        Statement::Insert(_) => {
            // The insert target is the first relation in field order
            let _ = visit_relations(statement, |relation| {
                walker.out.targets.push(base_name(relation));
                ControlFlow::<()>::Break(())
            });
        }
        _ => {}
    }

    walker.out
}

fn object_column(name: &ObjectName) -> ColumnRef {
    let idents = &name.0;
    let column = idents.last().map(|i| i.value.as_str()).unwrap_or_default();
    let qualifier = idents
        .len()
        .checked_sub(2)
        .map(|i| idents[i].value.as_str());
    ColumnRef::new(qualifier, column)
}

#[derive(Default)]
struct Walker {
    out: StatementWalk,
    current_column: Option<ColumnRef>,
    current_table: Option<String>,
}

impl Walker {
    fn record(&mut self, clause: Clause, column: ColumnRef) {
        self.out.usages.push(UsageRecord::Column { clause, column });
    }

    fn query(&mut self, query: &Query, top_level: bool) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.query(&cte.query, false);
            }
        }

        self.set_expr(&query.body);

        if let Some(order_by) = &query.order_by {
            for item in &order_by.exprs {
                self.expr(&item.expr, Clause::Other);
            }
        }

        // A top-level row count is rewritten to 1 by the binder; its
        // placeholder keeps its slot so parameters follow source order
        if let Some(limit) = &query.limit {
            self.out.has_limit |= top_level;
            self.row_slot(limit, ParamOwner::RowCount);
        }

        if let Some(offset) = &query.offset {
            self.row_slot(&offset.value, ParamOwner::RowOffset);
        }

        if let Some(fetch) = &query.fetch {
            self.out.has_limit |= top_level;
            if let Some(quantity) = &fetch.quantity {
                self.row_slot(quantity, ParamOwner::RowCount);
            }
        }
    }

    fn row_slot(&mut self, expr: &Expr, owner: ParamOwner) {
        match expr {
            Expr::Value(Value::Placeholder(p)) => self.out.params.push(ParamSite {
                placeholder: p.clone(),
                owner: Some(owner),
            }),
            other => self.expr(other, Clause::Other),
        }
    }

    fn set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.select(select),
            SetExpr::Query(query) => self.query(query, false),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left);
                self.set_expr(right);
            }
            SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.expr(expr, Clause::Value);
                    }
                }
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &Select) {
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.expr(expr, Clause::Projection)
                }
                _ => {}
            }
        }

        for table in &select.from {
            self.table_with_joins(table);
        }

        if let Some(selection) = &select.selection {
            self.expr(selection, Clause::Where);
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.expr(expr, Clause::Other);
            }
        }

        if let Some(having) = &select.having {
            self.expr(having, Clause::Other);
        }
    }

    fn table_with_joins(&mut self, table: &TableWithJoins) {
        self.table_factor(&table.relation);
        for join in &table.joins {
            self.join(join);
        }
    }

    fn join(&mut self, join: &Join) {
        self.table_factor(&join.relation);

        let constraint = match &join.join_operator {
            JoinOperator::Inner(c)
            | JoinOperator::LeftOuter(c)
            | JoinOperator::RightOuter(c)
            | JoinOperator::FullOuter(c) => c,
            _ => return,
        };

        if let JoinConstraint::On(expr) = constraint {
            self.join_condition(expr);
        }
    }

    /// ON conditions record every column as a join predicate
    fn join_condition(&mut self, expr: &Expr) {
        let before = self.out.usages.len();
        self.expr(expr, Clause::Other);

        for usage in self.out.usages.iter_mut().skip(before) {
            let column = match usage {
                UsageRecord::Column { column, .. } | UsageRecord::InExpression { column, .. } => {
                    column.clone()
                }
                UsageRecord::JoinPredicate { .. } => continue,
            };
            *usage = UsageRecord::JoinPredicate { column };
        }
    }

    fn table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = base_name(name);
                self.out.tables.push(TableRef {
                    name: table.clone(),
                    alias: alias.as_ref().map(|a| a.name.value.to_lowercase()),
                });
                self.current_table = Some(table);
            }
            TableFactor::Derived { subquery, .. } => self.query(subquery, false),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins),
            _ => {}
        }
    }

    fn column(&mut self, clause: Clause, column: ColumnRef) {
        self.current_column = Some(column.clone());
        self.record(clause, column);
    }

    fn expr(&mut self, expr: &Expr, clause: Clause) {
        match expr {
            Expr::Identifier(ident) => self.column(clause, ColumnRef::new(None, &ident.value)),
            Expr::CompoundIdentifier(idents) => {
                let name = idents.last().map(|i| i.value.as_str()).unwrap_or_default();
                let qualifier = idents
                    .len()
                    .checked_sub(2)
                    .map(|i| idents[i].value.as_str());
                self.column(clause, ColumnRef::new(qualifier, name));
            }
            Expr::Value(Value::Placeholder(p)) => {
                let owner = self.current_column.clone().map(|column| ParamOwner::Column {
                    column,
                    table_context: self.current_table.clone(),
                });
                self.out.params.push(ParamSite {
                    placeholder: p.clone(),
                    owner,
                });
            }
            Expr::BinaryOp { left, right, .. } => {
                self.expr(left, clause);
                self.expr(right, clause);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsFalse(expr)
            | Expr::Cast { expr, .. } => self.expr(expr, clause),
            Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
                self.expr(left, clause);
                self.expr(right, clause);
            }
            Expr::InList { expr, list, .. } => {
                self.in_operand(expr, clause);
                for item in list {
                    self.expr(item, Clause::Other);
                }
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.in_operand(expr, clause);
                self.query(subquery, false);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr, clause);
                self.expr(low, clause);
                self.expr(high, clause);
            }
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. } => {
                self.expr(expr, clause);
                self.expr(pattern, clause);
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(operand) = operand {
                    self.expr(operand, clause);
                }
                for (condition, result) in conditions.iter().zip(results) {
                    self.expr(condition, clause);
                    self.expr(result, clause);
                }
                if let Some(else_result) = else_result {
                    self.expr(else_result, clause);
                }
            }
            Expr::Function(function) => {
                if let FunctionArguments::List(list) = &function.args {
                    for arg in &list.args {
                        let (FunctionArg::Unnamed(arg) | FunctionArg::Named { arg, .. }) = arg;
                        if let FunctionArgExpr::Expr(expr) = arg {
                            self.expr(expr, clause);
                        }
                    }
                }
            }
            Expr::Tuple(exprs) => {
                for expr in exprs {
                    self.expr(expr, clause);
                }
            }
            Expr::Subquery(query) | Expr::Exists { subquery: query, .. } => {
                self.query(query, false)
            }
            _ => {}
        }
    }

    /// `x IN (...)`: a plain column operand owns the candidate values
    fn in_operand(&mut self, expr: &Expr, clause: Clause) {
        let column = match expr {
            Expr::Identifier(ident) => ColumnRef::new(None, &ident.value),
            Expr::CompoundIdentifier(idents) if idents.len() >= 2 => ColumnRef::new(
                Some(&idents[idents.len() - 2].value),
                &idents[idents.len() - 1].value,
            ),
            other => return self.expr(other, clause),
        };

        self.current_column = Some(column.clone());
        self.out
            .usages
            .push(UsageRecord::InExpression { clause, column });
    }
}
