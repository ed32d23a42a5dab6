// ============================================================================
// Usage Tracker
// ============================================================================
//
// Run-wide record of how every catalogued table is used: which columns are
// compared in joins, filtered in WHERE clauses, or assigned by UPDATE, and
// which query ids touch the table per statement kind.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::classifier::StatementKind;

type PerQuery<T> = BTreeMap<String, T>;

#[derive(Debug, Default, Clone, Serialize)]
pub struct UsageTracker {
    on: BTreeMap<String, PerQuery<BTreeSet<String>>>,
    #[serde(rename = "where")]
    where_: BTreeMap<String, PerQuery<Vec<String>>>,
    set: BTreeMap<String, BTreeSet<String>>,
    kinds: BTreeMap<StatementKind, BTreeMap<String, BTreeSet<String>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_on(&mut self, table: &str, query_id: &str, column: &str) {
        self.on
            .entry(table.to_string())
            .or_default()
            .entry(query_id.to_string())
            .or_default()
            .insert(column.to_string());
    }

    /// Columns are prepended, so the list ends up in reverse visitation
    /// order; a column already in the list keeps its place
    pub fn record_where(&mut self, table: &str, query_id: &str, column: &str) {
        let columns = self
            .where_
            .entry(table.to_string())
            .or_default()
            .entry(query_id.to_string())
            .or_default();

        if !columns.iter().any(|c| c == column) {
            columns.insert(0, column.to_string());
        }
    }

    pub fn record_set(&mut self, table: &str, column: &str) {
        self.set
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    pub fn record_kind(&mut self, kind: StatementKind, table: &str, query_id: &str) {
        self.kinds
            .entry(kind)
            .or_default()
            .entry(table.to_string())
            .or_default()
            .insert(query_id.to_string());
    }

    /// Join-predicate columns per query id
    pub fn on_usage(&self, table: &str) -> Option<&PerQuery<BTreeSet<String>>> {
        self.on.get(table)
    }

    /// WHERE-column lists per query id
    pub fn where_usage(&self, table: &str) -> Option<&PerQuery<Vec<String>>> {
        self.where_.get(table)
    }

    pub fn set_usage(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.set.get(table)
    }

    pub fn is_set(&self, table: &str, column: &str) -> bool {
        self.set
            .get(table)
            .map(|columns| columns.contains(column))
            .unwrap_or(false)
    }

    /// Query ids of the given kind touching `table`
    pub fn queries(&self, kind: StatementKind, table: &str) -> Option<&BTreeSet<String>> {
        self.kinds.get(&kind).and_then(|tables| tables.get(table))
    }

    /// Every query id per kind for `table`
    pub fn queries_by_kind(&self, table: &str) -> BTreeMap<StatementKind, BTreeSet<String>> {
        self.kinds
            .iter()
            .filter_map(|(kind, tables)| tables.get(table).map(|ids| (*kind, ids.clone())))
            .collect()
    }

    /// Union of ON and WHERE columns across all query ids
    pub fn filtered_columns(&self, table: &str) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        if let Some(on) = self.on.get(table) {
            columns.extend(on.values().flatten().cloned());
        }
        if let Some(where_) = self.where_.get(table) {
            columns.extend(where_.values().flatten().cloned());
        }
        columns
    }
}
