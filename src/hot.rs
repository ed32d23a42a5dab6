//! Heap-only-tuple (HOT) classification
//!
//! PostgreSQL can only perform a HOT update when no indexed column changes.
//! Columns that are both assigned by UPDATE and covered by an index are
//! flagged, and so is every index containing such a column.

use serde::Serialize;

use crate::catalog::TableSchema;
use crate::usage::UsageTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HotStatus {
    /// Updated and indexed: updates touching it cannot be HOT
    HotRisk,
    /// Updated but not indexed
    MutateOnly,
    Plain,
}

impl HotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HotStatus::HotRisk => "HOT risk",
            HotStatus::MutateOnly => "mutate",
            HotStatus::Plain => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnHot {
    pub column: String,
    pub indexed: bool,
    pub status: HotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexHot {
    pub name: String,
    pub columns: Vec<String>,
    pub blocks_hot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotReport {
    pub table: String,
    pub columns: Vec<ColumnHot>,
    pub indexes: Vec<IndexHot>,
}

impl HotReport {
    pub fn risky_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.status == HotStatus::HotRisk)
            .map(|c| c.column.as_str())
    }
}

pub fn classify(schema: &TableSchema, usage: &UsageTracker) -> HotReport {
    let table = schema.name.as_str();

    let columns = schema
        .columns
        .iter()
        .map(|column| {
            let indexed = schema
                .indexes
                .values()
                .any(|cols| cols.iter().any(|c| *c == column.name));
            let updated = usage.is_set(table, &column.name);

            let status = match (updated, indexed) {
                (true, true) => HotStatus::HotRisk,
                (true, false) => HotStatus::MutateOnly,
                _ => HotStatus::Plain,
            };

            ColumnHot {
                column: column.name.clone(),
                indexed,
                status,
            }
        })
        .collect();

    let indexes = schema
        .indexes
        .iter()
        .map(|(name, cols)| IndexHot {
            name: name.clone(),
            columns: cols.clone(),
            blocks_hot: cols.iter().any(|c| usage.is_set(table, c)),
        })
        .collect();

    HotReport {
        table: table.to_string(),
        columns,
        indexes,
    }
}
