// ============================================================================
// Suggestion Engine
// ============================================================================
//
// Derives primary-key and index candidates for one table from the
// accumulated usage and the catalogued schema. Runs once, after every
// statement of the run has been processed.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::catalog::TableSchema;
use crate::usage::UsageTracker;

/// Filtered, never-mutated columns compared against the declared primary key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryKeySuggestion {
    pub table: String,
    pub candidate: BTreeSet<String>,
    pub existing: BTreeSet<String>,
    pub matches_existing: bool,
}

impl PrimaryKeySuggestion {
    pub fn verdict(&self) -> &'static str {
        if self.matches_existing {
            "Yes"
        } else {
            "No"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSuggestion {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    /// 1-based position among the table's suggestions
    pub rank: usize,
    /// How many usage sources produced this column list before trimming
    pub occurrences: usize,
    /// False when the single remaining column is itself updated
    pub hot_safe: bool,
}

/// Compare filtered columns minus updated columns with the declared key.
///
/// `None` when the table is never filtered on.
pub fn suggest_primary_key(schema: &TableSchema, usage: &UsageTracker) -> Option<PrimaryKeySuggestion> {
    let table = schema.name.as_str();
    let candidate: BTreeSet<String> = usage
        .filtered_columns(table)
        .into_iter()
        .filter(|column| !usage.is_set(table, column))
        .collect();
    if candidate.is_empty() {
        return None;
    }

    let existing: BTreeSet<String> = schema.primary_key.iter().cloned().collect();

    Some(PrimaryKeySuggestion {
        table: table.to_string(),
        matches_existing: candidate == existing,
        candidate,
        existing,
    })
}

/// `idx_<table>_<col1>_<col2>...`
pub fn index_name(table: &str, columns: &[String]) -> String {
    format!("idx_{}_{}", table, columns.join("_"))
}

/// Candidate column lists in discovery order: WHERE lists per query id,
/// then ON columns, then imported foreign-key columns
fn candidate_pool(schema: &TableSchema, usage: &UsageTracker) -> Vec<Vec<String>> {
    let table = schema.name.as_str();
    let mut pool: Vec<Vec<String>> = Vec::new();

    if let Some(lists) = usage.where_usage(table) {
        pool.extend(lists.values().filter(|l| !l.is_empty()).cloned());
    }
    if let Some(on) = usage.on_usage(table) {
        pool.extend(on.values().flatten().map(|c| vec![c.clone()]));
    }
    pool.extend(schema.imported_keys.iter().map(|fk| vec![fk.fk_column.clone()]));

    pool
}

pub fn suggest_indexes(schema: &TableSchema, usage: &UsageTracker) -> Vec<IndexSuggestion> {
    let table = schema.name.as_str();
    let pool = candidate_pool(schema, usage);

    // Dedupe while counting, keeping first-discovery order
    let mut candidates: Vec<(Vec<String>, usize)> = Vec::new();
    for list in pool {
        match candidates.iter_mut().find(|(existing, _)| *existing == list) {
            Some((_, count)) => *count += 1,
            None => candidates.push((list, 1)),
        }
    }

    // Stable: ties keep discovery order
    candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut taken: Vec<Vec<String>> = schema.indexes.values().cloned().collect();
    if !schema.primary_key.is_empty() {
        taken.push(schema.primary_key.clone());
    }

    let mut suggestions = Vec::new();
    for (columns, occurrences) in candidates {
        if columns.len() > 1 && columns.iter().all(|c| usage.is_set(table, c)) {
            continue;
        }

        let trimmed: Vec<String> = columns
            .iter()
            .enumerate()
            .filter(|(i, c)| *i == 0 || !usage.is_set(table, c))
            .map(|(_, c)| c.clone())
            .collect();

        if trimmed.is_empty() || taken.contains(&trimmed) {
            continue;
        }

        let hot_safe = !(trimmed.len() == 1 && usage.is_set(table, &trimmed[0]));
        suggestions.push(IndexSuggestion {
            table: table.to_string(),
            name: index_name(table, &trimmed),
            rank: suggestions.len() + 1,
            occurrences,
            hot_safe,
            columns: trimmed.clone(),
        });
        taken.push(trimmed);
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::database::{MemoryDatabase, MemoryTable};
    use crate::types::SqlType;
    use pretty_assertions::assert_eq;

    async fn orders_schema() -> TableSchema {
        let db = MemoryDatabase::new()
            .with_table(
                MemoryTable::new("customers")
                    .column("id", SqlType::Integer)
                    .primary_key(&["id"]),
            )
            .with_table(
                MemoryTable::new("orders")
                    .column("id", SqlType::Integer)
                    .column("customer_id", SqlType::Integer)
                    .column("status", SqlType::Varchar)
                    .column("total", SqlType::Numeric)
                    .primary_key(&["id"])
                    .foreign_key("orders_customer_fk", "customer_id", "customers", "id"),
            );
        let mut catalog = SchemaCatalog::new();
        catalog.introspect(&db, "orders").await.unwrap().clone()
    }

    #[tokio::test]
    async fn test_primary_key_match() {
        let schema = orders_schema().await;
        let mut usage = UsageTracker::new();
        usage.record_where("orders", "q1", "id");

        let pk = suggest_primary_key(&schema, &usage).unwrap();
        assert!(pk.matches_existing);
        assert_eq!(pk.verdict(), "Yes");

        usage.record_where("orders", "q2", "status");
        usage.record_set("orders", "total");
        usage.record_where("orders", "q3", "total");
        let pk = suggest_primary_key(&schema, &usage).unwrap();
        assert_eq!(pk.candidate.into_iter().collect::<Vec<_>>(), vec!["id", "status"]);
        assert!(!pk.matches_existing);
    }

    #[tokio::test]
    async fn test_unfiltered_table_has_no_pk_suggestion() {
        let schema = orders_schema().await;
        assert!(suggest_primary_key(&schema, &UsageTracker::new()).is_none());
    }

    #[tokio::test]
    async fn test_mutated_filter_columns_give_no_pk_suggestion() {
        let db = MemoryDatabase::new().with_table(
            MemoryTable::new("logs").column("status", SqlType::Varchar),
        );
        let mut catalog = SchemaCatalog::new();
        let schema = catalog.introspect(&db, "logs").await.unwrap().clone();

        let mut usage = UsageTracker::new();
        usage.record_where("logs", "query.select.001", "status");
        usage.record_set("logs", "status");

        assert!(suggest_primary_key(&schema, &usage).is_none());
    }

    #[tokio::test]
    async fn test_ranking_and_foreign_key_candidates() {
        let schema = orders_schema().await;
        let mut usage = UsageTracker::new();
        usage.record_where("orders", "q1", "customer_id");
        usage.record_where("orders", "q1", "status");
        usage.record_where("orders", "q2", "status");
        usage.record_where("orders", "q3", "status");
        usage.record_where("orders", "q4", "id");

        let suggestions = suggest_indexes(&schema, &usage);
        let columns: Vec<_> = suggestions.iter().map(|s| s.columns.clone()).collect();
        assert_eq!(
            columns,
            vec![
                vec!["status".to_string(), "customer_id".to_string()],
                vec!["status".to_string()],
                vec!["customer_id".to_string()],
            ]
        );
        assert_eq!(suggestions[0].name, "idx_orders_status_customer_id");
        assert_eq!(suggestions[1].occurrences, 2);
        assert_eq!(suggestions[2].rank, 3);
    }

    #[tokio::test]
    async fn test_mutated_columns_trimmed_or_dropped() {
        let schema = orders_schema().await;
        let mut usage = UsageTracker::new();
        usage.record_set("orders", "total");
        usage.record_set("orders", "status");
        // WHERE lists are prepended: q1 becomes [customer_id, total]
        usage.record_where("orders", "q1", "total");
        usage.record_where("orders", "q1", "customer_id");
        // q2 becomes [status, total], entirely mutated
        usage.record_where("orders", "q2", "total");
        usage.record_where("orders", "q2", "status");
        usage.record_where("orders", "q3", "total");

        let suggestions = suggest_indexes(&schema, &usage);
        let columns: Vec<_> = suggestions.iter().map(|s| s.columns.clone()).collect();
        assert_eq!(columns, vec![vec!["customer_id".to_string()], vec!["total".to_string()]]);
        assert!(suggestions[0].hot_safe);
        assert!(!suggestions[1].hot_safe);
    }

    #[tokio::test]
    async fn test_existing_index_not_suggested() {
        let schema = orders_schema().await;
        let mut usage = UsageTracker::new();
        usage.record_where("orders", "q1", "id");
        usage.record_on("orders", "q2", "id");

        assert!(suggest_indexes(&schema, &usage)
            .iter()
            .all(|s| s.columns != vec!["id".to_string()]));
    }
}
