use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Database, SampleValues};
use crate::catalog::ForeignKey;
use crate::types::SqlType;

/// Table fixture for [`MemoryDatabase`]
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    name: String,
    columns: Vec<(String, SqlType)>,
    primary_key: Vec<String>,
    indexes: Vec<(String, Vec<String>)>,
    imported: Vec<ForeignKey>,
    sample: Option<BTreeMap<String, Option<String>>>,
    table_size: String,
    index_size: String,
}

impl MemoryTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            table_size: "8192 bytes".to_string(),
            index_size: "16 kB".to_string(),
            ..Default::default()
        }
    }

    pub fn column(mut self, name: &str, sql_type: SqlType) -> Self {
        self.columns.push((name.to_lowercase(), sql_type));
        self
    }

    /// Declare the primary key; also registers the backing `<table>_pkey` index
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_lowercase()).collect();
        let pkey = format!("{}_pkey", self.name);
        self.index(&pkey, columns)
    }

    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push((
            name.to_lowercase(),
            columns.iter().map(|c| c.to_lowercase()).collect(),
        ));
        self
    }

    /// Declare a single-column foreign key from this table to `pk_table.pk_column`
    pub fn foreign_key(mut self, name: &str, column: &str, pk_table: &str, pk_column: &str) -> Self {
        self.imported.push(ForeignKey {
            name: name.to_lowercase(),
            fk_table: self.name.clone(),
            fk_column: column.to_lowercase(),
            pk_table: pk_table.to_lowercase(),
            pk_column: pk_column.to_lowercase(),
        });
        self
    }

    /// First stored row; columns left out read as NULL
    pub fn sample(mut self, values: &[(&str, Option<&str>)]) -> Self {
        self.sample = Some(
            values
                .iter()
                .map(|(c, v)| (c.to_lowercase(), v.map(str::to_string)))
                .collect(),
        );
        self
    }

    pub fn sizes(mut self, table_size: &str, index_size: &str) -> Self {
        self.table_size = table_size.to_string();
        self.index_size = index_size.to_string();
        self
    }
}

#[derive(Debug, Default)]
struct CallLog {
    metadata_calls: BTreeMap<String, usize>,
    sample_calls: BTreeMap<String, usize>,
    executed: Vec<String>,
    rollbacks: usize,
    analyze_calls: usize,
}

/// In-memory [`Database`] serving fixtures.
///
/// Every statement handed to `execute_rolled_back` is logged and counted as
/// rolled back. Plan output is canned: `EXPLAIN (VERBOSE)` gets the plan
/// lines only, analyzing modes also get timing lines.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: BTreeMap<String, MemoryTable>,
    plan_lines: Vec<String>,
    planning_ms: f64,
    execution_ms: f64,
    failing: Vec<String>,
    log: Mutex<CallLog>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            plan_lines: vec![
                "Seq Scan on public.fixture  (cost=0.00..1.01 rows=1 width=4)".to_string(),
            ],
            planning_ms: 0.05,
            execution_ms: 0.02,
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn with_plan(mut self, lines: &[&str], planning_ms: f64, execution_ms: f64) -> Self {
        self.plan_lines = lines.iter().map(|l| l.to_string()).collect();
        self.planning_ms = planning_ms;
        self.execution_ms = execution_ms;
        self
    }

    /// Make every executed statement containing `fragment` fail
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    /// Number of column-metadata lookups issued for `table`
    pub fn metadata_calls(&self, table: &str) -> usize {
        self.log().metadata_calls.get(table).copied().unwrap_or(0)
    }

    pub fn sample_calls(&self, table: &str) -> usize {
        self.log().sample_calls.get(table).copied().unwrap_or(0)
    }

    /// Statements passed to `execute_rolled_back`, in order
    pub fn executed(&self) -> Vec<String> {
        self.log().executed.clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.log().rollbacks
    }

    pub fn analyze_calls(&self) -> usize {
        self.log().analyze_calls
    }

    fn log(&self) -> MutexGuard<'_, CallLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn table(&self, table: &str) -> Option<&MemoryTable> {
        self.tables.get(table)
    }
}

impl Database for MemoryDatabase {
    async fn columns(&self, table: &str) -> Result<Vec<(String, SqlType)>, sqlx::Error> {
        *self.log().metadata_calls.entry(table.to_string()).or_insert(0) += 1;
        Ok(self.table(table).map(|t| t.columns.clone()).unwrap_or_default())
    }

    async fn indexes(&self, table: &str) -> Result<Vec<(String, String)>, sqlx::Error> {
        let mut pairs = Vec::new();
        if let Some(t) = self.table(table) {
            let mut indexes = t.indexes.clone();
            indexes.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, columns) in indexes {
                for column in columns {
                    pairs.push((name.clone(), column));
                }
            }
        }
        Ok(pairs)
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        Ok(self.table(table).map(|t| t.primary_key.clone()).unwrap_or_default())
    }

    async fn exported_keys(&self, table: &str) -> Result<Vec<ForeignKey>, sqlx::Error> {
        let mut keys: Vec<ForeignKey> = self
            .tables
            .values()
            .flat_map(|t| t.imported.iter())
            .filter(|fk| fk.pk_table == table)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn imported_keys(&self, table: &str) -> Result<Vec<ForeignKey>, sqlx::Error> {
        let mut keys = self.table(table).map(|t| t.imported.clone()).unwrap_or_default();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn sample_row(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Option<SampleValues>, sqlx::Error> {
        *self.log().sample_calls.entry(table.to_string()).or_insert(0) += 1;

        let sample = match self.table(table).and_then(|t| t.sample.as_ref()) {
            Some(sample) => sample,
            None => return Ok(None),
        };

        Ok(Some(
            columns
                .iter()
                .map(|c| (c.clone(), sample.get(c).cloned().flatten()))
                .collect(),
        ))
    }

    async fn execute_rolled_back(&self, sql: &str) -> Result<Vec<String>, sqlx::Error> {
        let mut log = self.log();
        log.executed.push(sql.to_string());
        log.rollbacks += 1;

        if self.failing.iter().any(|fragment| sql.contains(fragment)) {
            return Err(sqlx::Error::Protocol(format!("statement rejected: {}", sql)));
        }

        let mut lines = self.plan_lines.clone();
        if sql.trim_start().to_uppercase().starts_with("EXPLAIN (ANALYZE") {
            lines.push(format!("Planning Time: {:.3} ms", self.planning_ms));
            lines.push(format!("Execution Time: {:.3} ms", self.execution_ms));
        }
        Ok(lines)
    }

    async fn table_size(&self, table: &str) -> Result<String, sqlx::Error> {
        self.table(table)
            .map(|t| t.table_size.clone())
            .ok_or(sqlx::Error::RowNotFound)
    }

    async fn index_size(&self, table: &str) -> Result<String, sqlx::Error> {
        self.table(table)
            .map(|t| t.index_size.clone())
            .ok_or(sqlx::Error::RowNotFound)
    }

    async fn analyze(&self) -> Result<(), sqlx::Error> {
        self.log().analyze_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> MemoryDatabase {
        MemoryDatabase::new()
            .with_table(
                MemoryTable::new("customers")
                    .column("id", SqlType::Integer)
                    .column("name", SqlType::Varchar)
                    .primary_key(&["id"]),
            )
            .with_table(
                MemoryTable::new("orders")
                    .column("id", SqlType::Integer)
                    .column("customer_id", SqlType::Integer)
                    .primary_key(&["id"])
                    .foreign_key("orders_customer_fk", "customer_id", "customers", "id")
                    .sample(&[("id", Some("7")), ("customer_id", None)]),
            )
    }

    #[test]
    fn test_exported_keys_derived_from_imports() {
        let db = fixture();
        let exported = tokio_test::block_on(db.exported_keys("customers")).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].fk_table, "orders");
        assert!(tokio_test::block_on(db.exported_keys("orders")).unwrap().is_empty());
    }

    #[test]
    fn test_sample_row_reports_nulls() {
        let db = fixture();
        let columns = vec!["id".to_string(), "customer_id".to_string()];
        let row = tokio_test::block_on(db.sample_row("orders", &columns)).unwrap().unwrap();
        assert_eq!(row[0], ("id".to_string(), Some("7".to_string())));
        assert_eq!(row[1], ("customer_id".to_string(), None));
        assert_eq!(db.sample_calls("orders"), 1);
        assert!(tokio_test::block_on(db.sample_row("customers", &columns)).unwrap().is_none());
    }

    #[test]
    fn test_execute_counts_rollbacks() {
        let db = fixture().failing_on("boom");
        let lines = tokio_test::block_on(db.execute_rolled_back("EXPLAIN (ANALYZE, VERBOSE, BUFFERS ON) SELECT 1")).unwrap();
        assert!(lines.iter().any(|l| l.starts_with("Planning Time:")));
        let lines = tokio_test::block_on(db.execute_rolled_back("EXPLAIN (VERBOSE) SELECT 1")).unwrap();
        assert!(lines.iter().all(|l| !l.contains("Time:")));
        assert!(tokio_test::block_on(db.execute_rolled_back("SELECT boom")).is_err());
        assert_eq!(db.rollbacks(), 3);
        assert_eq!(db.executed().len(), 3);
    }
}
