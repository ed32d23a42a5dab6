// ============================================================================
// Schema Catalog
// ============================================================================
//
// Lazily introspected, run-scoped cache of table metadata. A table is loaded
// from the database the first time any statement references it and is never
// reloaded for the rest of the run. Sample rows are fetched the first time a
// placeholder needs a value for a column of that table.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::database::Database;
use crate::error::SchemaError;
use crate::types::SqlType;

/// One column pair of a foreign-key constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    /// Referencing table
    pub fk_table: String,
    pub fk_column: String,
    /// Referenced table
    pub pk_table: String,
    pub pk_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
}

/// Metadata for a single table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    /// Index name to ordered key columns
    pub indexes: BTreeMap<String, Vec<String>>,
    /// Foreign keys in other tables pointing at this one
    pub exported_keys: Vec<ForeignKey>,
    /// Foreign keys declared on this table
    pub imported_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_type(&self, name: &str) -> Option<SqlType> {
        self.column(name).map(|c| c.sql_type)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_foreign_keys(&self) -> bool {
        !self.exported_keys.is_empty() || !self.imported_keys.is_empty()
    }
}

/// Sampled values keyed by column; NULL columns are absent
pub type SampleRow = BTreeMap<String, String>;

/// Run-scoped table metadata cache
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
    samples: BTreeMap<String, SampleRow>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load metadata for `table` unless it is already cached.
    ///
    /// Fails with `TableNotFound` when the database reports no columns.
    pub async fn introspect<D: Database>(
        &mut self,
        db: &D,
        table: &str,
    ) -> Result<&TableSchema, SchemaError> {
        let name = table.to_lowercase();

        if !self.tables.contains_key(&name) {
            let schema = load_table(db, &name).await?;
            debug!(
                "Catalogued table {}: {} columns, {} indexes",
                name,
                schema.columns.len(),
                schema.indexes.len()
            );
            self.tables.insert(name.clone(), schema);
        }

        self.tables
            .get(&name)
            .ok_or(SchemaError::TableNotFound(name))
    }

    /// First row of `table`, fetched once per run. An empty table yields an
    /// empty sample so literal synthesis falls back to type defaults.
    pub async fn sample_row<D: Database>(
        &mut self,
        db: &D,
        table: &str,
    ) -> Result<&SampleRow, SchemaError> {
        let name = table.to_lowercase();

        if !self.samples.contains_key(&name) {
            let columns = self.introspect(db, &name).await?.column_names();
            let values = db
                .sample_row(&name, &columns)
                .await
                .map_err(|source| SchemaError::Metadata {
                    table: name.clone(),
                    source,
                })?;

            let sample: SampleRow = values
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(column, value)| value.map(|v| (column, v)))
                .collect();
            self.samples.insert(name.clone(), sample);
        }

        self.samples
            .get(&name)
            .ok_or(SchemaError::TableNotFound(name))
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Catalogued tables in name order
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Type of `table.column`, requiring both to be catalogued
    pub fn column_type(&self, table: &str, column: &str) -> Result<SqlType, SchemaError> {
        let schema = self
            .tables
            .get(table)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;

        schema
            .column_type(column)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}

async fn load_table<D: Database>(db: &D, name: &str) -> Result<TableSchema, SchemaError> {
    let metadata = |source| SchemaError::Metadata {
        table: name.to_string(),
        source,
    };

    let columns = db.columns(name).await.map_err(metadata)?;
    if columns.is_empty() {
        return Err(SchemaError::TableNotFound(name.to_string()));
    }

    let primary_key = db.primary_key(name).await.map_err(metadata)?;

    let mut indexes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (index_name, column) in db.indexes(name).await.map_err(metadata)? {
        indexes.entry(index_name).or_default().push(column);
    }

    let exported_keys = db.exported_keys(name).await.map_err(metadata)?;
    let imported_keys = db.imported_keys(name).await.map_err(metadata)?;

    Ok(TableSchema {
        name: name.to_string(),
        columns: columns
            .into_iter()
            .map(|(name, sql_type)| Column { name, sql_type })
            .collect(),
        primary_key,
        indexes,
        exported_keys,
        imported_keys,
    })
}
