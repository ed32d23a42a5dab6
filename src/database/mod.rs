// Database Seam
//
// Every call the analysis pipeline makes against a live database goes
// through the `Database` trait. `PgDatabase` talks to PostgreSQL through a
// sqlx pool; `MemoryDatabase` serves fixtures so the pipeline can run
// without a server.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryDatabase, MemoryTable};
#[cfg(feature = "postgres")]
pub use postgres::PgDatabase;

use futures::Future;

use crate::catalog::ForeignKey;
use crate::types::SqlType;

/// One row of a sample fetch: column name and its text rendering (`None` for NULL)
pub type SampleValues = Vec<(String, Option<String>)>;

/// Database operations consumed by the analyzer.
///
/// All names passed in are already lowercase. Implementations return rows
/// in a stable order: columns by ordinal position, index columns by key
/// position, foreign keys by constraint name.
pub trait Database {
    /// Column names and type categories of a table; empty if the table does not exist
    fn columns(&self, table: &str) -> impl Future<Output = Result<Vec<(String, SqlType)>, sqlx::Error>>;

    /// `(index name, column name)` pairs, grouped by index in key order
    fn indexes(&self, table: &str) -> impl Future<Output = Result<Vec<(String, String)>, sqlx::Error>>;

    /// Primary-key columns in key order
    fn primary_key(&self, table: &str) -> impl Future<Output = Result<Vec<String>, sqlx::Error>>;

    /// Foreign keys in other tables that reference this table
    fn exported_keys(&self, table: &str) -> impl Future<Output = Result<Vec<ForeignKey>, sqlx::Error>>;

    /// Foreign keys declared on this table
    fn imported_keys(&self, table: &str) -> impl Future<Output = Result<Vec<ForeignKey>, sqlx::Error>>;

    /// First row of an unconstrained scan, every value rendered as text
    fn sample_row(
        &self,
        table: &str,
        columns: &[String],
    ) -> impl Future<Output = Result<Option<SampleValues>, sqlx::Error>>;

    /// Run a statement inside a transaction that is always rolled back.
    ///
    /// Returns the first column of every result row as text.
    fn execute_rolled_back(&self, sql: &str) -> impl Future<Output = Result<Vec<String>, sqlx::Error>>;

    /// Human-readable on-disk size of a table
    fn table_size(&self, table: &str) -> impl Future<Output = Result<String, sqlx::Error>>;

    /// Human-readable combined size of a table's indexes
    fn index_size(&self, table: &str) -> impl Future<Output = Result<String, sqlx::Error>>;

    /// Refresh planner statistics before a run
    fn analyze(&self) -> impl Future<Output = Result<(), sqlx::Error>>;
}
