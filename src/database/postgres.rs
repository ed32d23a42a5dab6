use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Executor, Row as _};

use super::{Database, SampleValues};
use crate::catalog::ForeignKey;
use crate::types::SqlType;

const COLUMNS_QUERY: &str = r#"
    SELECT
        column_name::text AS column_name,
        data_type::text AS data_type,
        udt_name::text AS udt_name
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = $1
    ORDER BY ordinal_position
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        i.relname::text AS index_name,
        a.attname::text AS column_name
    FROM pg_class t
    JOIN pg_index ix ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON t.relnamespace = n.oid
    JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) ON true
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = current_schema() AND t.relname = $1
    ORDER BY i.relname, k.ord
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT a.attname::text AS column_name
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) ON true
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE ix.indisprimary AND n.nspname = current_schema() AND t.relname = $1
    ORDER BY k.ord
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        c.conname::text AS fk_name,
        fk.relname::text AS fk_table,
        fa.attname::text AS fk_column,
        pk.relname::text AS pk_table,
        pa.attname::text AS pk_column
    FROM pg_constraint c
    JOIN pg_class fk ON fk.oid = c.conrelid
    JOIN pg_class pk ON pk.oid = c.confrelid
    JOIN pg_namespace n ON n.oid = c.connamespace
    JOIN LATERAL unnest(c.conkey, c.confkey) AS k(fk_attnum, pk_attnum) ON true
    JOIN pg_attribute fa ON fa.attrelid = c.conrelid AND fa.attnum = k.fk_attnum
    JOIN pg_attribute pa ON pa.attrelid = c.confrelid AND pa.attnum = k.pk_attnum
    WHERE c.contype = 'f' AND n.nspname = current_schema() AND {side}.relname = $1
    ORDER BY c.conname, k.fk_attnum
"#;

/// Quote an identifier for PostgreSQL (double quotes)
fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// PostgreSQL-backed implementation of [`Database`]
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a single connection; the analyzer is strictly sequential
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn connect_with(options: PgConnectOptions) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn foreign_keys(&self, side: &str, table: &str) -> Result<Vec<ForeignKey>, sqlx::Error> {
        let query = FOREIGN_KEYS_QUERY.replace("{side}", side);

        let rows = sqlx::query(&query)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKey {
                    name: row.try_get::<String, _>("fk_name")?.to_lowercase(),
                    fk_table: row.try_get::<String, _>("fk_table")?.to_lowercase(),
                    fk_column: row.try_get::<String, _>("fk_column")?.to_lowercase(),
                    pk_table: row.try_get::<String, _>("pk_table")?.to_lowercase(),
                    pk_column: row.try_get::<String, _>("pk_column")?.to_lowercase(),
                })
            })
            .collect()
    }
}

impl Database for PgDatabase {
    async fn columns(&self, table: &str) -> Result<Vec<(String, SqlType)>, sqlx::Error> {
        let rows = sqlx::query(COLUMNS_QUERY)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let udt_name: String = row.try_get("udt_name")?;

                // USER-DEFINED and ARRAY report the useful name in udt_name
                let sql_type = match SqlType::from_postgres(&data_type) {
                    SqlType::Other => SqlType::from_postgres(&udt_name),
                    known => known,
                };

                Ok((name.to_lowercase(), sql_type))
            })
            .collect()
    }

    async fn indexes(&self, table: &str) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query(INDEXES_QUERY)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let index_name: String = row.try_get("index_name")?;
                let column_name: String = row.try_get("column_name")?;
                Ok((index_name.to_lowercase(), column_name.to_lowercase()))
            })
            .collect()
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(PRIMARY_KEY_QUERY)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("column_name").map(|c| c.to_lowercase()))
            .collect()
    }

    async fn exported_keys(&self, table: &str) -> Result<Vec<ForeignKey>, sqlx::Error> {
        self.foreign_keys("pk", table).await
    }

    async fn imported_keys(&self, table: &str) -> Result<Vec<ForeignKey>, sqlx::Error> {
        self.foreign_keys("fk", table).await
    }

    async fn sample_row(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Option<SampleValues>, sqlx::Error> {
        if columns.is_empty() {
            return Ok(None);
        }

        let projection = columns
            .iter()
            .map(|c| format!("{}::text AS {}", quote_identifier(c), quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!("SELECT {} FROM {} LIMIT 1", projection, quote_identifier(table));

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let mut values = Vec::with_capacity(columns.len());
                for (i, column) in columns.iter().enumerate() {
                    values.push((column.clone(), row.try_get::<Option<String>, _>(i)?));
                }
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }

    async fn execute_rolled_back(&self, sql: &str) -> Result<Vec<String>, sqlx::Error> {
        // Dropping an uncommitted transaction rolls it back, so an early
        // return through `?` leaves nothing behind either
        let mut tx = self.pool.begin().await?;

        let mut lines = Vec::new();
        {
            let mut rows = (&mut *tx).fetch(sql);
            while let Some(row) = rows.try_next().await? {
                lines.push(row.try_get::<String, _>(0)?);
            }
        }

        tx.rollback().await?;

        Ok(lines)
    }

    async fn table_size(&self, table: &str) -> Result<String, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT pg_size_pretty(pg_table_size($1::regclass))")
            .bind(table)
            .fetch_one(&self.pool)
            .await
    }

    async fn index_size(&self, table: &str) -> Result<String, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT pg_size_pretty(pg_indexes_size($1::regclass))")
            .bind(table)
            .fetch_one(&self.pool)
            .await
    }

    async fn analyze(&self) -> Result<(), sqlx::Error> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        Ok(())
    }
}
