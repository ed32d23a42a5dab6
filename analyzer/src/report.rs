//! Report files written after a run
//!
//! `result.csv` (timings), `results.json`, `tables.json`, one `<n>.cli`
//! replay script per eligible query, and CREATE/DROP scripts for the
//! suggested indexes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pg_query_analyzer::{HotStatus, QueryResult, ReplayScript, TableReport, Timing};

/// Quote an identifier for PostgreSQL (double quotes)
fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub struct ReportSink {
    dir: PathBuf,
}

impl ReportSink {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, contents).with_context(|| format!("cannot write {}", path.display()))?;
        log::debug!("Wrote {}", path.display());
        Ok(path)
    }

    pub fn write_timings(&self, timings: &[Timing]) -> Result<PathBuf> {
        self.write("result.csv", &render_timings(timings))
    }

    pub fn write_results(&self, results: &[QueryResult]) -> Result<PathBuf> {
        self.write("results.json", &serde_json::to_string_pretty(results)?)
    }

    pub fn write_tables(&self, reports: &[TableReport]) -> Result<PathBuf> {
        self.write("tables.json", &serde_json::to_string_pretty(reports)?)
    }

    pub fn write_replay_scripts(&self, scripts: &[ReplayScript]) -> Result<usize> {
        for script in scripts {
            self.write(&script.file_name(), &script.contents)?;
        }
        Ok(scripts.len())
    }

    /// `indexes_postgres.sql` and its rollback `drop_indexes_postgres.sql`
    pub fn write_index_scripts(&self, reports: &[TableReport]) -> Result<(PathBuf, PathBuf)> {
        let create = self.write("indexes_postgres.sql", &render_create_indexes(reports))?;
        let drop = self.write("drop_indexes_postgres.sql", &render_drop_indexes(reports))?;
        Ok((create, drop))
    }
}

pub fn render_timings(timings: &[Timing]) -> String {
    let mut csv = String::new();
    for timing in timings {
        let execution = timing
            .execution_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        csv.push_str(&format!("{},{},{}\n", timing.query_id, timing.planning_ms, execution));
    }
    csv
}

pub fn render_create_indexes(reports: &[TableReport]) -> String {
    let mut sql = String::new();
    sql.push_str("-- Auto-generated by query-analyzer\n");
    sql.push_str("-- Suggested from WHERE, JOIN and foreign-key usage\n\n");
    sql.push_str("BEGIN;\n\n");

    for report in reports {
        for index in &report.indexes {
            let quoted_cols: Vec<String> = index.columns.iter().map(|c| quote_identifier(c)).collect();

            sql.push_str(&format!("-- Rank {} on {}, seen {} time(s)\n", index.rank, index.table, index.occurrences));
            if !index.hot_safe {
                sql.push_str("-- Warning: column is updated, index blocks HOT updates\n");
            }
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});\n\n",
                index.name,
                quote_identifier(&index.table),
                quoted_cols.join(", ")
            ));
        }
    }

    sql.push_str("COMMIT;\n");
    sql
}

pub fn render_drop_indexes(reports: &[TableReport]) -> String {
    let mut sql = String::new();
    sql.push_str("-- Auto-generated rollback script\n\n");
    sql.push_str("BEGIN;\n\n");

    for index in reports.iter().rev().flat_map(|r| r.indexes.iter().rev()) {
        sql.push_str(&format!("DROP INDEX IF EXISTS {};\n\n", index.name));
    }

    sql.push_str("COMMIT;\n");
    sql
}

/// Console summary per table: key check, index suggestions, HOT risks
pub fn print_recommendations(reports: &[TableReport]) {
    println!();
    println!("🔍 ======================================================");
    println!("🔍   Query Analyzer - Recommendations");
    println!("🔍 ======================================================");
    println!();

    for report in reports {
        println!(
            "📊 Table: {} (data {}, indexes {})",
            report.schema.name, report.table_size, report.index_size
        );

        for (kind, ids) in &report.queries {
            println!("   {:<7} {}", kind.as_str(), ids.iter().cloned().collect::<Vec<_>>().join(", "));
        }

        if let Some(pk) = &report.primary_key {
            println!(
                "   🔑 Primary key match: {} (used: {}, declared: {})",
                pk.verdict(),
                pk.candidate.iter().cloned().collect::<Vec<_>>().join(", "),
                pk.existing.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        println!();

        for index in &report.indexes {
            println!("   ✨ Recommended: {}", index.name);
            println!("      Columns: {}", index.columns.join(", "));
            if !index.hot_safe {
                println!("      ⚠️  Updated column: blocks HOT updates");
            }
            println!();
        }

        let risky: Vec<&str> = report
            .hot
            .columns
            .iter()
            .filter(|c| c.status == HotStatus::HotRisk)
            .map(|c| c.column.as_str())
            .collect();
        if !risky.is_empty() {
            println!("   🔥 HOT risk columns: {}", risky.join(", "));
            for index in report.hot.indexes.iter().filter(|i| i.blocks_hot) {
                println!("      blocked by index {} ({})", index.name, index.columns.join(", "));
            }
            println!();
        }
    }

    println!("🔍 ======================================================");
    println!("🔍   End of Recommendations");
    println!("🔍 ======================================================");
    println!();
}
