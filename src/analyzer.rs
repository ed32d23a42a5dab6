// ============================================================================
// Analyzer
// ============================================================================
//
// Run-scoped context owning the catalog, alias map, usage tracker and
// results. Statements are processed one at a time in query-id order; the
// first failure stops the run.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::binder::{AliasMap, BindOutcome, Binder};
use crate::catalog::{SchemaCatalog, TableSchema};
use crate::classifier::{self, StatementKind};
use crate::config::{AnalyzerConfig, QUERY_PREFIX};
use crate::database::Database;
use crate::error::Result;
use crate::hot::{self, HotReport};
use crate::plan::{ExplainMode, PlanExecutor, PlanOutcome};
use crate::replay::{self, ReplayScript};
use crate::suggest::{self, IndexSuggestion, PrimaryKeySuggestion};
use crate::types::SqlLiteral;
use crate::usage::UsageTracker;

/// Outcome of processing one statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query_id: String,
    pub kind: StatementKind,
    pub original: String,
    /// Statement as executed; `None` when binding was unsupported
    pub rewritten: Option<String>,
    pub used_tables: Vec<String>,
    pub plan: Option<PlanOutcome>,
    /// Bound parameters in visitation order
    pub params: Vec<SqlLiteral>,
    pub unsupported: Option<String>,
}

impl QueryResult {
    pub fn planning_ms(&self) -> Option<f64> {
        self.plan.as_ref().and_then(|p| p.planning_ms)
    }

    pub fn execution_ms(&self) -> Option<f64> {
        self.plan.as_ref().and_then(|p| p.execution_ms)
    }
}

/// One row of the timing CSV
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timing {
    pub query_id: String,
    pub planning_ms: f64,
    pub execution_ms: Option<f64>,
}

/// Everything reported about one catalogued table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub schema: TableSchema,
    pub table_size: String,
    pub index_size: String,
    pub primary_key: Option<PrimaryKeySuggestion>,
    pub indexes: Vec<IndexSuggestion>,
    pub hot: HotReport,
    pub queries: BTreeMap<StatementKind, BTreeSet<String>>,
}

pub struct Analyzer<D: Database> {
    db: D,
    config: AnalyzerConfig,
    catalog: SchemaCatalog,
    aliases: AliasMap,
    usage: UsageTracker,
    results: Vec<QueryResult>,
}

impl<D: Database> Analyzer<D> {
    pub fn new(db: D, config: AnalyzerConfig) -> Self {
        Self {
            db,
            config,
            catalog: SchemaCatalog::new(),
            aliases: AliasMap::new(),
            usage: UsageTracker::new(),
            results: Vec::new(),
        }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Results so far, in processing order
    pub fn results(&self) -> &[QueryResult] {
        &self.results
    }

    /// Process every `query*` entry in key order.
    ///
    /// Stops at the first failing statement; earlier results are kept.
    pub async fn run(&mut self, queries: &BTreeMap<String, String>) -> Result<()> {
        if self.config.analyze_first {
            info!("Refreshing planner statistics");
            self.db.analyze().await?;
        }

        let selected: Vec<(&String, &String)> = queries
            .iter()
            .filter(|(id, _)| id.starts_with(QUERY_PREFIX))
            .collect();
        info!("Analyzing {} statements", selected.len());

        for (query_id, sql) in selected {
            self.process(query_id, sql).await?;
        }

        info!("Analysis finished: {} tables catalogued", self.catalog.table_names().len());
        Ok(())
    }

    /// Analyze a single statement and record its result
    pub async fn process(&mut self, query_id: &str, sql: &str) -> Result<&QueryResult> {
        info!("Processing {}", query_id);

        match self.analyze(query_id, sql).await {
            Ok(result) => {
                self.results.push(result);
                Ok(&self.results[self.results.len() - 1])
            }
            Err(err) => {
                error!("{} failed: {}", query_id, err);
                error!("Original query: {}", sql);
                error!("Catalogued tables: {:?}", self.catalog.table_names());
                Err(err.for_query(query_id))
            }
        }
    }

    async fn analyze(&mut self, query_id: &str, sql: &str) -> Result<QueryResult> {
        let parsed = classifier::parse(sql)?;
        let used_tables = classifier::resolve_tables(&parsed, &mut self.catalog, &self.db).await?;
        debug!("{} is a {} over {:?}", query_id, parsed.kind, used_tables);

        let outcome = Binder {
            db: &self.db,
            catalog: &mut self.catalog,
            aliases: &mut self.aliases,
            usage: &mut self.usage,
        }
        .bind(query_id, &parsed, &used_tables)
        .await?;

        let mut result = QueryResult {
            query_id: query_id.to_string(),
            kind: parsed.kind,
            original: sql.to_string(),
            rewritten: None,
            used_tables,
            plan: None,
            params: Vec::new(),
            unsupported: None,
        };

        match outcome {
            BindOutcome::Unsupported { reason } => {
                warn!("{}: {}", query_id, reason);
                result.unsupported = Some(reason);
            }
            BindOutcome::Bound(bound) => {
                let mode = ExplainMode::for_tables(&self.catalog, &result.used_tables);
                debug!("{} rewritten as: {}", query_id, bound.text);
                debug!("{} explained with {}", query_id, mode);

                let plan = PlanExecutor::new(self.config.plan_count)
                    .inspect(&self.db, &bound.text, mode)
                    .await?;

                result.rewritten = Some(bound.text);
                result.params = bound.params;
                result.plan = Some(plan);
            }
        }

        Ok(result)
    }

    /// (query id, planning ms, execution ms) for every result with a planning time
    pub fn timings(&self) -> Vec<Timing> {
        self.results
            .iter()
            .filter_map(|r| {
                r.planning_ms().map(|planning_ms| Timing {
                    query_id: r.query_id.clone(),
                    planning_ms,
                    execution_ms: r.execution_ms(),
                })
            })
            .collect()
    }

    /// Suggestions, HOT classification and sizes for every catalogued table
    pub async fn table_reports(&self) -> Result<Vec<TableReport>> {
        let mut reports = Vec::new();

        for schema in self.catalog.tables() {
            let table = schema.name.as_str();
            let table_size = self.db.table_size(table).await?;
            let index_size = self.db.index_size(table).await?;

            reports.push(TableReport {
                schema: schema.clone(),
                table_size,
                index_size,
                primary_key: suggest::suggest_primary_key(schema, &self.usage),
                indexes: suggest::suggest_indexes(schema, &self.usage),
                hot: hot::classify(schema, &self.usage),
                queries: self.usage.queries_by_kind(table),
            });
        }

        Ok(reports)
    }

    /// Replay artifacts for every select, update and delete result
    pub fn replay_scripts(&self) -> Vec<ReplayScript> {
        self.results.iter().filter_map(replay::replay_script).collect()
    }
}
