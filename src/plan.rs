// ============================================================================
// Plan Executor
// ============================================================================
//
// Runs a bound statement under EXPLAIN inside rolled-back transactions and
// extracts planning and execution times from the plan text.

use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::catalog::SchemaCatalog;
use crate::database::Database;
use crate::error::PlanError;

pub const EXPLAIN_ANALYZE: &str = "EXPLAIN (ANALYZE, VERBOSE, BUFFERS ON)";
pub const EXPLAIN_VERBOSE: &str = "EXPLAIN (VERBOSE)";

const PLANNING_TIME: &str = "planning time:";
const EXECUTION_TIME: &str = "execution time:";

/// How a statement is explained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExplainMode {
    /// Plan only; the statement is not executed
    Verbose,
    /// Execute and report timings and buffer usage
    AnalyzeVerboseBuffers,
}

impl ExplainMode {
    pub fn prefix(&self) -> &'static str {
        match self {
            ExplainMode::Verbose => EXPLAIN_VERBOSE,
            ExplainMode::AnalyzeVerboseBuffers => EXPLAIN_ANALYZE,
        }
    }

    /// Tables with foreign keys in either direction are only planned, never
    /// executed, so cascading actions cannot fire
    pub fn for_tables(catalog: &SchemaCatalog, tables: &[String]) -> Self {
        let related = tables.iter().any(|table| {
            catalog
                .get(table)
                .map(|schema| schema.has_foreign_keys())
                .unwrap_or(false)
        });

        if related {
            ExplainMode::Verbose
        } else {
            ExplainMode::AnalyzeVerboseBuffers
        }
    }
}

impl fmt::Display for ExplainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Plan text and timings of the final, recorded execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOutcome {
    pub mode: ExplainMode,
    pub plan: String,
    pub planning_ms: Option<f64>,
    pub execution_ms: Option<f64>,
}

pub struct PlanExecutor {
    plan_count: u32,
}

impl PlanExecutor {
    /// `plan_count` warm-up executions precede the recorded one
    pub fn new(plan_count: u32) -> Self {
        Self { plan_count }
    }

    pub async fn inspect<D: Database>(
        &self,
        db: &D,
        statement: &str,
        mode: ExplainMode,
    ) -> Result<PlanOutcome, PlanError> {
        let sql = format!("{} {}", mode.prefix(), statement);
        let execution_error = |source| PlanError::Execution {
            statement: sql.clone(),
            source,
        };

        for round in 0..self.plan_count {
            debug!("Warm-up {} of {}: {}", round + 1, self.plan_count, sql);
            db.execute_rolled_back(&sql).await.map_err(execution_error)?;
        }

        let lines = db.execute_rolled_back(&sql).await.map_err(execution_error)?;

        let mut planning_ms = None;
        let mut execution_ms = None;
        for line in &lines {
            if let Some(ms) = timing(line, PLANNING_TIME)? {
                planning_ms = Some(ms);
            }
            if let Some(ms) = timing(line, EXECUTION_TIME)? {
                execution_ms = Some(ms);
            }
        }

        let plan = lines.join("\n");
        info!("{}\n{}", sql, plan);

        Ok(PlanOutcome {
            mode,
            plan,
            planning_ms,
            execution_ms,
        })
    }
}

/// Milliseconds from a `Planning Time: 0.123 ms` style line, if the line
/// carries `prefix` (matched case-insensitively)
pub fn timing(line: &str, prefix: &str) -> Result<Option<f64>, PlanError> {
    let trimmed = line.trim_start();
    let head = match trimmed.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => head,
        _ => return Ok(None),
    };

    let value = trimmed[head.len()..]
        .split_whitespace()
        .next()
        .ok_or_else(|| PlanError::Timing(line.to_string()))?;

    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| PlanError::Timing(line.to_string()))
}
