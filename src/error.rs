//! Error types for the analysis pipeline
//!
//! Each stage has its own error enum; `AnalyzerError` wraps them so a
//! failure anywhere in the run surfaces as a single type.

use thiserror::Error;

/// Malformed or unclassifiable SQL text
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse SQL: {0}")]
    Syntax(#[from] sqlparser::parser::ParserError),

    #[error("expected exactly one statement, found {0}")]
    StatementCount(usize),

    #[error("unsupported statement kind: {0}")]
    UnsupportedKind(String),
}

/// Failed metadata introspection
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("metadata query failed for table '{table}': {source}")]
    Metadata {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Failure while substituting literals for placeholders
#[derive(Debug, Error)]
pub enum BindError {
    #[error("placeholder {0} has no owning column")]
    UnownedPlaceholder(String),

    #[error("placeholder {0} was not reached while walking the statement")]
    UnreachedPlaceholder(String),

    #[error("no table context for column '{0}'")]
    NoTableContext(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Failure while running plan inspection
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan inspection failed for '{statement}': {source}")]
    Execution {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("malformed timing line '{0}'")]
    Timing(String),
}

/// Top-level error for a run
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("query '{query_id}' failed: {source}")]
    Query {
        query_id: String,
        #[source]
        source: Box<AnalyzerError>,
    },
}

impl AnalyzerError {
    /// Attach the id of the query being processed
    pub fn for_query(self, query_id: &str) -> Self {
        AnalyzerError::Query {
            query_id: query_id.to_string(),
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = AnalyzerError> = std::result::Result<T, E>;
