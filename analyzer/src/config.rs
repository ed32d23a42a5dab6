use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use pg_query_analyzer::AnalyzerConfig;
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_plan_count() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// Contents of `queryanalyzer.toml`
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_plan_count")]
    pub plan_count: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub analyze: bool,
    /// Statement corpus; dotted keys nest, e.g. `select.001 = "..."`
    #[serde(default)]
    pub query: toml::Table,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            plan_count: self.plan_count,
            analyze_first: self.analyze,
        }
    }

    /// Connection options from the discrete fields; used when no URL is given
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let database = self.database.as_deref().context("missing 'database' in configuration")?;
        let user = self.user.as_deref().context("missing 'user' in configuration")?;
        let password = self.password.as_deref().context("missing 'password' in configuration")?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(database)
            .username(user)
            .password(password))
    }

    /// Statements keyed `query.<...>`, in key order
    pub fn queries(&self) -> Result<BTreeMap<String, String>> {
        let mut queries = BTreeMap::new();
        flatten("query", &self.query, &mut queries)?;
        Ok(queries)
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) -> Result<()> {
    for (key, value) in table {
        let id = format!("{}.{}", prefix, key);
        match value {
            toml::Value::String(sql) => {
                out.insert(id, sql.trim().to_string());
            }
            toml::Value::Table(nested) => flatten(&id, nested, out)?,
            other => bail!("query '{}' must be a string, found {}", id, other.type_str()),
        }
    }
    Ok(())
}
