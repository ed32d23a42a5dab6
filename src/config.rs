use serde::Deserialize;

/// Prefix selecting statement entries from a configuration map
pub const QUERY_PREFIX: &str = "query";

/// Run options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Warm-up executions before the timed one
    pub plan_count: u32,
    /// Refresh planner statistics before the first statement
    pub analyze_first: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            plan_count: 5,
            analyze_first: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: AnalyzerConfig = serde_json::from_str(r#"{"plan_count": 2}"#).unwrap();
        assert_eq!(config.plan_count, 2);
        assert!(config.analyze_first);
    }
}
