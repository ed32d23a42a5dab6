//! Full-pipeline tests over the in-memory database
//!
//! Every statement goes through parsing, binding, plan inspection and the
//! final suggestion pass exactly as in a live run.

use std::collections::BTreeMap;

use pg_query_analyzer::{
    Analyzer, AnalyzerConfig, AnalyzerError, BindError, ExplainMode, HotStatus, MemoryDatabase,
    MemoryTable, ParseError, SqlType, StatementKind,
};
use pretty_assertions::assert_eq;

fn corpus(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(id, sql)| (id.to_string(), sql.to_string()))
        .collect()
}

fn config() -> AnalyzerConfig {
    AnalyzerConfig {
        plan_count: 2,
        ..AnalyzerConfig::default()
    }
}

fn accounts() -> MemoryTable {
    MemoryTable::new("accounts")
        .column("id", SqlType::Integer)
        .column("balance", SqlType::Integer)
        .column("name", SqlType::LongVarchar)
        .primary_key(&["id"])
        .sample(&[("id", Some("42")), ("balance", Some("100")), ("name", Some("ann"))])
}

fn shop() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table(
            MemoryTable::new("customers")
                .column("id", SqlType::Integer)
                .column("email", SqlType::Varchar)
                .column("created_at", SqlType::Timestamp)
                .primary_key(&["id"])
                .sample(&[
                    ("id", Some("5")),
                    ("email", Some("ann@example.com")),
                    ("created_at", Some("2024-02-01 10:00:00")),
                ]),
        )
        .with_table(
            MemoryTable::new("orders")
                .column("id", SqlType::BigInt)
                .column("customer_id", SqlType::Integer)
                .column("status", SqlType::Varchar)
                .column("placed_on", SqlType::Date)
                .primary_key(&["id"])
                .foreign_key("orders_customer_fk", "customer_id", "customers", "id")
                .sample(&[
                    ("id", Some("900")),
                    ("customer_id", Some("5")),
                    ("status", Some("open")),
                    ("placed_on", Some("2024-02-02")),
                ]),
        )
        .with_table(
            MemoryTable::new("events")
                .column("id", SqlType::BigInt)
                .column("kind", SqlType::Varchar)
                .column("payload", SqlType::LongVarchar)
                .primary_key(&["id"]),
        )
}

#[tokio::test]
async fn test_accounts_end_to_end() {
    let db = MemoryDatabase::new().with_table(accounts());
    let mut analyzer = Analyzer::new(db, config());

    analyzer
        .run(&corpus(&[
            ("query.select.001", "SELECT * FROM accounts WHERE id = ?"),
            ("query.update.001", "UPDATE accounts SET balance = ? WHERE id = ?"),
        ]))
        .await
        .unwrap();

    let usage = analyzer.usage();
    let where_ = usage.where_usage("accounts").unwrap();
    assert_eq!(where_["query.select.001"], vec!["id"]);
    assert_eq!(where_["query.update.001"], vec!["id"]);
    assert_eq!(
        usage.set_usage("accounts").unwrap().iter().cloned().collect::<Vec<_>>(),
        vec!["balance"]
    );

    let reports = analyzer.table_reports().await.unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];

    let pk = report.primary_key.as_ref().unwrap();
    assert_eq!(pk.candidate.iter().cloned().collect::<Vec<_>>(), vec!["id"]);
    assert_eq!(pk.verdict(), "Yes");
    assert!(report.indexes.is_empty());

    let balance = report.hot.columns.iter().find(|c| c.column == "balance").unwrap();
    assert_eq!(balance.status, HotStatus::MutateOnly);

    let results = analyzer.results();
    assert_eq!(results[0].rewritten.as_deref(), Some("SELECT * FROM accounts WHERE id = 42"));
    assert_eq!(
        results[1].rewritten.as_deref(),
        Some("UPDATE accounts SET balance = 100 WHERE id = 42")
    );
}

#[tokio::test]
async fn test_every_execution_rolled_back() {
    let db = MemoryDatabase::new().with_table(accounts());
    let mut analyzer = Analyzer::new(db, config());

    analyzer
        .run(&corpus(&[
            ("query.delete.001", "DELETE FROM accounts WHERE id = ?"),
            ("query.select.001", "SELECT name FROM accounts WHERE id = ?"),
            ("query.update.001", "UPDATE accounts SET name = ? WHERE id = ?"),
        ]))
        .await
        .unwrap();

    let db = analyzer.database();
    // plan_count warm-ups plus the recorded run, per statement
    assert_eq!(db.executed().len(), 9);
    assert_eq!(db.rollbacks(), db.executed().len());
    assert_eq!(db.analyze_calls(), 1);
    assert!(db
        .executed()
        .iter()
        .all(|sql| sql.starts_with("EXPLAIN (ANALYZE, VERBOSE, BUFFERS ON) ")));
}

#[tokio::test]
async fn test_catalog_introspects_each_table_once() {
    let mut analyzer = Analyzer::new(shop(), config());

    analyzer
        .run(&corpus(&[
            ("query.select.001", "SELECT * FROM orders WHERE status = ?"),
            ("query.select.002", "SELECT * FROM orders WHERE customer_id = ?"),
            ("query.select.003", "SELECT o.id FROM orders o JOIN customers c ON c.id = o.customer_id WHERE c.email = ?"),
            ("query.update.001", "UPDATE orders SET status = ? WHERE id = ?"),
        ]))
        .await
        .unwrap();

    let db = analyzer.database();
    assert_eq!(db.metadata_calls("orders"), 1);
    assert_eq!(db.metadata_calls("customers"), 1);
    assert_eq!(db.sample_calls("orders"), 1);
    assert_eq!(db.sample_calls("customers"), 1);
}

#[tokio::test]
async fn test_alias_resolves_owning_table() {
    let mut analyzer = Analyzer::new(shop(), config());

    let result = analyzer
        .process("query.select.001", "SELECT * FROM orders o WHERE o.id = ?")
        .await
        .unwrap();
    assert_eq!(result.rewritten.as_deref(), Some("SELECT * FROM orders AS o WHERE o.id = 900"));
    assert_eq!(result.params[0].sql_type, SqlType::BigInt);

    assert_eq!(analyzer.aliases().get("o"), Some("orders"));
    let where_ = analyzer.usage().where_usage("orders").unwrap();
    assert_eq!(where_["query.select.001"], vec!["id"]);
}

#[tokio::test]
async fn test_quoting_by_type() {
    let mut analyzer = Analyzer::new(shop(), config());

    let result = analyzer
        .process(
            "query.select.001",
            "SELECT * FROM customers WHERE id = ? AND email = ? AND created_at < ?",
        )
        .await
        .unwrap();

    assert_eq!(
        result.rewritten.as_deref(),
        Some("SELECT * FROM customers WHERE id = 5 AND email = 'ann@example.com' AND created_at < '2024-02-01 10:00:00'")
    );
    let types: Vec<_> = result.params.iter().map(|p| p.sql_type).collect();
    assert_eq!(types, vec![SqlType::Integer, SqlType::Varchar, SqlType::Timestamp]);
}

#[tokio::test]
async fn test_empty_table_uses_defaults() {
    let mut analyzer = Analyzer::new(shop(), config());

    let result = analyzer
        .process("query.select.001", "SELECT * FROM events WHERE id = ? AND kind = ?")
        .await
        .unwrap();
    assert_eq!(
        result.rewritten.as_deref(),
        Some("SELECT * FROM events WHERE id = 0 AND kind = ''")
    );
}

#[tokio::test]
async fn test_foreign_key_tables_are_only_planned() {
    let mut analyzer = Analyzer::new(shop(), config());

    let result = analyzer
        .process("query.delete.001", "DELETE FROM orders WHERE id = ?")
        .await
        .unwrap();

    let plan = result.plan.as_ref().unwrap();
    assert_eq!(plan.mode, ExplainMode::Verbose);
    assert_eq!(plan.planning_ms, None);
    assert!(analyzer.timings().is_empty());

    let result = analyzer
        .process("query.select.001", "SELECT * FROM events WHERE kind = ?")
        .await
        .unwrap();
    assert_eq!(result.plan.as_ref().unwrap().mode, ExplainMode::AnalyzeVerboseBuffers);

    let timings = analyzer.timings();
    assert_eq!(timings.len(), 1);
    assert_eq!(timings[0].query_id, "query.select.001");
}

#[tokio::test]
async fn test_insert_with_placeholders_is_skipped() {
    let mut analyzer = Analyzer::new(shop(), config());

    analyzer
        .run(&corpus(&[
            ("query.insert.001", "INSERT INTO events (id, kind) VALUES (?, ?)"),
            ("query.select.001", "SELECT * FROM events WHERE kind = ?"),
        ]))
        .await
        .unwrap();

    let results = analyzer.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].kind, StatementKind::Insert);
    assert!(results[0].unsupported.is_some());
    assert!(results[0].plan.is_none());
    assert!(analyzer
        .usage()
        .queries(StatementKind::Insert, "events")
        .unwrap()
        .contains("query.insert.001"));
    // Only the select reached the database
    assert_eq!(analyzer.database().executed().len(), 3);
}

#[tokio::test]
async fn test_failure_stops_run_and_keeps_earlier_results() {
    let mut analyzer = Analyzer::new(shop(), config());

    let err = analyzer
        .run(&corpus(&[
            ("query.select.001", "SELECT * FROM orders WHERE status = ?"),
            ("query.select.002", "SELEC oops"),
            ("query.select.003", "SELECT * FROM customers WHERE id = ?"),
        ]))
        .await
        .unwrap_err();

    match err {
        AnalyzerError::Query { query_id, source } => {
            assert_eq!(query_id, "query.select.002");
            assert!(matches!(*source, AnalyzerError::Parse(ParseError::Syntax(_))));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(analyzer.results().len(), 1);
    assert!(!analyzer.catalog().contains("customers"));
}

#[tokio::test]
async fn test_unknown_table_is_schema_error() {
    let mut analyzer = Analyzer::new(shop(), config());

    let err = analyzer
        .process("query.select.001", "SELECT * FROM invoices WHERE id = ?")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invoices"));
}

#[tokio::test]
async fn test_unowned_placeholder_fails() {
    let mut analyzer = Analyzer::new(shop(), config());

    let err = analyzer
        .process("query.select.001", "SELECT ? FROM orders")
        .await
        .unwrap_err();
    match err {
        AnalyzerError::Query { source, .. } => {
            assert!(matches!(*source, AnalyzerError::Bind(BindError::UnownedPlaceholder(_))))
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_composite_suggestions_trim_updated_columns() {
    let mut analyzer = Analyzer::new(shop(), config());

    analyzer
        .run(&corpus(&[
            ("query.select.001", "SELECT * FROM orders WHERE status = ? AND placed_on = ?"),
            ("query.update.001", "UPDATE orders SET placed_on = ? WHERE id = ?"),
        ]))
        .await
        .unwrap();

    let reports = analyzer.table_reports().await.unwrap();
    let orders = reports.iter().find(|r| r.schema.name == "orders").unwrap();

    // WHERE list is [placed_on, status]: leading column kept, nothing to trim;
    // the imported foreign key adds customer_id
    let columns: Vec<_> = orders.indexes.iter().map(|i| i.columns.clone()).collect();
    assert_eq!(
        columns,
        vec![
            vec!["placed_on".to_string(), "status".to_string()],
            vec!["customer_id".to_string()],
        ]
    );
    assert_eq!(orders.indexes[0].name, "idx_orders_placed_on_status");

    let pk = orders.primary_key.as_ref().unwrap();
    assert_eq!(pk.verdict(), "No");
    assert!(!pk.candidate.contains("placed_on"));
}

#[tokio::test]
async fn test_replay_scripts_for_select_update_delete() {
    let db = MemoryDatabase::new().with_table(accounts());
    let mut analyzer = Analyzer::new(db, config());

    analyzer
        .run(&corpus(&[
            ("query.select.001", "SELECT * FROM accounts WHERE id = ? LIMIT ?"),
            ("query.update.010", "UPDATE accounts SET balance = ? WHERE id = ?"),
            ("query.insert.001", "INSERT INTO accounts (id, balance, name) VALUES (1, 2, 'x')"),
        ]))
        .await
        .unwrap();

    let scripts = analyzer.replay_scripts();
    let names: Vec<_> = scripts.iter().map(|s| s.file_name()).collect();
    assert_eq!(names, vec!["2001.cli", "310.cli"]);

    let select = &scripts[0].contents;
    assert!(select.contains("\nSELECT * FROM accounts WHERE id = ? LIMIT ?\n4|4\n42|1\n"));
    assert!(select.ends_with("P\nCOMMIT\n\n\n"));
    assert!(scripts[1].contents.ends_with("P\nROLLBACK\n\n\n"));

    let limited = analyzer.results()[1].rewritten.clone().unwrap();
    assert_eq!(limited, "SELECT * FROM accounts WHERE id = 42 LIMIT 1");
}

#[tokio::test]
async fn test_replay_parameters_follow_limit_offset_order() {
    let db = MemoryDatabase::new().with_table(accounts());
    let mut analyzer = Analyzer::new(db, config());

    analyzer
        .run(&corpus(&[
            ("query.select.002", "SELECT * FROM accounts WHERE id = ? LIMIT ? OFFSET ?"),
            ("query.select.003", "SELECT * FROM accounts WHERE id > ? FETCH FIRST ? ROWS ONLY"),
        ]))
        .await
        .unwrap();

    let scripts = analyzer.replay_scripts();
    let names: Vec<_> = scripts.iter().map(|s| s.file_name()).collect();
    assert_eq!(names, vec!["2002.cli", "2003.cli"]);
    assert!(scripts[0]
        .contents
        .contains("\nSELECT * FROM accounts WHERE id = ? LIMIT ? OFFSET ?\n4|4|4\n42|1|0\n"));
    assert!(scripts[1]
        .contents
        .contains("\nSELECT * FROM accounts WHERE id > ? FETCH FIRST ? ROWS ONLY\n4|4\n42|1\n"));

    let results = analyzer.results();
    assert_eq!(
        results[0].rewritten.as_deref(),
        Some("SELECT * FROM accounts WHERE id = 42 LIMIT 1 OFFSET 0")
    );
    assert_eq!(
        results[1].rewritten.as_deref(),
        Some("SELECT * FROM accounts WHERE id > 42 FETCH FIRST 1 ROWS ONLY")
    );
}

#[tokio::test]
async fn test_no_key_suggestion_when_filters_are_all_mutated() {
    let db = MemoryDatabase::new().with_table(MemoryTable::new("logs").column("status", SqlType::Varchar));
    let mut analyzer = Analyzer::new(db, config());

    analyzer
        .run(&corpus(&[
            ("query.select.001", "SELECT * FROM logs WHERE status = ?"),
            ("query.update.001", "UPDATE logs SET status = ?"),
        ]))
        .await
        .unwrap();

    let reports = analyzer.table_reports().await.unwrap();
    let logs = reports.iter().find(|r| r.schema.name == "logs").unwrap();
    assert!(logs.primary_key.is_none());
}

#[tokio::test]
async fn test_delete_in_list_filters_on_left_column() {
    let mut analyzer = Analyzer::new(shop(), config());

    analyzer
        .run(&corpus(&[(
            "query.delete.001",
            "DELETE FROM orders WHERE status IN (?, ?) AND customer_id = ?",
        )]))
        .await
        .unwrap();

    let where_ = analyzer.usage().where_usage("orders").unwrap();
    assert_eq!(where_["query.delete.001"], vec!["customer_id", "status"]);
    assert!(analyzer.usage().queries(StatementKind::Delete, "orders").is_some());
}
