//! Replay scripts for the external workload tool
//!
//! A query id of the form `query.<kind>.<digits>` maps to a numbered `.cli`
//! file holding the statement, its parameter types and values, and the
//! transaction outcome. Selects commit; updates and deletes roll back.

use serde::Serialize;

use crate::analyzer::QueryResult;
use crate::classifier::StatementKind;

/// Base of the per-kind offset; grows tenfold per extra leading zero
const BASE_SCALE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayScript {
    pub number: u64,
    pub contents: String,
}

impl ReplayScript {
    pub fn file_name(&self) -> String {
        format!("{}.cli", self.number)
    }
}

fn kind_multiplier(kind: StatementKind) -> Option<u64> {
    match kind {
        StatementKind::Select => Some(2),
        StatementKind::Update => Some(3),
        StatementKind::Delete => Some(1),
        StatementKind::Insert => None,
    }
}

/// Script number for a query id, or `None` if the id does not follow the
/// `query.<select|update|delete>.<digits>` pattern
pub fn script_number(query_id: &str) -> Option<(StatementKind, u64)> {
    let mut parts = query_id.split('.');
    let (prefix, kind, digits) = (parts.next()?, parts.next()?, parts.next()?);
    if prefix != "query" || parts.next().is_some() {
        return None;
    }
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let kind = match kind {
        "select" => StatementKind::Select,
        "update" => StatementKind::Update,
        "delete" => StatementKind::Delete,
        _ => return None,
    };

    let mut scale = BASE_SCALE;
    let mut rest = digits;
    while rest.len() > 1 && rest.starts_with('0') {
        rest = &rest[1..];
        if rest.starts_with('0') {
            scale *= 10;
        }
    }

    let base: u64 = rest.parse().ok()?;
    Some((kind, base + kind_multiplier(kind)? * scale))
}

/// Build the replay script for a processed query
pub fn replay_script(result: &QueryResult) -> Option<ReplayScript> {
    let (kind, number) = script_number(&result.query_id)?;

    let statement = result
        .original
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let (types, values) = if result.params.is_empty() {
        (String::new(), String::new())
    } else {
        (
            result
                .params
                .iter()
                .map(|p| p.sql_type.jdbc_code().to_string())
                .collect::<Vec<_>>()
                .join("|"),
            result
                .params
                .iter()
                .map(|p| p.raw.as_str())
                .collect::<Vec<_>>()
                .join("|"),
        )
    };

    let outcome = match kind {
        StatementKind::Select => "COMMIT",
        _ => "ROLLBACK",
    };

    let header = format!("# {}", result.query_id);
    let lines: [&str; 15] = [
        "#", &header, "#",
        "P", "BEGIN", "", "",
        "P", &statement, &types, &values,
        "P", outcome, "", "",
    ];

    let mut contents = lines.join("\n");
    contents.push('\n');

    Some(ReplayScript { number, contents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SqlLiteral, SqlType};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_numbers() {
        assert_eq!(script_number("query.select.001"), Some((StatementKind::Select, 2001)));
        assert_eq!(script_number("query.select.010"), Some((StatementKind::Select, 210)));
        assert_eq!(script_number("query.update.100"), Some((StatementKind::Update, 400)));
        assert_eq!(script_number("query.delete.007"), Some((StatementKind::Delete, 1007)));
        assert_eq!(script_number("query.delete.7"), Some((StatementKind::Delete, 107)));
        assert_eq!(script_number("query.insert.001"), None);
        assert_eq!(script_number("query.select.abc"), None);
        assert_eq!(script_number("query.select"), None);
    }

    #[test]
    fn test_update_script_rolls_back() {
        let result = QueryResult {
            query_id: "query.update.001".to_string(),
            kind: StatementKind::Update,
            original: "UPDATE accounts SET balance = ?\n WHERE id = ?".to_string(),
            rewritten: Some("UPDATE accounts SET balance = 10 WHERE id = 1".to_string()),
            used_tables: vec!["accounts".to_string()],
            plan: None,
            params: vec![
                SqlLiteral::synthesize(SqlType::Integer, Some("10")),
                SqlLiteral::synthesize(SqlType::Varchar, Some("a|b")),
            ],
            unsupported: None,
        };

        let script = replay_script(&result).unwrap();
        assert_eq!(script.file_name(), "3001.cli");
        assert_eq!(
            script.contents,
            "#\n# query.update.001\n#\nP\nBEGIN\n\n\nP\n\
             UPDATE accounts SET balance = ? WHERE id = ?\n4|12\n10|a|b\nP\nROLLBACK\n\n\n"
        );
    }
}
