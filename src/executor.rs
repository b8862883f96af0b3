//! C7 — SQL Validator & Executor: allow-list validation, parameter
//! binding, result shaping. The store boundary is the only place raw SQL
//! strings are ever executed.

use crate::error::CoreError;
use crate::ontology::OntologyRegistry;
use crate::query_builder::CompiledQuery;
use crate::sensor_store::{ResultRow, SensorStore};
use regex::Regex;
use std::sync::OnceLock;

const DENYLIST: &[&str] = &["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "ATTACH", "PRAGMA"];
const COLUMN_WHITELIST: &[&str] = &[
    "ts", "sensor_type", "value", "unit", "source", "raw", "id",
    "time_period", "time_period_label", "avg_value", "min_value", "max_value", "data_points",
];

static DENY_RE: OnceLock<Vec<Regex>> = OnceLock::new();

fn deny_patterns() -> &'static [Regex] {
    DENY_RE.get_or_init(|| {
        DENYLIST
            .iter()
            .map(|kw| Regex::new(&format!(r"(?i)\b{kw}\b")).unwrap())
            .collect()
    })
}

/// §4.4 "Validation allow-list". Checks structure, not values — `params`
/// are never part of the SQL text so they are not re-validated here.
pub fn validate(sql: &str, registry: &OntologyRegistry) -> Result<(), CoreError> {
    let trimmed = sql.trim_start();
    if !trimmed.to_uppercase().starts_with("SELECT") {
        return Err(CoreError::ValidationError("query must begin with SELECT".to_string()));
    }
    if !sql.contains("sensor_data") {
        return Err(CoreError::ValidationError("query must reference sensor_data".to_string()));
    }
    for other_table in ["session_storage", "session_metadata", "user_alerts", "action_logs", "synonym_overrides", "ingest_rejections"] {
        if sql.contains(other_table) {
            return Err(CoreError::ValidationError(format!("query references disallowed table {other_table}")));
        }
    }
    for pattern in deny_patterns() {
        if pattern.is_match(sql) {
            return Err(CoreError::ValidationError("query contains a denylisted keyword".to_string()));
        }
    }
    if !has_canonical_sensor_type_literal(sql, registry) {
        return Err(CoreError::ValidationError(
            "query must reference at least one canonical sensor_type literal".to_string(),
        ));
    }
    validate_columns(sql)?;
    Ok(())
}

fn has_canonical_sensor_type_literal(sql: &str, registry: &OntologyRegistry) -> bool {
    registry.canonical_types().iter().any(|t| sql.contains(&format!("'{t}'")))
}

/// Drops the contents of single-quoted string literals (and the quotes
/// themselves) so the identifier scan below never sees literal text like
/// `'temperature'` as a bare word.
fn strip_quoted_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_quote = false;
    for c in sql.chars() {
        if c == '\'' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            continue;
        }
        out.push(c);
    }
    out
}

/// Best-effort column whitelist check: scans quoted-literal-free SQL for
/// bare words that look like column references (`word.word`, or alone
/// after SELECT/WHERE/AND/GROUP BY/ORDER BY) and rejects anything outside
/// the whitelist. Deliberately conservative — it only flags clear
/// violations, since a full SQL parser is out of scope (§1 Non-goals).
fn validate_columns(sql: &str) -> Result<(), CoreError> {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    let ident_re = IDENT_RE.get_or_init(|| Regex::new(r"\b[a-z_][a-z0-9_]*\b").unwrap());

    let known_functions = ["select", "from", "where", "and", "or", "order", "by", "asc", "desc", "group", "limit",
        "avg", "min", "max", "count", "as", "union", "all", "strftime", "sensor_data", "null", "in"];

    let unquoted = strip_quoted_literals(sql).to_lowercase();
    for m in ident_re.find_iter(&unquoted) {
        let word = m.as_str();
        if known_functions.contains(&word) || COLUMN_WHITELIST.contains(&word) {
            continue;
        }
        if word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        // anything else is either a bind-parameter name or a genuine
        // column violation; literal text was already stripped above.
        if word.len() > 1 {
            return Err(CoreError::ValidationError(format!("column '{word}' is not in the allow-list")));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    Validation,
    Execution,
    Connection,
}

pub struct ExecutionOutcome {
    pub rows: Vec<ResultRow>,
}

/// §4.4 "Execution contract". Validates then runs `compiled` against
/// `store`; empty results are a successful outcome, never an error.
pub fn execute(compiled: &CompiledQuery, store: &SensorStore, registry: &OntologyRegistry) -> Result<ExecutionOutcome, CoreError> {
    validate(&compiled.sql, registry)?;

    let bind_params: Vec<&dyn rusqlite::ToSql> = compiled.params.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    let rows = store
        .query(&compiled.sql, &bind_params)
        .map_err(|e| CoreError::ExecutionError(e.to_string()))?;

    Ok(ExecutionOutcome { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_registry() -> OntologyRegistry {
        OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn rejects_non_select() {
        let registry = test_registry();
        let err = validate("DROP TABLE sensor_data", &registry).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn rejects_denylisted_keyword_inside_select() {
        let registry = test_registry();
        let err = validate(
            "SELECT * FROM sensor_data WHERE sensor_type = 'temperature'; DELETE FROM sensor_data",
            &registry,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn accepts_well_formed_select() {
        let registry = test_registry();
        let sql = "SELECT * FROM sensor_data WHERE sensor_type = 'temperature' ORDER BY ts DESC LIMIT 1";
        assert!(validate(sql, &registry).is_ok());
    }

    #[test]
    fn quoted_sensor_type_values_are_not_treated_as_columns() {
        let registry = test_registry();
        let sql = "SELECT sensor_type, AVG(value) AS avg_value FROM sensor_data \
                   WHERE sensor_type IN ('temperature', 'humidity') AND ts >= ?1 AND ts < ?2 \
                   GROUP BY sensor_type ORDER BY sensor_type ASC";
        assert!(validate(sql, &registry).is_ok());
    }

    #[test]
    fn rejects_query_with_no_canonical_sensor_literal() {
        let registry = test_registry();
        let sql = "SELECT * FROM sensor_data WHERE sensor_type = 'bogus_sensor' LIMIT 1";
        assert!(validate(sql, &registry).is_err());
    }

    #[test]
    fn rejects_reference_to_other_tables() {
        let registry = test_registry();
        let sql = "SELECT * FROM sensor_data, user_alerts WHERE sensor_type = 'temperature'";
        assert!(validate(sql, &registry).is_err());
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let registry = test_registry();
        let store = SensorStore::open_in_memory().unwrap();
        let compiled = CompiledQuery {
            sql: "SELECT * FROM sensor_data WHERE sensor_type = 'temperature'".to_string(),
            params: vec![],
        };
        let outcome = execute(&compiled, &store, &registry).unwrap();
        assert!(outcome.rows.is_empty());
    }
}
