//! C6 — Query Builder: deterministic Semantic IR → SQL compilation over
//! the single `sensor_data` table, resolving fields and building
//! parameter-bound literals for a fixed set of analytic query shapes.

use crate::models::semantic_ir::{Aggregation, Entity, Grouping, RangeToken, SemanticIr, TimeRange};
use crate::time_window;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;

/// A compiled query: the SQL text plus its positional bind parameters.
/// `params` are always literal values the builder computed itself —
/// never raw user text — satisfying §4.3 "Safety".
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

fn bucket_expr(grouping: Grouping) -> &'static str {
    match grouping {
        Grouping::None => "",
        Grouping::ByMinute => "strftime('%Y-%m-%d %H:%M', ts)",
        Grouping::ByHour => "strftime('%Y-%m-%d %H:00', ts)",
        Grouping::ByDay => "strftime('%Y-%m-%d', ts)",
        Grouping::ByWeek => "strftime('%Y-%W', ts)",
        Grouping::ByMonth => "strftime('%Y-%m', ts)",
    }
}

fn aggregate_select(grouping: Grouping) -> String {
    let bucket = bucket_expr(grouping);
    if bucket.is_empty() {
        "AVG(value) AS avg_value, MIN(value) AS min_value, MAX(value) AS max_value, COUNT(*) AS data_points".to_string()
    } else {
        format!(
            "{bucket} AS time_period, AVG(value) AS avg_value, MIN(value) AS min_value, MAX(value) AS max_value, COUNT(*) AS data_points"
        )
    }
}

/// `sensor_type` values are drawn only from the IR's (ontology-validated)
/// entity field, never from raw user text, so the builder inlines them as
/// quoted literals rather than bind parameters — this is what lets C7's
/// allow-list rule "(5) at least one sensor_type literal is canonical"
/// inspect the compiled SQL text directly. The escaping mirrors the
/// teacher's `format_value` even though a canonical identifier never
/// actually contains a quote.
fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn entity_predicate(entity: &Entity) -> String {
    match entity {
        Entity::Single(sensor_type) => format!("sensor_type = {}", sql_literal(sensor_type)),
        Entity::Set(types) => {
            let literals: Vec<String> = types.iter().map(|t| sql_literal(t)).collect();
            format!("sensor_type IN ({})", literals.join(", "))
        }
    }
}

fn time_predicate(token: &RangeToken, params: &mut Vec<SqlValue>) -> String {
    let (start, end, _) = time_window::resolve(token, Utc::now());
    params.push(SqlValue::Text(start.to_rfc3339()));
    let start_idx = params.len();
    params.push(SqlValue::Text(end.to_rfc3339()));
    let end_idx = params.len();
    format!("ts >= ?{start_idx} AND ts < ?{end_idx}")
}

/// §4.3's compilation table. Produces exactly one of: current-value,
/// plain aggregate, grouped aggregate, or a `UNION ALL` of per-range
/// aggregations (comparison).
pub fn compile(ir: &SemanticIr) -> CompiledQuery {
    if ir.comparison {
        return compile_comparison(ir);
    }

    let mut params = Vec::new();
    let entity_clause = entity_predicate(&ir.entity);

    if ir.aggregation == Aggregation::Current {
        let single = match &ir.entity {
            Entity::Single(_) => true,
            Entity::Set(_) => false,
        };
        if single {
            let sql = format!("SELECT * FROM sensor_data WHERE {entity_clause} ORDER BY ts DESC LIMIT 1");
            return CompiledQuery { sql, params };
        }
    }

    let token = match &ir.time_range {
        TimeRange::Single(r) => r.clone(),
        TimeRange::List(v) => v.first().cloned().unwrap_or_else(RangeToken::last_24_hours),
    };
    let time_clause = time_predicate(&token, &mut params);

    let select = aggregate_select(ir.grouping);
    let mut sql = format!("SELECT {select} FROM sensor_data WHERE {entity_clause} AND {time_clause}");

    if ir.grouping != Grouping::None {
        let mut group_by = vec!["time_period".to_string()];
        if matches!(ir.entity, Entity::Set(_)) {
            sql = sql.replacen("SELECT ", "SELECT sensor_type, ", 1);
            group_by.insert(0, "sensor_type".to_string());
        }
        sql.push_str(&format!(" GROUP BY {} ORDER BY time_period ASC", group_by.join(", ")));
    }

    CompiledQuery { sql, params }
}

/// `comparison=true`: one `UNION ALL` branch per Range Token, each
/// labeled with its token so downstream can attribute rows back to the
/// range it came from.
fn compile_comparison(ir: &SemanticIr) -> CompiledQuery {
    let tokens = ir.time_range.as_list();
    let mut params = Vec::new();
    let mut branches = Vec::with_capacity(tokens.len());

    for token in tokens {
        let entity_clause = entity_predicate(&ir.entity);
        let time_clause = time_predicate(token, &mut params);
        params.push(SqlValue::Text(token.label()));
        let label_idx = params.len();
        let select = aggregate_select(if ir.grouping == Grouping::None { Grouping::ByDay } else { ir.grouping });
        branches.push(format!(
            "SELECT ?{label_idx} AS time_period_label, {select_rest} FROM sensor_data WHERE {entity_clause} AND {time_clause}",
            select_rest = strip_time_period(&select),
        ));
    }

    let sql = format!("{} ORDER BY time_period_label ASC", branches.join(" UNION ALL "));
    CompiledQuery { sql, params }
}

/// Comparison branches label via `time_period_label` (the range token, a
/// value known at compile time) rather than re-deriving `time_period`
/// from `ts` per row — every row in a branch already shares one range.
fn strip_time_period(select: &str) -> String {
    select
        .split(", ")
        .filter(|part| !part.trim_start().starts_with("strftime"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::semantic_ir::{Aggregation, Entity, Grouping, OutputFormat, SemanticIr, TimeRange};

    fn base_ir() -> SemanticIr {
        SemanticIr {
            entity: Entity::Single("temperature".to_string()),
            aggregation: Aggregation::Current,
            time_range: TimeRange::Single(RangeToken::last_24_hours()),
            grouping: Grouping::None,
            format: OutputFormat::Value,
            comparison: false,
            time_context: None,
            fallback_reason: None,
        }
    }

    #[test]
    fn current_value_single_entity_compiles_to_point_lookup() {
        let compiled = compile(&base_ir());
        assert!(compiled.sql.starts_with("SELECT * FROM sensor_data WHERE sensor_type = 'temperature'"));
        assert!(compiled.sql.contains("ORDER BY ts DESC LIMIT 1"));
        assert_eq!(compiled.params.len(), 0);
    }

    #[test]
    fn average_grouped_includes_bucket_and_group_by() {
        let mut ir = base_ir();
        ir.aggregation = Aggregation::Average;
        ir.grouping = Grouping::ByDay;
        let compiled = compile(&ir);
        assert!(compiled.sql.contains("GROUP BY time_period"));
        assert!(compiled.sql.contains("AVG(value)"));
    }

    #[test]
    fn compound_entity_groups_by_sensor_type_too() {
        let mut ir = base_ir();
        ir.entity = Entity::Set(vec!["temperature".to_string(), "humidity".to_string()]);
        ir.aggregation = Aggregation::Average;
        ir.grouping = Grouping::ByDay;
        let compiled = compile(&ir);
        assert!(compiled.sql.contains("sensor_type IN ('temperature', 'humidity')"));
        assert!(compiled.sql.contains("GROUP BY sensor_type, time_period"));
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn comparison_compiles_to_union_all() {
        let mut ir = base_ir();
        ir.comparison = true;
        ir.aggregation = Aggregation::Average;
        ir.time_range = TimeRange::List(vec![RangeToken::ThisWeek, RangeToken::LastWeek]);
        ir.grouping = Grouping::ByWeek;
        let compiled = compile(&ir);
        assert!(compiled.sql.contains("UNION ALL"));
        assert!(compiled.sql.contains("time_period_label"));
    }

    #[test]
    fn malicious_entity_text_is_escaped_into_a_single_literal() {
        let mut ir = base_ir();
        ir.entity = Entity::Single("'; DROP TABLE sensor_data; --".to_string());
        let compiled = compile(&ir);
        // the embedded quote is doubled, so the malicious text stays inside
        // one sensor_type literal instead of terminating it early.
        assert!(compiled.sql.contains("sensor_type = '''; DROP TABLE sensor_data; --'"));
        assert_eq!(compiled.params.len(), 0);
    }
}
