//! C10 — Response Formatter: turns a `FallbackOutcome` plus its IR into the
//! unified `AskResult`: rows -> JSON -> response envelope, with
//! chart-keyword detection and a bilingual Persian/English narrative.

use crate::models::response::{AskResult, ChartMetadata, ChartType, ComparisonBlock, SensorComparison, ValidationBlock};
use crate::models::semantic_ir::{Aggregation, Entity, Grouping, SemanticIr};
use crate::ontology::OntologyRegistry;
use crate::sensor_store::ResultRow;
use rusqlite::types::Value as SqlValue;
use std::collections::BTreeMap;

const CHART_KEYWORDS: &[(&[&str], ChartType)] = &[
    (&["trend", "graph", "روند", "نمودار روند"], ChartType::Line),
    (&["compare", "comparison", "مقایسه"], ChartType::Bar),
    (&["distribution", "توزیع"], ChartType::Histogram),
    (&["pie", "share", "سهم"], ChartType::Pie),
    (&["chart", "نمودار"], ChartType::Line),
];

const PALETTE: &[&str] = &["#4C72B0", "#DD8452", "#55A868", "#C44E52", "#8172B2", "#937860"];

pub struct FormatterInput<'a> {
    pub query: &'a str,
    pub translated_query: &'a str,
    pub lang_fa: bool,
    pub ir: &'a SemanticIr,
    pub rows: Vec<ResultRow>,
    pub sql: String,
    pub fallback_used: bool,
    pub refined_by_llm: bool,
    pub mapping: Option<String>,
    pub registry: &'a OntologyRegistry,
}

/// §4.6 "Assembly". Never fabricates a number: every value in `summary`
/// traces back to a row in `rows`, and an empty `rows` yields an honest
/// "no data" narrative rather than silence or a made-up figure.
pub fn format(input: FormatterInput) -> AskResult {
    let sensor_types = distinct_sensor_types(input.ir, &input.rows);
    let raw_data: Vec<serde_json::Value> = input.rows.iter().map(row_to_json).collect();

    let chart_requested = detect_chart_keyword(input.query).is_some() || detect_chart_keyword(input.translated_query).is_some();
    let chart_type = if chart_requested { detect_chart_keyword(input.translated_query).or_else(|| detect_chart_keyword(input.query)) } else { None };

    let metrics = build_metrics(input.ir, &input.rows, input.registry);
    let comparison = if input.ir.comparison { build_comparison(input.ir, &input.rows) } else { None };
    let chart_metadata = if chart_requested && !input.rows.is_empty() {
        Some(build_chart_metadata(input.ir, &sensor_types, input.rows.len() as u64, chart_type))
    } else {
        None
    };

    let summary = build_summary(input.ir, &metrics, &comparison, &sensor_types, input.lang_fa, input.rows.is_empty(), input.registry);

    AskResult {
        success: true,
        summary,
        metrics,
        raw_data,
        chart: None,
        chart_type,
        chart_metadata,
        comparison,
        sql: Some(input.sql),
        translated_query: Some(input.translated_query.to_string()),
        feature_context: input.ir.fallback_reason.clone(),
        timestamp: chrono::Utc::now(),
        validation: ValidationBlock {
            query_valid: true,
            execution_success: true,
            data_points: input.rows.len() as u64,
            sensor_types,
            chart_requested,
            mapping: input.mapping,
            fallback_used: input.fallback_used,
            refined_by_llm: input.refined_by_llm,
            semantic_json: serde_json::to_value(input.ir).ok(),
            error_details: None,
        },
    }
}

fn detect_chart_keyword(text: &str) -> Option<ChartType> {
    let lower = text.to_lowercase();
    CHART_KEYWORDS.iter().find(|(cues, _)| cues.iter().any(|c| lower.contains(c))).map(|(_, t)| *t)
}

fn sql_value_to_f64(v: &SqlValue) -> Option<f64> {
    match v {
        SqlValue::Integer(i) => Some(*i as f64),
        SqlValue::Real(f) => Some(*f),
        _ => None,
    }
}

fn sql_value_to_string(v: &SqlValue) -> Option<String> {
    match v {
        SqlValue::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn row_to_json(row: &ResultRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (k, v) in row {
        let value = match v {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Integer(i) => serde_json::Value::from(*i),
            SqlValue::Real(f) => serde_json::json!(f),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Blob(_) => serde_json::Value::Null,
        };
        map.insert(k.clone(), value);
    }
    serde_json::Value::Object(map)
}

fn distinct_sensor_types(ir: &SemanticIr, rows: &[ResultRow]) -> Vec<String> {
    let from_rows: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get("sensor_type").and_then(sql_value_to_string))
        .collect();
    if !from_rows.is_empty() {
        let mut seen = Vec::new();
        for t in from_rows {
            if !seen.contains(&t) {
                seen.push(t);
            }
        }
        return seen;
    }
    ir.entity.as_slice().into_iter().map(|s| s.to_string()).collect()
}

/// Per-sensor aggregate figures pulled from `rows`, never from `ir` alone —
/// `ir` only supplies the sensor name when a row doesn't carry one (the
/// point-lookup and single-bucket-aggregate shapes both omit `sensor_type`).
struct SensorFigures {
    latest: Option<f64>,
    avg: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    count: u64,
    unit: Option<String>,
    series: Vec<(String, f64)>,
}

fn figures_for(sensor_type: &str, ir: &SemanticIr, rows: &[ResultRow], registry: &OntologyRegistry) -> SensorFigures {
    let relevant: Vec<&ResultRow> = if rows.iter().any(|r| r.contains_key("sensor_type")) {
        rows.iter().filter(|r| r.get("sensor_type").and_then(sql_value_to_string).as_deref() == Some(sensor_type)).collect()
    } else {
        rows.iter().collect()
    };

    let unit = registry.canonical_unit(sensor_type);

    if ir.aggregation == Aggregation::Current && !ir.comparison {
        let latest = relevant.first().and_then(|r| r.get("value")).and_then(sql_value_to_f64);
        return SensorFigures { latest, avg: None, min: None, max: None, count: relevant.len() as u64, unit, series: vec![] };
    }

    let mut series = Vec::new();
    let mut avgs = Vec::new();
    let mut mins = Vec::new();
    let mut maxs = Vec::new();
    let mut total_count = 0u64;

    for row in &relevant {
        if let Some(avg) = row.get("avg_value").and_then(sql_value_to_f64) {
            avgs.push(avg);
            let label = row
                .get("time_period_label")
                .or_else(|| row.get("time_period"))
                .and_then(sql_value_to_string)
                .unwrap_or_default();
            series.push((label, avg));
        }
        if let Some(min) = row.get("min_value").and_then(sql_value_to_f64) {
            mins.push(min);
        }
        if let Some(max) = row.get("max_value").and_then(sql_value_to_f64) {
            maxs.push(max);
        }
        if let Some(count) = row.get("data_points").and_then(sql_value_to_f64) {
            total_count += count as u64;
        }
    }

    let avg = if avgs.is_empty() { None } else { Some(avgs.iter().sum::<f64>() / avgs.len() as f64) };
    let min = mins.into_iter().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
    let max = maxs.into_iter().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

    SensorFigures { latest: None, avg, min, max, count: total_count, unit, series }
}

fn build_metrics(ir: &SemanticIr, rows: &[ResultRow], registry: &OntologyRegistry) -> serde_json::Value {
    if rows.is_empty() {
        return serde_json::Value::Null;
    }
    let sensor_types = distinct_sensor_types(ir, rows);
    let mut out = serde_json::Map::new();
    for sensor_type in sensor_types {
        let figs = figures_for(&sensor_type, ir, rows, registry);
        let mut entry = serde_json::Map::new();
        if let Some(latest) = figs.latest {
            entry.insert("latest".to_string(), serde_json::json!(latest));
        }
        if let Some(avg) = figs.avg {
            entry.insert("avg".to_string(), serde_json::json!(avg));
        }
        if let Some(min) = figs.min {
            entry.insert("min".to_string(), serde_json::json!(min));
        }
        if let Some(max) = figs.max {
            entry.insert("max".to_string(), serde_json::json!(max));
        }
        entry.insert("count".to_string(), serde_json::json!(figs.count));
        if let Some(unit) = &figs.unit {
            entry.insert("unit".to_string(), serde_json::json!(unit));
        }
        if !figs.series.is_empty() {
            let points: Vec<serde_json::Value> = figs
                .series
                .iter()
                .map(|(label, value)| serde_json::json!({"period": label, "value": value}))
                .collect();
            entry.insert("series".to_string(), serde_json::Value::Array(points));
        }
        out.insert(sensor_type, serde_json::Value::Object(entry));
    }
    serde_json::Value::Object(out)
}

/// §8 comparison-block scenario: delta/percent_change are computed from the
/// two extreme points of each sensor's UNION-branch series — "first" and
/// "last" as returned by the query's `ORDER BY time_period_label ASC`, not
/// necessarily the chronologically earliest/latest (the label is lexical,
/// a known simplification recorded in DESIGN.md).
fn build_comparison(ir: &SemanticIr, rows: &[ResultRow]) -> Option<ComparisonBlock> {
    let sensor_types = distinct_sensor_types(ir, rows);
    let mut sensor_comparisons = BTreeMap::new();
    let mut trend_votes: Vec<f64> = Vec::new();

    for sensor_type in &sensor_types {
        let series: Vec<f64> = rows
            .iter()
            .filter(|r| {
                r.get("sensor_type")
                    .and_then(sql_value_to_string)
                    .map(|t| &t == sensor_type)
                    .unwrap_or(sensor_types.len() == 1)
            })
            .filter_map(|r| r.get("avg_value").and_then(sql_value_to_f64))
            .collect();

        if series.len() < 2 {
            continue;
        }
        let first = series[0];
        let last = *series.last().unwrap();
        let delta = last - first;
        let percent_change = if first.abs() > f64::EPSILON { delta / first * 100.0 } else { 0.0 };
        trend_votes.push(delta);
        sensor_comparisons.insert(sensor_type.clone(), SensorComparison { delta, percent_change });
    }

    if sensor_comparisons.is_empty() {
        return None;
    }

    let net: f64 = trend_votes.iter().sum();
    let overall_trend = if net.abs() < 1e-9 {
        "stable"
    } else if net > 0.0 {
        "increasing"
    } else {
        "decreasing"
    }
    .to_string();

    Some(ComparisonBlock { sensor_comparisons, overall_trend })
}

fn build_chart_metadata(ir: &SemanticIr, sensor_types: &[String], data_point_count: u64, chart_type: Option<ChartType>) -> ChartMetadata {
    let title = match chart_type {
        Some(ChartType::Pie) => format!("{} distribution", sensor_types.join(" vs ")),
        Some(ChartType::Bar) => format!("{} comparison", sensor_types.join(" vs ")),
        _ => format!("{} over time", sensor_types.join(", ")),
    };
    let x_label = if ir.grouping == Grouping::None { "time".to_string() } else { "period".to_string() };
    let y_label = sensor_types.first().cloned().unwrap_or_else(|| "value".to_string());
    let palette = sensor_types
        .iter()
        .enumerate()
        .map(|(i, t)| (t.clone(), PALETTE[i % PALETTE.len()].to_string()))
        .collect();

    ChartMetadata {
        title,
        x_label,
        y_label,
        y_unit: None,
        legend: sensor_types.len() > 1,
        palette,
        data_point_count,
    }
}

fn build_summary(
    ir: &SemanticIr,
    metrics: &serde_json::Value,
    comparison: &Option<ComparisonBlock>,
    sensor_types: &[String],
    lang_fa: bool,
    empty: bool,
    registry: &OntologyRegistry,
) -> String {
    if empty || metrics.is_null() {
        return if lang_fa {
            "داده‌ای برای این پرسش یافت نشد.".to_string()
        } else {
            "No data was found for this query.".to_string()
        };
    }

    if let Some(cmp) = comparison {
        let mut parts = Vec::new();
        for (sensor, c) in &cmp.sensor_comparisons {
            let unit = registry.canonical_unit(sensor).unwrap_or_default();
            if lang_fa {
                parts.push(format!("{sensor} به میزان {:.2}{unit} ({:+.1}%) تغییر کرد", c.delta, c.percent_change));
            } else {
                parts.push(format!("{sensor} changed by {:.2}{unit} ({:+.1}%)", c.delta, c.percent_change));
            }
        }
        let trend = &cmp.overall_trend;
        return if lang_fa {
            format!("{}. روند کلی: {}.", parts.join("، "), persian_trend(trend))
        } else {
            format!("{}. Overall trend: {trend}.", parts.join("; "))
        };
    }

    let sensor = sensor_types.first().cloned().unwrap_or_else(|| "sensor".to_string());
    let unit = registry.canonical_unit(&sensor).unwrap_or_default();
    let entry = metrics.get(&sensor);

    if let Some(latest) = entry.and_then(|e| e.get("latest")).and_then(|v| v.as_f64()) {
        return if lang_fa {
            format!("مقدار فعلی {sensor} برابر {latest:.2}{unit} است.")
        } else {
            format!("{sensor} is currently {latest:.2}{unit}.")
        };
    }

    if let Some(avg) = entry.and_then(|e| e.get("avg")).and_then(|v| v.as_f64()) {
        let count = entry.and_then(|e| e.get("count")).and_then(|v| v.as_u64()).unwrap_or(0);
        let agg_word = match ir.aggregation {
            Aggregation::Min => "minimum",
            Aggregation::Max => "maximum",
            _ => "average",
        };
        return if lang_fa {
            format!("{} {sensor} برابر {avg:.2}{unit} بر اساس {count} نمونه است.", persian_agg_word(ir.aggregation))
        } else {
            format!("The {agg_word} {sensor} is {avg:.2}{unit} across {count} data points.")
        };
    }

    if lang_fa {
        format!("داده‌ای برای {sensor} یافت شد.")
    } else {
        format!("Data for {sensor} was found.")
    }
}

fn persian_trend(trend: &str) -> &'static str {
    match trend {
        "increasing" => "افزایشی",
        "decreasing" => "کاهشی",
        _ => "ثابت",
    }
}

fn persian_agg_word(agg: Aggregation) -> &'static str {
    match agg {
        Aggregation::Min => "کمینه",
        Aggregation::Max => "بیشینه",
        _ => "میانگین",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::semantic_ir::{Entity, OutputFormat, RangeToken, TimeRange};
    use rusqlite::Connection;

    fn registry() -> OntologyRegistry {
        OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap()
    }

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

    fn row_with(pairs: &[(&str, SqlValue)]) -> ResultRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_rows_never_invents_a_number() {
        let reg = registry();
        let result = format(FormatterInput {
            query: "what is the temperature",
            translated_query: "what is the temperature",
            lang_fa: false,
            ir: &base_ir(),
            rows: vec![],
            sql: "SELECT 1".to_string(),
            fallback_used: true,
            refined_by_llm: false,
            mapping: None,
            registry: &reg,
        });
        assert!(result.metrics.is_null());
        assert!(!result.summary.chars().any(|c| c.is_ascii_digit()));
    }

    #[test]
    fn current_value_summary_includes_latest_and_unit() {
        let reg = registry();
        let rows = vec![row_with(&[("value", SqlValue::Real(21.7)), ("unit", SqlValue::Text("°C".to_string()))])];
        let result = format(FormatterInput {
            query: "what is the current temperature",
            translated_query: "what is the current temperature",
            lang_fa: false,
            ir: &base_ir(),
            rows,
            sql: "SELECT * FROM sensor_data".to_string(),
            fallback_used: false,
            refined_by_llm: false,
            mapping: None,
            registry: &reg,
        });
        assert!(result.summary.contains("21.7"));
        assert!(result.summary.contains("temperature"));
        assert_eq!(result.validation.data_points, 1);
    }

    #[test]
    fn chart_keyword_sets_chart_requested_and_type() {
        let reg = registry();
        let rows = vec![row_with(&[("value", SqlValue::Real(21.7)), ("unit", SqlValue::Text("°C".to_string()))])];
        let result = format(FormatterInput {
            query: "show me the temperature trend",
            translated_query: "show me the temperature trend",
            lang_fa: false,
            ir: &base_ir(),
            rows,
            sql: "SELECT * FROM sensor_data".to_string(),
            fallback_used: false,
            refined_by_llm: false,
            mapping: None,
            registry: &reg,
        });
        assert!(result.validation.chart_requested);
        assert_eq!(result.chart_type, Some(ChartType::Line));
        assert!(result.chart_metadata.is_some());
    }

    #[test]
    fn comparison_rows_produce_delta_and_trend() {
        let reg = registry();
        let mut ir = base_ir();
        ir.entity = Entity::Single("soil_moisture".to_string());
        ir.comparison = true;
        ir.aggregation = Aggregation::Average;
        ir.time_range = TimeRange::List(vec![RangeToken::LastWeek, RangeToken::ThisWeek]);

        let rows = vec![
            row_with(&[("time_period_label", SqlValue::Text("last_week".to_string())), ("avg_value", SqlValue::Real(40.0))]),
            row_with(&[("time_period_label", SqlValue::Text("this_week".to_string())), ("avg_value", SqlValue::Real(50.0))]),
        ];
        let result = format(FormatterInput {
            query: "compare soil moisture this week vs last week",
            translated_query: "compare soil moisture this week vs last week",
            lang_fa: false,
            ir: &ir,
            rows,
            sql: "SELECT ...".to_string(),
            fallback_used: false,
            refined_by_llm: false,
            mapping: None,
            registry: &reg,
        });
        let cmp = result.comparison.unwrap();
        let sm = &cmp.sensor_comparisons["soil_moisture"];
        assert_eq!(sm.delta, 10.0);
        assert_eq!(cmp.overall_trend, "increasing");
    }
}
