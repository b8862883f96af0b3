use serde::Serialize;
use serde_json::Value;

/// Validation/provenance block — always present in the unified result.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationBlock {
    pub query_valid: bool,
    pub execution_success: bool,
    pub data_points: u64,
    pub sensor_types: Vec<String>,
    pub chart_requested: bool,
    pub mapping: Option<String>,
    pub fallback_used: bool,
    pub refined_by_llm: bool,
    pub semantic_json: Option<Value>,
    pub error_details: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Histogram,
    Pie,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartMetadata {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub y_unit: Option<String>,
    pub legend: bool,
    pub palette: Vec<(String, String)>,
    pub data_point_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorComparison {
    pub delta: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonBlock {
    pub sensor_comparisons: std::collections::BTreeMap<String, SensorComparison>,
    pub overall_trend: String,
}

/// The unified result schema (§4.9). Every field is always present; nulls
/// are explicit sentinels rather than absent keys.
#[derive(Debug, Clone, Serialize)]
pub struct AskResult {
    pub success: bool,
    pub summary: String,
    pub metrics: Value,
    pub raw_data: Vec<Value>,
    pub chart: Option<Value>,
    pub chart_type: Option<ChartType>,
    pub chart_metadata: Option<ChartMetadata>,
    pub comparison: Option<ComparisonBlock>,
    pub sql: Option<String>,
    pub translated_query: Option<String>,
    pub feature_context: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub validation: ValidationBlock,
}

impl AskResult {
    pub fn error(err: &crate::error::CoreError, lang: &str, sensor_hint: Option<&str>, window_hint: Option<&str>) -> Self {
        let (en, fa) = err.bilingual_summary(sensor_hint, window_hint);
        let summary = if lang == "fa" { fa } else { en };
        AskResult {
            success: false,
            summary,
            metrics: Value::Null,
            raw_data: vec![],
            chart: None,
            chart_type: None,
            chart_metadata: None,
            comparison: None,
            sql: None,
            translated_query: None,
            feature_context: None,
            timestamp: chrono::Utc::now(),
            validation: ValidationBlock {
                query_valid: !matches!(err, crate::error::CoreError::ValidationError(_)),
                execution_success: false,
                data_points: 0,
                sensor_types: vec![],
                chart_requested: false,
                mapping: None,
                fallback_used: false,
                refined_by_llm: false,
                semantic_json: None,
                error_details: Some(ErrorDetails {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }),
            },
        }
    }
}

/// A single server-sent event frame in the `ask_stream` protocol (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Progress { step: i32, message: String, progress: i32 },
    Token { step: i32, token: String, accumulated: String, progress: i32 },
    Complete { step: &'static str, result: AskResult },
}
