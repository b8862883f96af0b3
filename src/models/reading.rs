use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed row in the Sensor Store. Append-only: never updated after
/// insertion. `(sensor_type, timestamp, value)` need not be unique — distinct
/// `id`s always disambiguate duplicate readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub source: String,
    pub raw: String,
}

/// Raw, pre-validation record accepted by the Ingestion Pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub sensor: String,
    pub value: serde_json::Value,
    pub unit: Option<String>,
    /// RFC3339, bare epoch seconds, or omitted (⇒ "now").
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub extras: serde_json::Value,
}

/// Why a raw record was rejected before ever touching the store. Kinds, not
/// strings — callers match on these, the Display impl is for logs only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum RejectionReason {
    MissingValue,
    NonFiniteValue,
    UnknownSensor(String),
    OutOfPhysicalRange { min: f64, max: f64, value: f64 },
    OutOfSensorBounds { min: f64, max: f64, value: f64 },
    ExtremeMagnitude(f64),
    ExcessivePrecision(u32),
    InvalidTimestamp(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::MissingValue => write!(f, "missing or non-numeric value"),
            RejectionReason::NonFiniteValue => write!(f, "non-finite value"),
            RejectionReason::UnknownSensor(s) => write!(f, "unknown sensor '{s}'"),
            RejectionReason::OutOfPhysicalRange { min, max, value } => {
                write!(f, "value {value} outside plausible range [{min}, {max}]")
            }
            RejectionReason::OutOfSensorBounds { min, max, value } => {
                write!(f, "value {value} outside sensor-specific bounds [{min}, {max}]")
            }
            RejectionReason::ExtremeMagnitude(v) => write!(f, "extreme magnitude {v}"),
            RejectionReason::ExcessivePrecision(digits) => {
                write!(f, "suspiciously high precision ({digits} fractional digits)")
            }
            RejectionReason::InvalidTimestamp(s) => write!(f, "invalid timestamp '{s}'"),
        }
    }
}

/// Outcome of a single `ingest()` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum IngestOutcome {
    /// Queued for the single-writer batch; not yet committed (not visible to
    /// reads until its enclosing batch flushes).
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected")]
    Rejected { reason: RejectionReason },
}
