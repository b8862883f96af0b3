//! C2 — Ingestion Pipeline: validate, normalize and batch raw readings
//! behind a single-writer queue, with unit conversion and a bounded
//! backpressure channel ahead of the batched commit.

use crate::models::reading::{IngestOutcome, RawReading, Reading, RejectionReason};
use crate::ontology::OntologyRegistry;
use crate::sensor_store::SensorStore;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration};

/// One validated-and-normalized item plus a channel back to the caller so
/// `ingest()` can report accepted/rejected without waiting for the batch
/// to actually flush.
struct QueueItem {
    reading: Reading,
    ack: oneshot::Sender<()>,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    tx: mpsc::Sender<QueueItem>,
    registry: Arc<OntologyRegistry>,
}

pub struct IngestionHandle {
    pub pipeline: IngestionPipeline,
}

impl IngestionPipeline {
    /// Spawns the single writer task and returns a cloneable handle.
    /// `queue_capacity` bounds the mpsc channel (backpressure: `send`
    /// blocks once full, per §4.2's explicit-backpressure contract).
    pub fn spawn(
        store: Arc<SensorStore>,
        registry: Arc<OntologyRegistry>,
        queue_capacity: usize,
        batch_size: usize,
        flush_interval_ms: u64,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        tokio::spawn(writer_loop(store, rx, batch_size, flush_interval_ms));
        Self { tx, registry }
    }

    /// Validates and normalizes a raw record, then enqueues it. Returns
    /// the outcome immediately for rejections; for accepted records it
    /// returns `Accepted` once the item is durably enqueued (not yet
    /// committed — visibility is defined by batch flush, per §5).
    pub async fn ingest(&self, raw: RawReading) -> IngestOutcome {
        match validate_and_normalize(&raw, &self.registry) {
            Ok(reading) => {
                let (ack_tx, ack_rx) = oneshot::channel();
                if self
                    .tx
                    .send(QueueItem { reading, ack: ack_tx })
                    .await
                    .is_err()
                {
                    tracing::error!("ingestion writer task is gone; dropping reading");
                    return IngestOutcome::Rejected {
                        reason: RejectionReason::InvalidTimestamp("writer unavailable".to_string()),
                    };
                }
                let _ = ack_rx.await;
                IngestOutcome::Accepted
            }
            Err(reason) => {
                tracing::warn!(sensor = %raw.sensor, %reason, "rejected raw reading");
                IngestOutcome::Rejected { reason }
            }
        }
    }
}

/// Pure validation/normalization step, §4.2. Kept free of I/O so it is
/// directly unit-testable.
fn validate_and_normalize(raw: &RawReading, registry: &OntologyRegistry) -> Result<Reading, RejectionReason> {
    let value = match &raw.value {
        Value::Number(n) => n.as_f64().ok_or(RejectionReason::MissingValue)?,
        _ => return Err(RejectionReason::MissingValue),
    };
    if !value.is_finite() {
        return Err(RejectionReason::NonFiniteValue);
    }

    if !registry.is_canonical(&raw.sensor) {
        return Err(RejectionReason::UnknownSensor(raw.sensor.clone()));
    }

    let (converted, canonical_unit) = convert_unit(&raw.sensor, value, raw.unit.as_deref(), registry)?;

    if converted.abs() > 1.0e6 {
        return Err(RejectionReason::ExtremeMagnitude(converted));
    }
    let fractional_digits = count_fractional_digits(value);
    if fractional_digits > 10 {
        return Err(RejectionReason::ExcessivePrecision(fractional_digits));
    }

    if let Some(range) = registry.plausible_range(&raw.sensor) {
        if converted < range.min || converted > range.max {
            return Err(RejectionReason::OutOfPhysicalRange { min: range.min, max: range.max, value: converted });
        }
    }
    check_sensor_specific_bounds(&raw.sensor, converted)?;

    let timestamp = parse_timestamp(raw.timestamp.as_ref())?;
    let rounded = (converted * 100.0).round() / 100.0;

    Ok(Reading {
        id: 0,
        timestamp,
        sensor_type: raw.sensor.clone(),
        value: rounded,
        unit: canonical_unit,
        source: raw.source.clone().unwrap_or_else(|| "pipeline".to_string()),
        raw: serde_json::to_string(raw).unwrap_or_else(|_| "{}".to_string()),
    })
}

/// A stricter check than the ontology's general plausible range, for a
/// handful of sensors with well-known physical limits.
fn check_sensor_specific_bounds(sensor_type: &str, value: f64) -> Result<(), RejectionReason> {
    let bounds: Option<(f64, f64)> = match sensor_type {
        "humidity" => Some((0.0, 100.0)),
        "soil_moisture" => Some((0.0, 100.0)),
        "soil_ph" => Some((0.0, 14.0)),
        "pressure" => Some((800.0, 1200.0)),
        "pest_count" => Some((0.0, f64::MAX)),
        "temperature" | "soil_temperature" => Some((-50.0, 70.0)),
        _ => None,
    };
    if let Some((min, max)) = bounds {
        if value < min || value > max {
            return Err(RejectionReason::OutOfSensorBounds { min, max, value });
        }
    }
    Ok(())
}

fn count_fractional_digits(value: f64) -> u32 {
    let s = format!("{value}");
    match s.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Converts `value` (in `unit`, if given) to the sensor's canonical unit.
/// Conversion table per §4.2.
fn convert_unit(
    sensor_type: &str,
    value: f64,
    unit: Option<&str>,
    registry: &OntologyRegistry,
) -> Result<(f64, String), RejectionReason> {
    let canonical = registry
        .canonical_unit(sensor_type)
        .ok_or_else(|| RejectionReason::UnknownSensor(sensor_type.to_string()))?;

    let Some(unit) = unit else {
        return Ok((value, canonical));
    };

    let converted = match (unit, canonical.as_str()) {
        ("°F", "°C") | ("F", "°C") => (value - 32.0) * 5.0 / 9.0,
        ("K", "°C") => value - 273.15,
        ("Pa", "hPa") => value / 100.0,
        ("bar", "hPa") => value * 1000.0,
        ("km/h", "m/s") => value / 3.6,
        ("mph", "m/s") => value * 0.44704,
        ("in", "cm") | ("inches", "cm") => value * 2.54,
        ("gal", "L") | ("gallons", "L") => value * 3.78541,
        ("lb", "kg") | ("lbs", "kg") => value * 0.453592,
        ("W", "kWh") => value / 1000.0,
        (u, c) if u == c => value,
        _ => value,
    };
    Ok((converted, canonical))
}

/// Epoch seconds, RFC3339, or absent (⇒ now). Naive timestamps are
/// stamped UTC; epoch numbers are seconds since UTC epoch.
fn parse_timestamp(raw: Option<&Value>) -> Result<DateTime<Utc>, RejectionReason> {
    match raw {
        None => Ok(Utc::now()),
        Some(Value::Null) => Ok(Utc::now()),
        Some(Value::Number(n)) => {
            let secs = n.as_f64().ok_or_else(|| RejectionReason::InvalidTimestamp(n.to_string()))?;
            Utc.timestamp_opt(secs.trunc() as i64, ((secs.fract()) * 1e9) as u32)
                .single()
                .ok_or_else(|| RejectionReason::InvalidTimestamp(n.to_string()))
        }
        Some(Value::String(s)) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                Ok(dt.with_timezone(&Utc))
            } else if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                Ok(Utc.from_utc_datetime(&naive))
            } else {
                Err(RejectionReason::InvalidTimestamp(s.clone()))
            }
        }
        Some(other) => Err(RejectionReason::InvalidTimestamp(other.to_string())),
    }
}

/// The single writer task: drains `rx`, flushing on batch-size or timer,
/// whichever comes first. Retries a failed flush with exponential
/// backoff (base 100ms, cap 3 tries) per §4.2; drains remaining items on
/// channel close before exiting.
async fn writer_loop(store: Arc<SensorStore>, mut rx: mpsc::Receiver<QueueItem>, batch_size: usize, flush_interval_ms: u64) {
    let mut batch: Vec<QueueItem> = Vec::with_capacity(batch_size);
    let mut ticker = interval(Duration::from_millis(flush_interval_ms));
    ticker.tick().await; // first tick fires immediately; discard

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(item) => {
                        batch.push(item);
                        if batch.len() >= batch_size {
                            flush(&store, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&store, &mut batch).await;
                        tracing::info!("ingestion writer shutting down, queue drained");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&store, &mut batch).await;
                }
            }
        }
    }
}

async fn flush(store: &Arc<SensorStore>, batch: &mut Vec<QueueItem>) {
    if batch.is_empty() {
        return;
    }
    let readings: Vec<Reading> = batch.iter().map(|item| item.reading.clone()).collect();
    let store = store.clone();
    let mut delay_ms = 100u64;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let readings = readings.clone();
        let result = tokio::task::spawn_blocking(move || store.insert_batch(&readings)).await;
        match result {
            Ok(Ok(())) => break,
            Ok(Err(err)) if attempt < 3 => {
                tracing::warn!(%err, attempt, "batch flush failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
            Ok(Err(err)) => {
                tracing::error!(%err, "batch flush failed after retries, dropping batch");
                break;
            }
            Err(join_err) => {
                tracing::error!(%join_err, "batch flush task panicked");
                break;
            }
        }
    }
    for item in batch.drain(..) {
        let _ = item.ack.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;

    fn test_registry() -> Arc<OntologyRegistry> {
        Arc::new(OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap())
    }

    #[test]
    fn fahrenheit_converts_to_celsius() {
        let registry = test_registry();
        let (v, unit) = convert_unit("temperature", 98.6, Some("°F"), &registry).unwrap();
        assert!((v - 37.0).abs() < 0.01);
        assert_eq!(unit, "°C");
    }

    #[test]
    fn kelvin_converts_to_celsius() {
        let registry = test_registry();
        let (v, _) = convert_unit("temperature", 0.0, Some("K"), &registry).unwrap();
        assert!((v - (-273.15)).abs() < 0.01);
    }

    #[test]
    fn rejects_unknown_sensor() {
        let registry = test_registry();
        let raw = RawReading {
            sensor: "flux_capacitor".to_string(),
            value: json!(1.0),
            unit: None,
            timestamp: None,
            source: None,
            extras: Value::Null,
        };
        let result = validate_and_normalize(&raw, &registry);
        assert!(matches!(result, Err(RejectionReason::UnknownSensor(_))));
    }

    #[test]
    fn rejects_humidity_out_of_bounds() {
        let registry = test_registry();
        let raw = RawReading {
            sensor: "humidity".to_string(),
            value: json!(150.0),
            unit: None,
            timestamp: None,
            source: None,
            extras: Value::Null,
        };
        let result = validate_and_normalize(&raw, &registry);
        assert!(matches!(result, Err(RejectionReason::OutOfPhysicalRange { .. })));
    }

    #[test]
    fn rejects_non_finite_value() {
        let registry = test_registry();
        let raw = RawReading {
            sensor: "temperature".to_string(),
            value: json!(f64::NAN),
            unit: None,
            timestamp: None,
            source: None,
            extras: Value::Null,
        };
        assert!(matches!(validate_and_normalize(&raw, &registry), Err(RejectionReason::MissingValue)));
    }

    #[test]
    fn accepts_well_formed_reading() {
        let registry = test_registry();
        let raw = RawReading {
            sensor: "temperature".to_string(),
            value: json!(21.734),
            unit: None,
            timestamp: None,
            source: Some("greenhouse-1".to_string()),
            extras: Value::Null,
        };
        let reading = validate_and_normalize(&raw, &registry).unwrap();
        assert_eq!(reading.value, 21.73);
        assert_eq!(reading.unit, "°C");
    }

    #[tokio::test]
    async fn pipeline_ingests_and_commits() {
        let store = Arc::new(SensorStore::open_in_memory().unwrap());
        let registry = test_registry();
        let pipeline = IngestionPipeline::spawn(store.clone(), registry, 100, 5, 50);
        let raw = RawReading {
            sensor: "temperature".to_string(),
            value: json!(22.0),
            unit: None,
            timestamp: None,
            source: None,
            extras: Value::Null,
        };
        let outcome = pipeline.ingest(raw).await;
        assert!(matches!(outcome, IngestOutcome::Accepted));
        tokio::time::sleep(Duration::from_millis(150)).await;
        let rows = store.query("SELECT * FROM sensor_data", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
