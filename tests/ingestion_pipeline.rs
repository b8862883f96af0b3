use rusqlite::Connection;
use sensorsage::ingestion::IngestionPipeline;
use sensorsage::models::reading::{IngestOutcome, RawReading, RejectionReason};
use sensorsage::ontology::OntologyRegistry;
use sensorsage::sensor_store::SensorStore;
use std::sync::Arc;

fn pipeline() -> (Arc<SensorStore>, IngestionPipeline) {
    let store = Arc::new(SensorStore::open_in_memory().unwrap());
    let registry = Arc::new(OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap());
    let pipeline = IngestionPipeline::spawn(store.clone(), registry, 32, 1, 20);
    (store, pipeline)
}

#[tokio::test]
async fn accepted_reading_is_visible_in_the_store() {
    let (store, pipeline) = pipeline();

    let outcome = pipeline
        .ingest(RawReading {
            sensor: "temperature".to_string(),
            value: serde_json::json!(21.5),
            unit: None,
            timestamp: None,
            source: None,
            extras: serde_json::Value::Null,
        })
        .await;

    assert!(matches!(outcome, IngestOutcome::Accepted));

    let latest = store.latest_reading("temperature").unwrap();
    assert!(latest.is_some());
    assert_eq!(latest.unwrap().0, 21.5);
}

#[tokio::test]
async fn fahrenheit_reading_is_converted_to_celsius() {
    let (store, pipeline) = pipeline();

    let outcome = pipeline
        .ingest(RawReading {
            sensor: "temperature".to_string(),
            value: serde_json::json!(98.6),
            unit: Some("F".to_string()),
            timestamp: None,
            source: None,
            extras: serde_json::Value::Null,
        })
        .await;

    assert!(matches!(outcome, IngestOutcome::Accepted));

    let (value, _) = store.latest_reading("temperature").unwrap().unwrap();
    assert!((value - 37.0).abs() < 0.1);
}

#[tokio::test]
async fn unknown_sensor_is_rejected() {
    let (_store, pipeline) = pipeline();

    let outcome = pipeline
        .ingest(RawReading {
            sensor: "tomato_price".to_string(),
            value: serde_json::json!(3.0),
            unit: None,
            timestamp: None,
            source: None,
            extras: serde_json::Value::Null,
        })
        .await;

    match outcome {
        IngestOutcome::Rejected { reason: RejectionReason::UnknownSensor(s) } => assert_eq!(s, "tomato_price"),
        other => panic!("expected UnknownSensor rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn out_of_sensor_bounds_reading_is_rejected() {
    let (store, pipeline) = pipeline();

    let outcome = pipeline
        .ingest(RawReading {
            sensor: "humidity".to_string(),
            value: serde_json::json!(140.0),
            unit: None,
            timestamp: None,
            source: None,
            extras: serde_json::Value::Null,
        })
        .await;

    assert!(matches!(outcome, IngestOutcome::Rejected { reason: RejectionReason::OutOfSensorBounds { .. } }));
    assert!(store.latest_reading("humidity").unwrap().is_none());
}
