use rusqlite::Connection;
use sensorsage::ingestion::IngestionPipeline;
use sensorsage::llm::{ChatClient, UnavailableChatClient};
use sensorsage::models::reading::RawReading;
use sensorsage::ontology::OntologyRegistry;
use sensorsage::router::IntentRouter;
use sensorsage::sensor_store::SensorStore;
use sensorsage::session_store::SessionStore;
use std::sync::Arc;

struct Harness {
    router: Arc<IntentRouter>,
    sessions: Arc<SessionStore>,
}

async fn harness() -> Harness {
    let store = Arc::new(SensorStore::open_in_memory().unwrap());
    let sessions = Arc::new(SessionStore::open_in_memory().unwrap());
    let registry = Arc::new(OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap());
    let llm: Arc<dyn ChatClient> = Arc::new(UnavailableChatClient);

    let ingestion = IngestionPipeline::spawn(store.clone(), registry.clone(), 32, 1, 20);
    for value in [18.0, 22.0, 26.0] {
        ingestion
            .ingest(RawReading {
                sensor: "temperature".to_string(),
                value: serde_json::json!(value),
                unit: None,
                timestamp: None,
                source: None,
                extras: serde_json::Value::Null,
            })
            .await;
    }

    let router = Arc::new(IntentRouter::new(store, sessions.clone(), registry, llm, 5));
    Harness { router, sessions }
}

#[tokio::test]
async fn data_query_returns_a_summary_built_from_ingested_readings() {
    let h = harness().await;

    let result = h.router.ask("session-1", "what is the average temperature today").await;

    assert!(result.success, "expected success, got summary: {}", result.summary);
    assert!(result.sql.is_some());
    assert!(result.validation.query_valid);
    assert!(result.validation.execution_success);
    assert!(result.validation.data_points > 0);
    assert!(result.validation.sensor_types.iter().any(|s| s == "temperature"));

    let turns = h.sessions.recent_turns("session-1", 10).unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].query, "what is the average temperature today");
}

#[tokio::test]
async fn alert_management_intent_creates_a_persisted_alert() {
    let h = harness().await;

    let result = h.router.ask("session-2", "alert me when temperature exceeds 30").await;

    assert!(result.success, "expected success, got summary: {}", result.summary);

    let alerts = h.sessions.list_alerts("session-2").unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sensor_type, "temperature");
    assert_eq!(alerts[0].threshold, 30.0);
}

#[tokio::test]
async fn empty_query_is_rejected_without_touching_the_store() {
    let h = harness().await;

    let result = h.router.ask("session-3", "   ").await;

    assert!(!result.success);
    assert!(h.sessions.recent_turns("session-3", 10).unwrap().is_empty());
}

#[tokio::test]
async fn query_for_an_unmentioned_sensor_falls_back_to_an_error_result() {
    let h = harness().await;

    let result = h.router.ask("session-4", "what is the wind speed right now").await;

    assert!(!result.success);
    assert!(!result.summary.is_empty());
}
