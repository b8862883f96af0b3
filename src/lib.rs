pub mod alerts;
pub mod config;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod formatter;
pub mod handlers;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod ontology;
pub mod query_builder;
pub mod router;
pub mod semantic;
pub mod sensor_store;
pub mod session_store;
pub mod time_window;

use alerts::AlertEngine;
use ingestion::IngestionPipeline;
use llm::ChatClient;
use ontology::OntologyRegistry;
use router::IntentRouter;
use sensor_store::SensorStore;
use session_store::SessionStore;
use std::sync::Arc;

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SensorStore>,
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<OntologyRegistry>,
    pub llm: Arc<dyn ChatClient>,
    pub ingestion: IngestionPipeline,
    pub router: Arc<IntentRouter>,
    pub alert_engine: Arc<AlertEngine>,
}
