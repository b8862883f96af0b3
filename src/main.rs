use axum::routing::{delete, get, post};
use axum::Router;
use rusqlite::Connection;
use sensorsage::alerts::AlertEngine;
use sensorsage::config::SensorSageConfig;
use sensorsage::handlers;
use sensorsage::ingestion::IngestionPipeline;
use sensorsage::llm::{ChatClient, HttpChatClient, UnavailableChatClient};
use sensorsage::ontology::OntologyRegistry;
use sensorsage::router::IntentRouter;
use sensorsage::sensor_store::SensorStore;
use sensorsage::session_store::SessionStore;
use sensorsage::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sensorsage=info,tower_http=info")))
        .init();

    let config_path = std::env::var("SENSORSAGE_CONFIG").unwrap_or_else(|_| "sensorsage.toml".to_string());
    let config = SensorSageConfig::load(&config_path)?;

    let store = Arc::new(SensorStore::open(&config.store.path)?);
    tracing::info!(path = %config.store.path, "sensor store opened");

    let sessions = Arc::new(SessionStore::open(&config.store.path)?);

    let ontology_conn = Connection::open(&config.store.path)?;
    let registry = Arc::new(OntologyRegistry::open(ontology_conn)?);

    let llm: Arc<dyn ChatClient> = if config.llm.api_key.is_some() {
        Arc::new(HttpChatClient::new(
            config.llm.endpoint.clone(),
            config.llm.model.clone(),
            config.llm.api_key.clone(),
            config.llm.temperature,
        ))
    } else {
        tracing::warn!("no llm api key configured, llm-assisted paths will use deterministic fallbacks");
        Arc::new(UnavailableChatClient)
    };

    let ingestion = IngestionPipeline::spawn(
        store.clone(),
        registry.clone(),
        config.ingest.queue_capacity,
        config.ingest.batch_size,
        config.ingest.flush_interval_ms,
    );

    let router = Arc::new(IntentRouter::new(
        store.clone(),
        sessions.clone(),
        registry.clone(),
        llm.clone(),
        config.session.context_turns,
    ));

    let alert_engine = Arc::new(AlertEngine::new(
        store.clone(),
        sessions.clone(),
        config.smtp.clone(),
        config.alert.suppress_secs,
    ));

    spawn_alert_evaluation_loop(alert_engine.clone(), config.alert.eval_interval_secs);
    spawn_session_sweep_loop(sessions.clone(), config.session.ttl_min, config.session.retain_days, config.session.sweep_interval_secs);

    let state = AppState {
        store,
        sessions,
        registry,
        llm,
        ingestion,
        router,
        alert_engine,
    };

    let app = Router::new()
        .route("/api/v1/ask", post(handlers::query::ask))
        .route("/api/v1/ask/stream", post(handlers::query::ask_stream))
        .route("/api/v1/ingest", post(handlers::ingest::ingest))
        .route("/api/v1/alerts", get(handlers::alerts::list_alerts).post(handlers::alerts::create_alert))
        .route("/api/v1/alerts/monitor", get(handlers::alerts::monitor_alerts))
        .route("/api/v1/alerts/{id}", delete(handlers::alerts::delete_alert))
        .route("/api/v1/alerts/{id}/actions", get(handlers::alerts::list_actions))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port: u16 = std::env::var("SENSORSAGE_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("sensorsage listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic alert evaluation tick.
fn spawn_alert_evaluation_loop(engine: Arc<AlertEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            match engine.evaluate_all().await {
                Ok(triggered) if !triggered.is_empty() => {
                    tracing::info!(count = triggered.len(), "alert evaluation tick triggered alerts");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(%err, "alert evaluation tick failed"),
            }
        }
    });
}

/// Marks idle sessions inactive and deletes turns past retention.
fn spawn_session_sweep_loop(sessions: Arc<SessionStore>, ttl_min: i64, retain_days: i64, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            match sessions.sweep(ttl_min, retain_days) {
                Ok(outcome) => {
                    if outcome.marked_inactive > 0 || outcome.deleted_turns > 0 {
                        tracing::info!(
                            marked_inactive = outcome.marked_inactive,
                            deleted_turns = outcome.deleted_turns,
                            "session sweep completed"
                        );
                    }
                }
                Err(err) => tracing::error!(%err, "session sweep failed"),
            }
        }
    });
}
