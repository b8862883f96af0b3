use sensorsage::config::SensorSageConfig;
use sensorsage::session_store::SessionStore;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Standalone Session Store TTL sweeper, for operators who want it
/// decoupled from the API process.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sensorsage=info")))
        .init();

    let config_path = std::env::var("SENSORSAGE_CONFIG").unwrap_or_else(|_| "sensorsage.toml".to_string());
    let config = SensorSageConfig::load(&config_path)?;

    let sessions = SessionStore::open(&config.store.path)?;
    tracing::info!(path = %config.store.path, "session-sweeper opened store");

    let mut ticker = tokio::time::interval(Duration::from_secs(config.session.sweep_interval_secs.max(1)));
    loop {
        ticker.tick().await;
        match sessions.sweep(config.session.ttl_min, config.session.retain_days) {
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
}
