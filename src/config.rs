use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `sensorsage.toml`, overridden by environment
/// variables read at process start (secrets in particular never live in the
/// TOML file).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SensorSageConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Never read from the TOML file; populated from `SENSORSAGE_LLM_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "sensorsage-translator".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

fn default_store_path() -> String {
    "./sensorsage.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    2000
}
fn default_queue_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_min")]
    pub ttl_min: i64,
    #[serde(default = "default_session_retain_days")]
    pub retain_days: i64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_context_turns")]
    pub context_turns: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_min: default_session_ttl_min(),
            retain_days: default_session_retain_days(),
            sweep_interval_secs: default_sweep_secs(),
            context_turns: default_context_turns(),
        }
    }
}

fn default_session_ttl_min() -> i64 {
    30
}
fn default_session_retain_days() -> i64 {
    7
}
fn default_sweep_secs() -> u64 {
    60
}
fn default_context_turns() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_suppress_secs")]
    pub suppress_secs: i64,
    #[serde(default = "default_eval_interval_secs")]
    pub eval_interval_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            suppress_secs: default_suppress_secs(),
            eval_interval_secs: default_eval_interval_secs(),
        }
    }
}

fn default_suppress_secs() -> i64 {
    300
}
fn default_eval_interval_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SmtpConfig {
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: Option<String>,
    #[serde(skip)]
    pub pass: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_from() -> String {
    "sensorsage@localhost".to_string()
}

impl SensorSageConfig {
    /// Load config from a TOML file (defaults if missing), then layer in
    /// environment-variable overrides for secrets and connection settings.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: SensorSageConfig = toml::from_str(&contents)?;
            tracing::info!("loaded config from {}", path.display());
            config
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(v) = std::env::var("SENSORSAGE_STORE_PATH") {
            config.store.path = v;
        }
        if let Ok(v) = std::env::var("SENSORSAGE_LLM_ENDPOINT") {
            config.llm.endpoint = v;
        }
        if let Ok(v) = std::env::var("SENSORSAGE_LLM_MODEL") {
            config.llm.model = v;
        }
        config.llm.api_key = std::env::var("SENSORSAGE_LLM_API_KEY").ok();
        config.smtp.host = std::env::var("SENSORSAGE_SMTP_HOST").ok().or(config.smtp.host);
        config.smtp.pass = std::env::var("SENSORSAGE_SMTP_PASS").ok();
        if let Ok(v) = std::env::var("SENSORSAGE_SMTP_USER") {
            config.smtp.user = Some(v);
        }

        Ok(config)
    }
}
