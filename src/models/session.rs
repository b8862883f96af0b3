use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single Session Store row (C4). Insertion-ordered per session; only the
/// most recent `k` are considered for conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub query: String,
    pub response: String,
    pub sql: Option<String>,
    pub semantic_ir: Option<String>,
    pub metrics: Option<String>,
    pub chart: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub total_queries: i64,
}
