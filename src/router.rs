//! C8 — Intent Router: the single entry point `ask`/`ask_stream` wire up
//! against. Classifies the free-form question, dispatches to the data-query
//! pipeline (C5 -> C6 -> C7/fallback -> C10) or to alert creation (C9), and
//! persists the resulting turn, as an explicit state machine driving the
//! stream protocol's progress/token/complete framing.

use crate::alerts;
use crate::error::CoreError;
use crate::fallback;
use crate::formatter::{self, FormatterInput};
use crate::llm::ChatClient;
use crate::models::response::{AskResult, StreamFrame, ValidationBlock};
use crate::models::session::ConversationTurn;
use crate::ontology::{Locale, OntologyRegistry};
use crate::semantic::language::{self, Lang};
use crate::semantic::SemanticTranslator;
use crate::sensor_store::SensorStore;
use crate::session_store::SessionStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The request lifecycle §6 describes. Each edge is logged so a stuck or
/// misrouted request can be traced from a single `tracing` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterState {
    Received,
    LangDetected,
    Translated,
    ContextLoaded,
    IntentClassified,
    Routed,
    Responded,
    Failed,
}

fn transition(from: RouterState, to: RouterState) -> RouterState {
    tracing::info!(?from, ?to, "router state transition");
    to
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    DataQuery,
    AlertManagement,
    Mixed,
}

const SQL_DANGER_CUES: &[&str] = &["drop table", "delete from", "insert into", "update ", "alter table", "; --", "truncate"];
const ALERT_CUES: &[&str] = &[
    "alert me", "notify me", "let me know", "warn me", "email me when", "text me when", "alert when",
    "هشدار بده", "اطلاع بده", "خبرم کن", "هشدار بفرست",
];
const REASONING_CUES: &[&str] = &[
    "why", "because", "explain", "recommend", "should i", "what should", "how can i", "suggest",
    "چرا", "توصیه", "پیشنهاد", "چه کنم",
];

/// Priority order: a denylist SQL keyword always stays `DataQuery` so it is
/// routed through the normal compile/validate path and rejected there with
/// a `ValidationError`, rather than being misrouted as an alert. Only then
/// do alert and reasoning cues apply.
fn classify_intent(text: &str, registry: &OntologyRegistry) -> Intent {
    let lower = text.to_lowercase();
    if SQL_DANGER_CUES.iter().any(|kw| lower.contains(kw)) {
        return Intent::DataQuery;
    }

    let has_number = text.chars().any(|c| c.is_ascii_digit());
    if has_number && ALERT_CUES.iter().any(|cue| lower.contains(cue)) {
        return Intent::AlertManagement;
    }

    let has_sensor_term = !registry.find_mentions(&lower, Locale::En).is_empty() || !registry.find_mentions(text, Locale::Fa).is_empty();
    if has_sensor_term && REASONING_CUES.iter().any(|cue| lower.contains(cue)) {
        return Intent::Mixed;
    }

    Intent::DataQuery
}

const MIXED_SYSTEM_PROMPT: &str = "You write an analysis of agricultural sensor data using ONLY the numbers given \
to you. Never invent a number not present in the input. Structure your reply with exactly these section headers, \
each on its own line: Summary, Data, Analysis, Recommendations.";

pub struct IntentRouter {
    translator: SemanticTranslator,
    store: Arc<SensorStore>,
    sessions: Arc<SessionStore>,
    registry: Arc<OntologyRegistry>,
    llm: Arc<dyn ChatClient>,
    context_turns: i64,
}

impl IntentRouter {
    pub fn new(
        store: Arc<SensorStore>,
        sessions: Arc<SessionStore>,
        registry: Arc<OntologyRegistry>,
        llm: Arc<dyn ChatClient>,
        context_turns: i64,
    ) -> Self {
        let translator = SemanticTranslator::new(registry.clone(), llm.clone());
        Self { translator, store, sessions, registry, llm, context_turns }
    }

    /// §6 `ask`. Never returns an `Err` — every failure is folded into
    /// `AskResult::error` so the caller always has one response shape.
    pub async fn ask(&self, session_id: &str, query: &str) -> AskResult {
        let state = transition(RouterState::Received, RouterState::Received);
        if query.trim().is_empty() {
            transition(state, RouterState::Failed);
            return AskResult::error(&CoreError::BadRequest, "en", None, None);
        }

        let lang = language::detect(query);
        let state = transition(state, RouterState::LangDetected);

        let intent = classify_intent(query, &self.registry);
        transition(state, RouterState::IntentClassified);

        let result = match intent {
            Intent::AlertManagement => self.handle_alert_management(session_id, query, lang).await,
            Intent::DataQuery | Intent::Mixed => self.handle_data_query(session_id, query, intent == Intent::Mixed, lang).await,
        };
        transition(RouterState::IntentClassified, RouterState::Routed);

        self.persist_turn(session_id, query, &result);
        transition(RouterState::Routed, RouterState::Responded);
        result
    }

    /// §6 `ask_stream`. Progress/token/complete frames, each serialized to
    /// one JSON line. The `[DONE]` terminator is sent from `DoneGuard`'s
    /// `Drop`, which runs even if the receiving task aborts this one
    /// mid-stream, so cancellation never starves the client of a terminator.
    pub fn ask_stream(self: Arc<Self>, session_id: String, query: String) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let _guard = DoneGuard(tx.clone());

            send_frame(&tx, StreamFrame::Progress { step: 1, message: "interpreting question".to_string(), progress: 10 }).await;
            if query.trim().is_empty() {
                let result = AskResult::error(&CoreError::BadRequest, "en", None, None);
                send_frame(&tx, StreamFrame::Complete { step: "complete", result }).await;
                return;
            }

            let lang = language::detect(&query);
            let intent = classify_intent(&query, &self.registry);
            send_frame(&tx, StreamFrame::Progress { step: 2, message: "routing intent".to_string(), progress: 30 }).await;

            let result = match intent {
                Intent::AlertManagement => self.handle_alert_management(&session_id, &query, lang).await,
                Intent::DataQuery | Intent::Mixed => {
                    send_frame(&tx, StreamFrame::Progress { step: 3, message: "compiling and executing query".to_string(), progress: 55 }).await;
                    self.handle_data_query(&session_id, &query, intent == Intent::Mixed, lang).await
                }
            };
            send_frame(&tx, StreamFrame::Progress { step: 4, message: "formatting response".to_string(), progress: 80 }).await;

            let mut accumulated = String::new();
            for word in result.summary.split_inclusive(' ') {
                accumulated.push_str(word);
                send_frame(&tx, StreamFrame::Token { step: 5, token: word.to_string(), accumulated: accumulated.clone(), progress: 90 }).await;
            }

            self.persist_turn(&session_id, &query, &result);
            send_frame(&tx, StreamFrame::Complete { step: "complete", result }).await;
        });
        rx
    }

    async fn handle_alert_management(&self, session_id: &str, query: &str, lang: Lang) -> AskResult {
        match alerts::parse_alert_spec(query, session_id, &self.registry) {
            Ok(spec) => {
                if let Err(err) = self.sessions.insert_alert(&spec, query) {
                    tracing::error!(%err, "failed to persist alert spec");
                    return AskResult::error(&CoreError::Internal(err.to_string()), lang.as_str(), None, None);
                }
                let summary = if lang == Lang::Fa {
                    format!(
                        "هشدار برای {} ثبت شد: وقتی مقدار {} {} باشد.",
                        spec.sensor_type,
                        spec.operator.as_str(),
                        spec.threshold
                    )
                } else {
                    format!("Alert created for {}: triggers when value is {} {}.", spec.sensor_type, spec.operator.as_str(), spec.threshold)
                };
                AskResult {
                    success: true,
                    summary,
                    metrics: serde_json::json!({
                        "alert_id": spec.id,
                        "sensor_type": spec.sensor_type,
                        "operator": spec.operator.as_str(),
                        "threshold": spec.threshold,
                    }),
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
                        query_valid: true,
                        execution_success: true,
                        data_points: 0,
                        sensor_types: vec![spec.sensor_type.clone()],
                        chart_requested: false,
                        mapping: None,
                        fallback_used: false,
                        refined_by_llm: false,
                        semantic_json: None,
                        error_details: None,
                    },
                }
            }
            Err(err) => AskResult::error(&err, lang.as_str(), None, None),
        }
    }

    async fn handle_data_query(&self, session_id: &str, query: &str, mixed: bool, lang: Lang) -> AskResult {
        let translation = self.translator.translate_query(query, None).await;

        let _context = self.sessions.recent_turns(session_id, self.context_turns).unwrap_or_default();

        let outcome = match fallback::run(translation.ir.clone(), &self.store, &self.registry, self.llm.as_ref()).await {
            Ok(o) => o,
            Err(err) => return AskResult::error(&err, lang.as_str(), translation.ir.entity.first(), None),
        };

        if outcome.rows.is_empty() {
            return AskResult::error(&CoreError::EmptyResult, lang.as_str(), translation.ir.entity.first(), None);
        }

        let mapping = if outcome.ir.fallback_reason.is_some() {
            Some("fallback".to_string())
        } else if translation.used_llm_mapping {
            Some("llm".to_string())
        } else {
            Some("ontology".to_string())
        };

        let mut result = formatter::format(FormatterInput {
            query,
            translated_query: &translation.translated_query,
            lang_fa: lang == Lang::Fa,
            ir: &outcome.ir,
            rows: outcome.rows,
            sql: outcome.sql,
            fallback_used: outcome.fallback_used,
            refined_by_llm: outcome.refined_by_llm,
            mapping,
            registry: &self.registry,
        });

        if mixed {
            self.enrich_with_llm_analysis(&mut result, query, lang).await;
        }

        result
    }

    /// §4.6 "mixed" queries additionally ask the LLM for a reasoning pass
    /// over the already-computed numbers. On LLM failure the deterministic
    /// single-line summary from `formatter::format` is left untouched.
    async fn enrich_with_llm_analysis(&self, result: &mut AskResult, query: &str, lang: Lang) {
        let sample: Vec<serde_json::Value> = result.raw_data.iter().take(20).cloned().collect();
        let user_prompt = format!(
            "Question: {query}\nMetrics: {}\nSample rows: {}\nRespond in {}.",
            result.metrics,
            serde_json::Value::Array(sample),
            if lang == Lang::Fa { "Persian" } else { "English" },
        );
        match self.llm.complete(MIXED_SYSTEM_PROMPT, &user_prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                result.summary = text;
                result.validation.refined_by_llm = true;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "mixed-intent llm analysis unavailable, keeping deterministic summary"),
        }
    }

    fn persist_turn(&self, session_id: &str, query: &str, result: &AskResult) {
        let turn = ConversationTurn {
            session_id: session_id.to_string(),
            query: query.to_string(),
            response: result.summary.clone(),
            sql: result.sql.clone(),
            semantic_ir: result.validation.semantic_json.as_ref().map(|v| v.to_string()),
            metrics: if result.metrics.is_null() { None } else { Some(result.metrics.to_string()) },
            chart: result.chart.as_ref().map(|v| v.to_string()),
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = self.sessions.append_turn(&turn) {
            tracing::error!(%err, %session_id, "failed to persist conversation turn");
        }
    }
}

struct DoneGuard(mpsc::Sender<String>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send("[DONE]".to_string());
    }
}

async fn send_frame(tx: &mpsc::Sender<String>, frame: StreamFrame) {
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = tx.send(json).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::UnavailableChatClient;
    use rusqlite::Connection;

    fn router() -> IntentRouter {
        let store = Arc::new(SensorStore::open_in_memory().unwrap());
        let sessions = Arc::new(SessionStore::open_in_memory().unwrap());
        let registry = Arc::new(OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap());
        IntentRouter::new(store, sessions, registry, Arc::new(UnavailableChatClient), 10)
    }

    #[test]
    fn classify_detects_alert_management_with_threshold() {
        let registry = OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap();
        let intent = classify_intent("alert me when humidity is above 80", &registry);
        assert_eq!(intent, Intent::AlertManagement);
    }

    #[test]
    fn classify_detects_mixed_with_reasoning_cue() {
        let registry = OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap();
        let intent = classify_intent("why is soil moisture so low", &registry);
        assert_eq!(intent, Intent::Mixed);
    }

    #[test]
    fn classify_denylist_keyword_stays_data_query() {
        let registry = OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap();
        let intent = classify_intent("drop table sensor_data please", &registry);
        assert_eq!(intent, Intent::DataQuery);
    }

    #[tokio::test]
    async fn ask_with_empty_query_returns_bad_request() {
        let r = router();
        let result = r.ask("s1", "   ").await;
        assert!(!result.success);
        assert_eq!(result.validation.error_details.unwrap().kind, "BadRequest");
    }

    #[tokio::test]
    async fn ask_creates_alert_and_persists_it() {
        let r = router();
        let result = r.ask("s1", "alert me when humidity is above 80").await;
        assert!(result.success);
        let alerts = r.sessions.list_alerts("s1").unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sensor_type, "humidity");
    }

    #[tokio::test]
    async fn ask_data_query_returns_current_value_and_persists_turn() {
        let r = router();
        r.store
            .insert_batch(&[crate::models::reading::Reading {
                id: 0,
                timestamp: chrono::Utc::now(),
                sensor_type: "temperature".to_string(),
                value: 21.7,
                unit: "°C".to_string(),
                source: "test".to_string(),
                raw: "{}".to_string(),
            }])
            .unwrap();

        let result = r.ask("s1", "what is the current temperature?").await;
        assert!(result.success);
        assert!(result.summary.contains("21.7"));
        let turns = r.sessions.recent_turns("s1", 10).unwrap();
        assert_eq!(turns.len(), 1);
    }
}
