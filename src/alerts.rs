//! C9 — Alert Subsystem: NL → `AlertSpec`, evaluation tick, per-(session,
//! alert) suppression, and synchronous action dispatch. SMTP via `lettre`,
//! generic webhook groundwork via `reqwest`, a periodic
//! `tokio::time::interval` tick loop over `AlertSpec`'s
//! operator/severity/time_window/action fields.

use crate::config::SmtpConfig;
use crate::error::CoreError;
use crate::models::alert::{Action, ActionLogEntry, AlertSpec, Operator, Severity, TriggeredAlert};
use crate::ontology::OntologyRegistry;
use crate::sensor_store::SensorStore;
use crate::session_store::SessionStore;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

static NUMBER_RE: OnceLock<Regex> = OnceLock::new();

fn number_re() -> &'static Regex {
    NUMBER_RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap())
}

/// §4.8 "NL → AlertSpec". Parses condition, threshold, severity, action,
/// and time window out of a free-form request; the sensor type is resolved
/// through the ontology the same way C5 resolves entities.
pub fn parse_alert_spec(nl: &str, session_id: &str, registry: &OntologyRegistry) -> Result<AlertSpec, CoreError> {
    let lower = nl.to_lowercase();

    let sensor_type = registry
        .find_mentions(&lower, crate::ontology::Locale::En)
        .into_iter()
        .next()
        .or_else(|| registry.find_mentions(nl, crate::ontology::Locale::Fa).into_iter().next())
        .ok_or_else(|| CoreError::MappingError("could not identify a sensor in the alert request".to_string()))?;

    let operator = parse_operator(&lower).ok_or_else(|| {
        CoreError::ValidationError("could not find a comparison condition (above/below/equals/>/</=)".to_string())
    })?;

    let threshold = number_re()
        .find(&lower)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| CoreError::ValidationError("could not find a numeric threshold".to_string()))?;

    let severity = parse_severity(&lower);
    let action = parse_action(&lower);
    let time_window_minutes = parse_time_window_minutes(&lower);

    Ok(AlertSpec {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        sensor_type,
        operator,
        threshold,
        severity,
        time_window_minutes,
        action,
        active: true,
        created_at: chrono::Utc::now(),
    })
}

fn parse_operator(text: &str) -> Option<Operator> {
    if text.contains(">=") || text.contains("at least") {
        Some(Operator::Gte)
    } else if text.contains("<=") || text.contains("at most") {
        Some(Operator::Lte)
    } else if text.contains(">") || text.contains("above") || text.contains("over") || text.contains("exceeds") || text.contains("بالاتر") || text.contains("بیشتر") {
        Some(Operator::Gt)
    } else if text.contains("<") || text.contains("below") || text.contains("under") || text.contains("پایین‌تر") || text.contains("کمتر") {
        Some(Operator::Lt)
    } else if text.contains("equals") || text.contains("=") || text.contains("برابر") {
        Some(Operator::Eq)
    } else {
        None
    }
}

fn parse_severity(text: &str) -> Severity {
    if text.contains("critical") || text.contains("urgent") || text.contains("بحرانی") || text.contains("فوری") {
        Severity::Critical
    } else if text.contains("info") || text.contains("اطلاع") {
        Severity::Info
    } else {
        Severity::Warning
    }
}

fn parse_action(text: &str) -> Option<Action> {
    if text.contains("email") || text.contains("ایمیل") {
        Some(Action::Email)
    } else if text.contains("sms") || text.contains("text message") || text.contains("پیامک") {
        Some(Action::Sms)
    } else if text.contains("notify") || text.contains("notification") || text.contains("هشدار") || text.contains("اعلان") {
        Some(Action::Notification)
    } else if text.contains("auto") {
        Some(Action::Auto)
    } else {
        None
    }
}

/// `over the last N hours/days/weeks` -> minutes. Absent ⇒ `0` (latest
/// reading, no windowed average).
fn parse_time_window_minutes(text: &str) -> i64 {
    static WINDOW_RE: OnceLock<Regex> = OnceLock::new();
    let re = WINDOW_RE.get_or_init(|| {
        Regex::new(r"(?:last|past)\s+(\d+)\s*(hour|day|week|minute)s?").unwrap()
    });
    let Some(caps) = re.captures(text) else { return 0 };
    let n: i64 = caps[1].parse().unwrap_or(0);
    match &caps[2] {
        "minute" => n,
        "hour" => n * 60,
        "day" => n * 60 * 24,
        "week" => n * 60 * 24 * 7,
        _ => 0,
    }
}

/// Evaluates active alerts, dispatches actions, and enforces per-session
/// per-alert suppression with a process-local monotonic clock (§5, §4.8).
pub struct AlertEngine {
    store: Arc<SensorStore>,
    sessions: Arc<SessionStore>,
    smtp: SmtpConfig,
    http: reqwest::Client,
    suppress_window: Duration,
    last_triggered: Mutex<HashMap<(String, String), Instant>>,
}

impl AlertEngine {
    pub fn new(store: Arc<SensorStore>, sessions: Arc<SessionStore>, smtp: SmtpConfig, suppress_secs: i64) -> Self {
        Self {
            store,
            sessions,
            smtp,
            http: reqwest::Client::new(),
            suppress_window: Duration::from_secs(suppress_secs.max(0) as u64),
            last_triggered: Mutex::new(HashMap::new()),
        }
    }

    /// §5 "single-sweep": evaluates one stable snapshot of all active
    /// alerts across every session. Intended to be driven by a periodic
    /// `tokio::time::interval` tick in `main.rs`.
    pub async fn evaluate_all(&self) -> anyhow::Result<Vec<TriggeredAlert>> {
        let alerts = self.sessions.list_active_alerts()?;
        let mut triggered = Vec::new();
        for alert in &alerts {
            if let Some(event) = self.evaluate_one(alert).await? {
                triggered.push(event);
            }
        }
        Ok(triggered)
    }

    /// `monitor_alerts(session_id)` — on-demand evaluation restricted to one
    /// session's active alerts.
    pub async fn monitor_session(&self, session_id: &str) -> anyhow::Result<Vec<TriggeredAlert>> {
        let alerts = self.sessions.list_alerts(session_id)?;
        let mut triggered = Vec::new();
        for alert in alerts.iter().filter(|a| a.active) {
            if let Some(event) = self.evaluate_one(alert).await? {
                triggered.push(event);
            }
        }
        Ok(triggered)
    }

    async fn evaluate_one(&self, alert: &AlertSpec) -> anyhow::Result<Option<TriggeredAlert>> {
        let value = if alert.time_window_minutes > 0 {
            let since = chrono::Utc::now() - chrono::Duration::minutes(alert.time_window_minutes);
            self.store.windowed_average(&alert.sensor_type, since)?
        } else {
            self.store.latest_reading(&alert.sensor_type)?.map(|(v, _)| v)
        };
        let Some(value) = value else { return Ok(None) };

        if !alert.operator.apply(value, alert.threshold) {
            return Ok(None);
        }

        let key = (alert.session_id.clone(), alert.id.clone());
        {
            let mut last = self.last_triggered.lock().unwrap();
            if let Some(at) = last.get(&key) {
                if at.elapsed() < self.suppress_window {
                    return Ok(None);
                }
            }
            last.insert(key, Instant::now());
        }

        let triggered_at = chrono::Utc::now();
        let event = TriggeredAlert {
            alert_id: alert.id.clone(),
            sensor_type: alert.sensor_type.clone(),
            value,
            threshold: alert.threshold,
            operator: alert.operator.as_str().to_string(),
            severity: alert.severity.as_str().to_string(),
            message: format!(
                "{} is {} {} (observed {value})",
                alert.sensor_type,
                alert.operator.as_str(),
                alert.threshold
            ),
            triggered_at,
        };

        self.dispatch(alert, &event).await;
        Ok(Some(event))
    }

    /// §4.8 "Action dispatch" — a fixed handler set invoked synchronously
    /// per trigger; every attempt is recorded, success or failure.
    async fn dispatch(&self, alert: &AlertSpec, event: &TriggeredAlert) {
        let Some(action) = alert.action else { return };
        let (status, message) = match action {
            Action::Email => self.dispatch_email(alert, event).await,
            Action::Sms => ("success".to_string(), format!("sms intent logged: {}", event.message)),
            Action::Notification => ("success".to_string(), format!("notification intent logged: {}", event.message)),
            Action::Auto => ("success".to_string(), format!("automated response intent logged: {}", event.message)),
            Action::Log => ("success".to_string(), event.message.clone()),
        };

        let entry = ActionLogEntry {
            id: Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            action_type: action.as_str().to_string(),
            status,
            message,
            timestamp: chrono::Utc::now(),
            completed_at: Some(chrono::Utc::now()),
            session_id: alert.session_id.clone(),
        };
        if let Err(err) = self.sessions.record_action(&entry) {
            tracing::warn!(%err, alert_id = %alert.id, "failed to persist action log entry");
        }
    }

    /// When SMTP is configured this really sends; a missing or unreachable
    /// relay degrades to a logged failure rather than panicking.
    async fn dispatch_email(&self, alert: &AlertSpec, event: &TriggeredAlert) -> (String, String) {
        let Some(host) = self.smtp.host.as_deref() else {
            return ("failed".to_string(), "email action configured but SMTP is not set up".to_string());
        };
        let Ok(mut builder) = AsyncSmtpTransport::<Tokio1Executor>::relay(host) else {
            return ("failed".to_string(), format!("invalid SMTP relay host '{host}'"));
        };
        builder = builder.port(self.smtp.port);
        if let (Some(user), Some(pass)) = (&self.smtp.user, &self.smtp.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let transport = builder.build();

        let subject = format!("[SensorSage] {} alert: {}", alert.severity.as_str(), alert.sensor_type);
        let email = Message::builder()
            .from(self.smtp.from.parse().unwrap_or_else(|_| "sensorsage@localhost".parse().unwrap()))
            .to("operator@localhost".parse().unwrap())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(event.message.clone());

        match email {
            Ok(email) => match transport.send(email).await {
                Ok(_) => ("success".to_string(), "email dispatched".to_string()),
                Err(err) => ("failed".to_string(), format!("email send failed: {err}")),
            },
            Err(err) => ("failed".to_string(), format!("failed to build email: {err}")),
        }
    }

    #[allow(dead_code)]
    fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn registry() -> OntologyRegistry {
        OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn parses_above_threshold_alert() {
        let reg = registry();
        let spec = parse_alert_spec("Alert me when humidity > 80", "s1", &reg).unwrap();
        assert_eq!(spec.sensor_type, "humidity");
        assert_eq!(spec.operator, Operator::Gt);
        assert_eq!(spec.threshold, 80.0);
        assert_eq!(spec.severity, Severity::Warning);
    }

    #[test]
    fn parses_critical_severity_and_email_action() {
        let reg = registry();
        let spec = parse_alert_spec("send a critical email when soil moisture is below 10", "s1", &reg).unwrap();
        assert_eq!(spec.sensor_type, "soil_moisture");
        assert_eq!(spec.operator, Operator::Lt);
        assert_eq!(spec.severity, Severity::Critical);
        assert_eq!(spec.action, Some(Action::Email));
    }

    #[test]
    fn parses_time_window() {
        let reg = registry();
        let spec = parse_alert_spec("notify when temperature above 35 over the last 2 hours", "s1", &reg).unwrap();
        assert_eq!(spec.time_window_minutes, 120);
    }

    #[test]
    fn rejects_alert_with_no_sensor() {
        let reg = registry();
        assert!(parse_alert_spec("alert me when it is greater than 80", "s1", &reg).is_err());
    }

    #[tokio::test]
    async fn triggered_alert_is_suppressed_within_window() {
        let store = Arc::new(SensorStore::open_in_memory().unwrap());
        let sessions = Arc::new(SessionStore::open_in_memory().unwrap());
        let reg = registry();
        let spec = parse_alert_spec("alert when humidity > 80", "s1", &reg).unwrap();
        sessions.insert_alert(&spec, "humidity > 80").unwrap();
        store
            .insert_batch(&[crate::models::reading::Reading {
                id: 0,
                timestamp: chrono::Utc::now(),
                sensor_type: "humidity".to_string(),
                value: 82.0,
                unit: "%".to_string(),
                source: "test".to_string(),
                raw: "{}".to_string(),
            }])
            .unwrap();

        let engine = AlertEngine::new(store, sessions, SmtpConfig::default(), 300);
        let first = engine.monitor_session("s1").await.unwrap();
        assert_eq!(first.len(), 1);
        let second = engine.monitor_session("s1").await.unwrap();
        assert!(second.is_empty());
    }
}
