use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "=",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            "=" => Some(Operator::Eq),
            ">=" => Some(Operator::Gte),
            "<=" => Some(Operator::Lte),
            _ => None,
        }
    }

    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Eq => (value - threshold).abs() < 1e-9,
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Email,
    Sms,
    Notification,
    Auto,
    Log,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Email => "email",
            Action::Sms => "sms",
            Action::Notification => "notification",
            Action::Auto => "auto",
            Action::Log => "log",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Action::Email),
            "sms" => Some(Action::Sms),
            "notification" => Some(Action::Notification),
            "auto" => Some(Action::Auto),
            "log" => Some(Action::Log),
            _ => None,
        }
    }
}

/// A persisted alert rule. Created by C9 from NL, never mutated except
/// `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSpec {
    pub id: String,
    pub session_id: String,
    pub sensor_type: String,
    pub operator: Operator,
    pub threshold: f64,
    pub severity: Severity,
    pub time_window_minutes: i64,
    pub action: Option<Action>,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One evaluation-tick trigger, returned by `monitor_alerts`.
#[derive(Debug, Clone, Serialize)]
pub struct TriggeredAlert {
    pub alert_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: String,
    pub severity: String,
    pub message: String,
    pub triggered_at: chrono::DateTime<chrono::Utc>,
}

/// A per-execution record of an alert action dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub alert_id: String,
    pub action_type: String,
    pub status: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub session_id: String,
}
