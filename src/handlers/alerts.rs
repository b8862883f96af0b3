use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::alert::{Action, AlertSpec, Operator, Severity};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub session_id: String,
    pub sensor_type: String,
    pub operator: String,
    pub threshold: f64,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub time_window_minutes: Option<i64>,
    #[serde(default)]
    pub action: Option<String>,
}

/// `POST /api/v1/alerts` — direct structured alert creation, for callers
/// that already know the sensor/operator/threshold rather than phrasing it
/// as a natural-language request (compare the NL path in `router.rs`).
pub async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !state.registry.is_canonical(&req.sensor_type) {
        return Err((StatusCode::BAD_REQUEST, format!("unknown sensor type: {}", req.sensor_type)));
    }
    let operator = Operator::from_str(&req.operator)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid operator: {}", req.operator)))?;
    let severity = match req.severity.as_deref() {
        Some(s) => Severity::from_str(s).ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid severity: {s}")))?,
        None => Severity::Warning,
    };
    let action = match req.action.as_deref() {
        Some(a) => Some(Action::from_str(a).ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid action: {a}")))?),
        None => None,
    };

    let spec = AlertSpec {
        id: Uuid::new_v4().to_string(),
        session_id: req.session_id.clone(),
        sensor_type: req.sensor_type.clone(),
        operator,
        threshold: req.threshold,
        severity,
        time_window_minutes: req.time_window_minutes.unwrap_or(0),
        action,
        active: true,
        created_at: chrono::Utc::now(),
    };

    let condition = format!("{} {} {}", spec.sensor_type, operator.as_str(), spec.threshold);
    state
        .sessions
        .insert_alert(&spec, &condition)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((StatusCode::CREATED, Json(spec)))
}

/// `GET /api/v1/alerts?session_id=...` — active and inactive alerts for a
/// session, most recently created last.
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let alerts = state
        .sessions
        .list_alerts(&q.session_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "alerts": alerts })))
}

/// `DELETE /api/v1/alerts/{id}?session_id=...` — soft-delete (marks
/// inactive); 404 if no such active alert exists for the session.
pub async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SessionQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let deleted = state
        .sessions
        .delete_alert(&id, &q.session_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "alert not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/alerts/monitor?session_id=...` — on-demand evaluation of a
/// session's active alerts, outside the periodic background tick.
pub async fn monitor_alerts(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let triggered = state
        .alert_engine
        .monitor_session(&q.session_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "triggered": triggered })))
}

/// `GET /api/v1/alerts/{id}/actions` — dispatch history for one alert.
pub async fn list_actions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actions = state
        .sessions
        .list_actions_for_alert(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "actions": actions })))
}
