use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::reading::{IngestOutcome, RawReading};
use crate::AppState;

/// `POST /api/v1/ingest` — validates, normalizes and enqueues one raw
/// reading. Mirrors §4.2's `ingest(sensor, value, unit, timestamp, extras)`.
pub async fn ingest(
    State(state): State<AppState>,
    Json(raw): Json<RawReading>,
) -> impl IntoResponse {
    let outcome = state.ingestion.ingest(raw).await;
    match outcome {
        IngestOutcome::Accepted => (StatusCode::ACCEPTED, Json(outcome)),
        IngestOutcome::Rejected { .. } => (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)),
    }
}
