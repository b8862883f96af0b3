use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub session_id: String,
    pub query: String,
}

/// `POST /api/v1/ask` — single-shot natural-language question, routed
/// through the Intent Router and returned as one `AskResult`.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".to_string()));
    }
    let result = state.router.ask(&req.session_id, &req.query).await;
    Ok(Json(result))
}

/// `POST /api/v1/ask/stream` — same pipeline, framed as progress/token/
/// complete events over SSE, terminated by a literal `[DONE]` payload even
/// if the underlying task is cancelled mid-stream.
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.router.clone().ask_stream(req.session_id, req.query);
    let stream = ReceiverStream::new(rx).map(|line| Ok(Event::default().data(line)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
