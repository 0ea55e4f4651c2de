//! Metrics exposition handler.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::AppState;

/// Content type for the text exposition format.
const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `GET /metrics` -- renders the registry in the line-oriented text
/// exposition format. Read-only aggregate counts, so no authentication.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE_TEXT)],
        state.metrics.render(),
    )
}
