//! Health, liveness, readiness, and service-info handlers.
//!
//! Thin translations from [`crate::health::HealthAggregator`] answers to
//! HTTP. Status-code conventions: liveness and readiness speak orchestrator
//! (503 when the answer is no); `/health` always returns 200 with the
//! verdict in the body so monitoring can distinguish "up but degraded"
//! from "down".

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::health::{HealthSnapshot, Liveness, Readiness};

use super::AppState;

/// `GET /health` -- operator-facing snapshot, always 200.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.health.health().await)
}

/// `GET /health/live` -- liveness probe. Dependency-free; 503 only when
/// the process is shutting down.
pub async fn liveness_handler(State(state): State<AppState>) -> (StatusCode, Json<Liveness>) {
    let liveness = state.health.liveness();
    let status = if liveness.alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(liveness))
}

/// `GET /health/ready` -- readiness probe. 503 with reasons when any
/// dependency ping fails or the server is not in the ready phase.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let readiness = state.health.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

/// `GET /` -- basic service info.
pub async fn root_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "taskops",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "status": "running",
    }))
}
