//! HTTP handler definitions for the taskops server.
//!
//! Defines `AppState` (the shared state carried through axum extractors),
//! the handler-level error taxonomy, and re-exports all handler functions
//! for convenient access when building the router.

pub mod auth;
pub mod health;
pub mod metrics;
pub mod tasks;

pub use auth::{login_handler, me_handler, register_handler};
pub use health::{health_handler, liveness_handler, readiness_handler, root_handler};
pub use metrics::metrics_handler;
pub use tasks::{
    create_task_handler, delete_task_handler, get_task_handler, list_tasks_handler,
    update_task_handler,
};

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::auth::{PasswordHasher, TokenKeys};
use crate::cache::UserCache;
use crate::config::AppConfig;
use crate::health::HealthAggregator;
use crate::network::ShutdownController;
use crate::observability::MetricsRegistry;
use crate::pipeline::ErrorClass;
use crate::storage::Storage;

/// Shared application state passed to all axum handlers via `State`
/// extraction. Holds `Arc` references so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Persistence capability.
    pub storage: Arc<dyn Storage>,
    /// In-process user cache.
    pub cache: Arc<UserCache>,
    /// Process-wide metrics registry.
    pub metrics: Arc<MetricsRegistry>,
    /// Token signing/verification capability.
    pub tokens: Arc<TokenKeys>,
    /// Password hashing capability.
    pub hasher: Arc<PasswordHasher>,
    /// Dependency health aggregator.
    pub health: Arc<HealthAggregator>,
    /// Graceful shutdown controller (also read by the health aggregator).
    pub shutdown: Arc<ShutdownController>,
    /// Application configuration.
    pub config: Arc<AppConfig>,
}

/// Handler-level failures, mapped onto client-visible responses.
///
/// Internal failures never leak detail: the client sees a generic body and
/// finds the correlation id in the response header; operators find the full
/// error in the structured log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request payload failed validation.
    #[error("{0}")]
    Invalid(&'static str),
    /// The request conflicts with existing state.
    #[error("{0}")]
    Conflict(&'static str),
    /// Credential checks failed inside a handler (login, stale principal).
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("not found")]
    NotFound,
    /// Unhandled internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable label for the handler-error counter.
    fn class(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // The full error chain goes to the log (inside the request span, so
        // it carries the correlation id); the client gets a generic body.
        let message = match &self {
            Self::Internal(err) => {
                error!(error = %err, "handler failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response =
            (status, Json(serde_json::json!({ "error": message }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        if status.is_server_error() {
            response.extensions_mut().insert(ErrorClass(self.class()));
        }
        response
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_classes() {
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("taken").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("nope").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("db exploded")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_errors_hide_detail_and_mark_the_response() {
        let response =
            ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.extensions().get::<ErrorClass>().unwrap().0, "internal");

        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("internal server error"));
        assert!(!text.contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn unauthorized_carries_the_challenge_header() {
        let response = ApiError::Unauthorized("incorrect email or password").into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let response = ApiError::Conflict("email or username already registered").into_response();
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("already registered"));
    }
}
