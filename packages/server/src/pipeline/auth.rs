//! Authentication stage, applied only to protected routes.
//!
//! Delegates credential verification to the [`AuthGate`] and short-circuits
//! rejected requests: the wrapped handler never executes, the failure class
//! (never the token) is logged and counted, and the client gets a generic
//! body with only the correlation id. Missing credential is 403; a
//! presented-but-invalid credential is 401.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tower::{Layer, Service};
use tracing::warn;

use crate::auth::{AuthError, AuthGate};
use crate::observability::metrics::series;
use crate::observability::{CorrelationId, MetricsRegistry};

use super::context::{AuthRejection, PipelineState, RequestContext};

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

/// Tower layer installing the auth stage on a protected sub-router.
#[derive(Clone)]
pub struct AuthLayer {
    gate: Arc<AuthGate>,
    registry: Arc<MetricsRegistry>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(gate: Arc<AuthGate>, registry: Arc<MetricsRegistry>) -> Self {
        Self { gate, registry }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: Arc::clone(&self.gate),
            registry: Arc::clone(&self.registry),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

/// Service wrapper implementing the auth stage.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: Arc<AuthGate>,
    registry: Arc<MetricsRegistry>,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
            ctx.advance(PipelineState::Authenticating);
        }

        let auth_result = self.gate.authenticate(req.headers().get(header::AUTHORIZATION));
        match auth_result {
            Ok(principal) => {
                if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
                    ctx.advance(PipelineState::Authenticated);
                }
                req.extensions_mut().insert(principal);
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move { inner.call(req).await })
            }
            Err(err) => {
                if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
                    ctx.advance(PipelineState::Rejected);
                }
                warn!(kind = err.kind(), "request rejected by auth gate");
                self.registry.increment(series::AUTH_FAILURES, &[err.kind()]);

                let correlation_id = req
                    .extensions()
                    .get::<RequestContext>()
                    .map(|ctx| ctx.correlation_id.clone());
                let response = rejection_response(err, correlation_id.as_ref());
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

/// Builds the short-circuit response for a rejected request.
///
/// The body is deliberately generic: the failure class stays in logs and
/// metrics, and the correlation id is all a client needs to report.
fn rejection_response(err: AuthError, correlation_id: Option<&CorrelationId>) -> Response {
    let status = err.status();
    let message = if status == StatusCode::FORBIDDEN {
        "forbidden"
    } else {
        "unauthorized"
    };
    let body = serde_json::json!({
        "error": message,
        "correlation_id": correlation_id.map(CorrelationId::as_str),
    });

    let mut response = (status, Json(body)).into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
        .extensions_mut()
        .insert(AuthRejection { kind: err.kind() });
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::auth::{AuthenticatedPrincipal, TokenKeys};
    use crate::observability::metrics::standard_registry;

    use super::*;

    struct Fixture {
        keys: Arc<TokenKeys>,
        registry: Arc<MetricsRegistry>,
        hits: Arc<AtomicUsize>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let keys = Arc::new(TokenKeys::new("pipeline-secret", Duration::from_secs(1800)));
        let registry = Arc::new(standard_registry().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let handler_hits = Arc::clone(&hits);
        let handler = move |principal: AuthenticatedPrincipal| {
            let handler_hits = Arc::clone(&handler_hits);
            async move {
                handler_hits.fetch_add(1, Ordering::SeqCst);
                principal.user_id.to_string()
            }
        };

        let router = Router::new().route("/private", get(handler)).route_layer(
            AuthLayer::new(
                Arc::new(AuthGate::new(Arc::clone(&keys))),
                Arc::clone(&registry),
            ),
        );

        Fixture {
            keys,
            registry,
            hits,
            router,
        }
    }

    fn request(auth: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/private");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_credential_is_forbidden_and_handler_never_runs() {
        let fixture = fixture();
        let response = fixture.router.oneshot(request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(fixture.hits.load(Ordering::SeqCst), 0);
        assert_eq!(
            fixture
                .registry
                .counter_value(series::AUTH_FAILURES, &["MissingToken"]),
            Some(1)
        );
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized_with_labeled_counter() {
        let fixture = fixture();
        let now = Utc::now().timestamp();
        let token = fixture.keys.issue_at(9, now - 7200, now - 3600).unwrap();

        let response = fixture
            .router
            .oneshot(request(Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(fixture.hits.load(Ordering::SeqCst), 0);
        assert_eq!(
            fixture
                .registry
                .counter_value(series::AUTH_FAILURES, &["ExpiredToken"]),
            Some(1)
        );
    }

    #[tokio::test]
    async fn valid_token_reaches_handler_with_principal() {
        let fixture = fixture();
        let token = fixture.keys.issue(42).unwrap();

        let response = fixture
            .router
            .oneshot(request(Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"42");
    }

    #[tokio::test]
    async fn rejection_body_is_generic_and_never_echoes_the_token() {
        let fixture = fixture();
        let response = fixture
            .router
            .oneshot(request(Some("Bearer very-secret-token")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("unauthorized"));
        assert!(!text.contains("very-secret-token"));
    }

    #[tokio::test]
    async fn rejection_response_is_marked_for_the_record_stage() {
        let fixture = fixture();
        let response = fixture.router.oneshot(request(None)).await.unwrap();
        let rejection = response.extensions().get::<AuthRejection>().unwrap();
        assert_eq!(rejection.kind, "MissingToken");
    }
}
