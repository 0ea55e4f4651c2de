//! Correlation stage: the pipeline's ingress.
//!
//! Assigns the request's correlation id, creates the [`RequestContext`],
//! opens the request span that binds the id to every log event emitted
//! downstream, and echoes the id in the response header. Also counts the
//! request in flight so graceful shutdown can drain accurately.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{MatchedPath, Request};
use axum::http::HeaderValue;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::network::ShutdownController;
use crate::observability::correlation::{assign, CORRELATION_HEADER};

use super::context::RequestContext;

// ---------------------------------------------------------------------------
// CorrelationLayer
// ---------------------------------------------------------------------------

/// Tower layer installing the correlation stage.
#[derive(Clone)]
pub struct CorrelationLayer {
    shutdown: Arc<ShutdownController>,
}

impl CorrelationLayer {
    #[must_use]
    pub fn new(shutdown: Arc<ShutdownController>) -> Self {
        Self { shutdown }
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService {
            inner,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

// ---------------------------------------------------------------------------
// CorrelationService
// ---------------------------------------------------------------------------

/// Service wrapper implementing the correlation stage.
#[derive(Clone)]
pub struct CorrelationService<S> {
    inner: S,
    shutdown: Arc<ShutdownController>,
}

impl<S> Service<Request> for CorrelationService<S>
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
        let guard = self.shutdown.in_flight_guard();

        let id = assign(req.headers());
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map_or_else(|| "unmatched".to_string(), |m| m.as_str().to_string());
        let ctx = RequestContext::new(
            id.clone(),
            req.method().clone(),
            req.uri().path().to_string(),
            route,
        );

        let span = info_span!(
            "request",
            correlation_id = %id,
            method = %ctx.method,
            path = %ctx.path,
        );
        req.extensions_mut().insert(ctx);

        // Defer the inner call into the instrumented future so downstream
        // stages run inside the span and their events carry the id.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            async move {
                let _in_flight = guard;
                let mut response = inner.call(req).await?;
                if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                    response.headers_mut().insert(&CORRELATION_HEADER, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}
