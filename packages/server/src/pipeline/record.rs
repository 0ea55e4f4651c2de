//! Record stage: duration measurement, the completion log event, and
//! metric updates for every terminal path.
//!
//! Wraps everything inside the correlation stage, so rejected and failed
//! requests are just as visible in the latency histogram as successes. A
//! panicking handler is caught here and mapped to a generic 500 -- internal
//! detail never reaches the client. If the client disconnects and the
//! request future is dropped mid-flight, the drop-guard still emits the
//! completion bookkeeping so no duration observation leaks.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::FutureExt;
use tower::{Layer, Service};
use tracing::{error, info, warn};

use crate::observability::metrics::series;
use crate::observability::MetricsRegistry;

use super::context::{AuthRejection, ErrorClass, Outcome, PipelineState, RequestContext};

// ---------------------------------------------------------------------------
// RecordLayer
// ---------------------------------------------------------------------------

/// Tower layer installing the record stage.
#[derive(Clone)]
pub struct RecordLayer {
    registry: Arc<MetricsRegistry>,
}

impl RecordLayer {
    #[must_use]
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for RecordLayer {
    type Service = RecordService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecordService {
            inner,
            registry: Arc::clone(&self.registry),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordService
// ---------------------------------------------------------------------------

/// Service wrapper implementing the record stage.
#[derive(Clone)]
pub struct RecordService<S> {
    inner: S,
    registry: Arc<MetricsRegistry>,
}

impl<S> Service<Request> for RecordService<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let ctx = req.extensions().get::<RequestContext>().cloned();
        let registry = Arc::clone(&self.registry);
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(ctx) = ctx else {
                // No ingress stage ran; pass through rather than invent labels.
                return inner.call(req).await;
            };

            let mut guard = CompletionGuard::new(registry, ctx);
            let result = std::panic::AssertUnwindSafe(async { inner.call(req).await })
                .catch_unwind()
                .await;

            let response = match result {
                Ok(Ok(response)) => response,
                Ok(Err(infallible)) => match infallible {},
                Err(_panic) => {
                    error!("handler panicked; responding with a generic body");
                    let mut response = (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({ "error": "internal server error" })),
                    )
                        .into_response();
                    response.extensions_mut().insert(ErrorClass("panic"));
                    response
                }
            };

            guard.finish(&response);
            Ok(response)
        })
    }
}

// ---------------------------------------------------------------------------
// CompletionGuard
// ---------------------------------------------------------------------------

/// Emits the terminal bookkeeping exactly once.
///
/// `finish` handles every path where a response exists; `Drop` covers the
/// request future being dropped (client disconnect) so the duration
/// observation is never lost.
struct CompletionGuard {
    registry: Arc<MetricsRegistry>,
    ctx: RequestContext,
    armed: bool,
}

impl CompletionGuard {
    fn new(registry: Arc<MetricsRegistry>, ctx: RequestContext) -> Self {
        Self {
            registry,
            ctx,
            armed: true,
        }
    }

    fn finish(&mut self, response: &Response) {
        self.armed = false;

        let status = response.status();
        let outcome = if response.extensions().get::<AuthRejection>().is_some() {
            Outcome::Rejected
        } else if status.is_server_error() {
            Outcome::Failed
        } else {
            Outcome::Completed
        };

        if outcome == Outcome::Failed {
            let kind = response
                .extensions()
                .get::<ErrorClass>()
                .map_or("unhandled", |class| class.0);
            self.registry.increment(series::HANDLER_ERRORS, &[kind]);
        }

        self.record(status_class(status), outcome, Some(status));
    }

    fn record(&mut self, status_class: &str, outcome: Outcome, status: Option<StatusCode>) {
        let ctx = &mut self.ctx;
        drive_terminal_transitions(ctx, outcome);

        let duration = ctx.started_at.elapsed();
        let labels = [ctx.method.as_str(), ctx.route.as_str(), status_class];
        self.registry.increment(series::HTTP_REQUESTS, &labels);
        self.registry
            .observe(series::HTTP_REQUEST_DURATION, &labels, duration.as_secs_f64());

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = duration.as_millis() as u64;
        info!(
            method = %ctx.method,
            path = %ctx.path,
            route = %ctx.route,
            status = status.map(|s| s.as_u16()),
            duration_ms,
            outcome = outcome.as_str(),
            "request completed"
        );
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        warn!("request abandoned before the response was written");
        self.registry.increment(
            series::HTTP_REQUESTS_ABANDONED,
            &[self.ctx.method.as_str(), self.ctx.route.as_str()],
        );
        // Client-caused termination; recorded under the 4xx class so the
        // latency histogram still sees the request.
        self.record("4xx", Outcome::Abandoned, None);
    }
}

/// Walks this stage's context copy along the observed terminal path.
///
/// The copy was taken before the auth stage ran, so it always starts at
/// `CorrelationAssigned` here; the observed outcome decides the route to
/// `ResponseSent`.
fn drive_terminal_transitions(ctx: &mut RequestContext, outcome: Outcome) {
    match outcome {
        Outcome::Rejected => {
            ctx.advance(PipelineState::Authenticating);
            ctx.advance(PipelineState::Rejected);
        }
        Outcome::Completed => {
            ctx.advance(PipelineState::HandlerExecuting);
            ctx.advance(PipelineState::Completed);
        }
        Outcome::Failed | Outcome::Abandoned => {
            ctx.advance(PipelineState::HandlerExecuting);
            ctx.advance(PipelineState::HandlerFailed);
        }
    }
    ctx.advance(PipelineState::ResponseSent);
}

/// Collapses a status code to its class -- raw codes as labels would split
/// the request series into far more series than anyone reads.
#[must_use]
pub fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() / 100 {
        1 => "1xx",
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        _ => "5xx",
    }
}
