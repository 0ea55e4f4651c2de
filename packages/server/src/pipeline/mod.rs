//! The request-observability pipeline.
//!
//! Every request flows through a fixed, first-class stage order:
//!
//! 1. **Correlate** -- assign the correlation id, open the request span,
//!    start the clock ([`CorrelationLayer`], outermost).
//! 2. **Authenticate** -- verify the bearer credential on protected routes
//!    only ([`AuthLayer`], installed via `route_layer` on the protected
//!    sub-router; unprotected routes bypass it entirely).
//! 3. **Execute** -- the wrapped handler.
//! 4. **Record** -- measure duration, emit the completion event, update
//!    metrics on every terminal path ([`RecordLayer`], between correlation
//!    and auth so rejections are recorded too).
//!
//! [`STAGES`] is the canonical order; [`apply`] composes the layers so the
//! order lives in one place instead of being implied by call nesting.
//! Transitions per request are strictly sequential -- see
//! [`context::PipelineState`].

pub mod auth;
pub mod context;
pub mod correlation;
pub mod record;

pub use auth::AuthLayer;
pub use context::{AuthRejection, ErrorClass, Outcome, PipelineState, RequestContext};
pub use correlation::CorrelationLayer;
pub use record::RecordLayer;

use std::sync::Arc;

use axum::Router;

use crate::network::ShutdownController;
use crate::observability::MetricsRegistry;

/// One stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Correlate,
    Authenticate,
    Execute,
    Record,
}

/// The fixed stage order, outermost first.
pub const STAGES: [Stage; 4] = [
    Stage::Correlate,
    Stage::Authenticate,
    Stage::Execute,
    Stage::Record,
];

/// Wraps a router with the correlation and record stages in their fixed
/// order (correlation outermost). The auth stage is per-route and belongs
/// on the protected sub-router via `route_layer`.
pub fn apply<S>(
    router: Router<S>,
    registry: &Arc<MetricsRegistry>,
    shutdown: &Arc<ShutdownController>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    // `Router::layer` wraps what is already there, so the last layer added
    // is the outermost: record first, then correlation around it.
    router
        .layer(RecordLayer::new(Arc::clone(registry)))
        .layer(CorrelationLayer::new(Arc::clone(shutdown)))
}
