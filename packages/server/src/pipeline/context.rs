//! Per-request context and the pipeline state machine.
//!
//! The context is created at ingress and threaded through the stages as a
//! request extension -- correlation id and principal are explicit values,
//! never ambient state. Transitions are strictly sequential per request;
//! [`PipelineState::can_advance`] is the single source of truth for which
//! transitions exist.

use std::time::Instant;

use http::Method;

use crate::observability::CorrelationId;

/// Pipeline progress for one request.
///
/// ```text
/// Received -> CorrelationAssigned -> (Authenticating -> Authenticated | Rejected)
///          -> HandlerExecuting -> (Completed | HandlerFailed) -> ResponseSent
/// ```
///
/// Unprotected routes skip the auth states and go straight from
/// `CorrelationAssigned` to `HandlerExecuting`. `Rejected` jumps directly
/// to `ResponseSent` -- the handler never runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    CorrelationAssigned,
    Authenticating,
    Authenticated,
    Rejected,
    HandlerExecuting,
    Completed,
    HandlerFailed,
    ResponseSent,
}

impl PipelineState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance(self, next: Self) -> bool {
        use PipelineState::{
            Authenticated, Authenticating, Completed, CorrelationAssigned, HandlerExecuting,
            HandlerFailed, Received, Rejected, ResponseSent,
        };
        matches!(
            (self, next),
            (Received, CorrelationAssigned)
                | (CorrelationAssigned, Authenticating | HandlerExecuting)
                | (Authenticating, Authenticated | Rejected)
                | (Authenticated, HandlerExecuting)
                | (HandlerExecuting, Completed | HandlerFailed)
                | (Rejected | Completed | HandlerFailed, ResponseSent)
        )
    }
}

/// Terminal classification of a request, derived by the record stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Rejected,
    Failed,
    /// Client disconnected before the response was written.
    Abandoned,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Mutable per-request record, owned by the request's execution and
/// discarded when the response is sent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
    pub started_at: Instant,
    pub method: Method,
    pub path: String,
    /// Matched route template, or `"unmatched"` -- raw paths would blow up
    /// metric label cardinality.
    pub route: String,
    state: PipelineState,
}

impl RequestContext {
    /// Creates the context at ingress; the correlation id has just been
    /// assigned, so the state starts past `Received`.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, method: Method, path: String, route: String) -> Self {
        Self {
            correlation_id,
            started_at: Instant::now(),
            method,
            path,
            route,
            state: PipelineState::CorrelationAssigned,
        }
    }

    /// Current pipeline state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Advances the state machine. Returns false (and leaves the state
    /// untouched) on an illegal transition; stages treat that as a bug.
    pub fn advance(&mut self, next: PipelineState) -> bool {
        if self.state.can_advance(next) {
            self.state = next;
            true
        } else {
            debug_assert!(false, "illegal transition {:?} -> {next:?}", self.state);
            false
        }
    }
}

/// Response extension marking an auth-gate rejection, so the record stage
/// can classify the terminal path without re-parsing the response.
#[derive(Debug, Clone, Copy)]
pub struct AuthRejection {
    pub kind: &'static str,
}

/// Response extension naming the error class behind a 5xx response.
#[derive(Debug, Clone, Copy)]
pub struct ErrorClass(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new(
            CorrelationId::generate(),
            Method::GET,
            "/api/v1/tasks".to_string(),
            "/api/v1/tasks".to_string(),
        )
    }

    #[test]
    fn protected_happy_path_is_legal() {
        let mut ctx = ctx();
        for next in [
            PipelineState::Authenticating,
            PipelineState::Authenticated,
            PipelineState::HandlerExecuting,
            PipelineState::Completed,
            PipelineState::ResponseSent,
        ] {
            assert!(ctx.advance(next), "expected legal transition to {next:?}");
        }
        assert_eq!(ctx.state(), PipelineState::ResponseSent);
    }

    #[test]
    fn unprotected_routes_skip_auth_states() {
        let mut ctx = ctx();
        assert!(ctx.advance(PipelineState::HandlerExecuting));
        assert!(ctx.advance(PipelineState::Completed));
        assert!(ctx.advance(PipelineState::ResponseSent));
    }

    #[test]
    fn rejection_jumps_straight_to_response_sent() {
        let mut ctx = ctx();
        assert!(ctx.advance(PipelineState::Authenticating));
        assert!(ctx.advance(PipelineState::Rejected));
        assert!(ctx.advance(PipelineState::ResponseSent));
    }

    #[test]
    fn handler_failure_path_is_legal() {
        assert!(PipelineState::HandlerExecuting.can_advance(PipelineState::HandlerFailed));
        assert!(PipelineState::HandlerFailed.can_advance(PipelineState::ResponseSent));
    }

    #[test]
    fn no_reentry_after_terminal_states() {
        assert!(!PipelineState::ResponseSent.can_advance(PipelineState::Received));
        assert!(!PipelineState::ResponseSent.can_advance(PipelineState::HandlerExecuting));
        assert!(!PipelineState::Rejected.can_advance(PipelineState::HandlerExecuting));
        assert!(!PipelineState::Completed.can_advance(PipelineState::HandlerFailed));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "illegal transition"))]
    fn illegal_advance_is_rejected() {
        let mut ctx = ctx();
        let advanced = ctx.advance(PipelineState::Completed);
        // Release builds skip the debug assertion but must not change state.
        assert!(!advanced);
        assert_eq!(ctx.state(), PipelineState::CorrelationAssigned);
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(Outcome::Completed.as_str(), "completed");
        assert_eq!(Outcome::Abandoned.as_str(), "abandoned");
    }
}
