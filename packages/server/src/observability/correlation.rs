//! Correlation identifier assignment.
//!
//! Every inbound request gets exactly one [`CorrelationId`] at ingress. A
//! well-formed id supplied by an upstream service in the
//! [`CORRELATION_HEADER`] request header is reused so traces stay continuous
//! across service hops; otherwise a fresh UUID v4 is generated. The pipeline
//! stores the id in the request context and echoes it back in the response
//! under the same header name.

use http::header::HeaderName;
use http::HeaderMap;
use uuid::Uuid;

/// Header carrying the correlation id on both requests and responses.
pub static CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Maximum accepted length for an inbound correlation id.
///
/// Anything longer is treated as malformed and replaced with a generated id
/// rather than rejected, since correlation is best-effort metadata.
const MAX_INBOUND_LEN: usize = 128;

/// Opaque per-request identifier linking logs, metrics, and the response.
///
/// Immutable for the request's lifetime and never reused across requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Assigns the correlation id for an inbound request.
///
/// Reuses the id from [`CORRELATION_HEADER`] when it is present, non-empty,
/// printable ASCII, and within length bounds; otherwise generates a fresh
/// UUID v4. Has no side effects -- the caller owns storing the id in the
/// request context and echoing it in the response header.
#[must_use]
pub fn assign(headers: &HeaderMap) -> CorrelationId {
    headers
        .get(&CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|s| is_well_formed(s))
        .map(|s| CorrelationId(s.to_string()))
        .unwrap_or_else(CorrelationId::generate)
}

/// A usable inbound id is non-empty, bounded, and printable ASCII.
fn is_well_formed(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= MAX_INBOUND_LEN
        && candidate
            .bytes()
            .all(|b| (0x21..=0x7e).contains(&b))
}
