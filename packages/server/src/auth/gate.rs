//! The auth gate: turns an `Authorization` header into an authenticated
//! principal, or a classified failure.
//!
//! The gate never promotes a request to authenticated without a verified
//! token, and it never inspects anything beyond the one header the pipeline
//! hands it.

use std::sync::Arc;

use axum::http::HeaderValue;

use super::token::TokenKeys;
use super::{AuthError, AuthenticatedPrincipal};

/// Verifies bearer credentials for protected routes.
pub struct AuthGate {
    keys: Arc<TokenKeys>,
}

impl AuthGate {
    #[must_use]
    pub fn new(keys: Arc<TokenKeys>) -> Self {
        Self { keys }
    }

    /// Authenticates a request from its `Authorization` header.
    ///
    /// # Errors
    ///
    /// - `MissingToken` when no header is present at all.
    /// - `MalformedToken` when the header is not a bearer credential, the
    ///   token text is empty, or the verified subject is not a user id.
    /// - `ExpiredToken` / `InvalidSignature` from token verification.
    pub fn authenticate(
        &self,
        header: Option<&HeaderValue>,
    ) -> Result<AuthenticatedPrincipal, AuthError> {
        let value = header.ok_or(AuthError::MissingToken)?;
        let value = value.to_str().map_err(|_| AuthError::MalformedToken)?;
        let token = strip_bearer(value).ok_or(AuthError::MalformedToken)?;
        let claims = self.keys.verify(token)?;
        AuthenticatedPrincipal::from_claims(&claims)
    }
}

/// Extracts the token from a `Bearer <token>` header value.
///
/// The scheme is matched case-insensitively per RFC 7235; an empty token is
/// treated as absent.
fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, rest) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}
