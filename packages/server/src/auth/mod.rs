//! Authentication: bearer-token verification and the credential capabilities
//! behind it (token signing, password hashing).
//!
//! The pipeline's auth stage is the only caller of [`AuthGate`]; handlers
//! receive an [`AuthenticatedPrincipal`] extractor and never see tokens.

pub mod gate;
pub mod password;
pub mod token;

pub use gate::AuthGate;
pub use password::PasswordHasher;
pub use token::{Claims, TokenKeys};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

/// Authentication failure classes.
///
/// The class (never the raw token) is what gets logged and counted. The
/// status-code split is a preserved contract: no credential at all is 403,
/// a credential that fails verification is 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingToken,
    #[error("malformed bearer token")]
    MalformedToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("invalid token signature")]
    InvalidSignature,
}

impl AuthError {
    /// Stable label for log events and the auth-failure counter.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::MissingToken => "MissingToken",
            Self::MalformedToken => "MalformedToken",
            Self::ExpiredToken => "ExpiredToken",
            Self::InvalidSignature => "InvalidSignature",
        }
    }

    /// Response status for this failure class.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingToken => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Identity derived from a successfully verified token.
///
/// Lives only for the request that carried the token; the pipeline injects
/// it as a request extension and it is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: u64,
    /// Unix seconds the token was issued at.
    pub issued_at: i64,
    /// Unix seconds the token expires at.
    pub expires_at: i64,
}

impl AuthenticatedPrincipal {
    /// Derives the principal from verified claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] when the subject is not a
    /// numeric user id.
    pub fn from_claims(claims: &Claims) -> Result<Self, AuthError> {
        let user_id = claims.sub.parse().map_err(|_| AuthError::MalformedToken)?;
        Ok(Self {
            user_id,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}

/// Extractor for handlers behind the auth stage.
///
/// A missing principal means the route was wired without the auth layer --
/// a server bug, reported as 500 rather than anything credential-shaped.
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
