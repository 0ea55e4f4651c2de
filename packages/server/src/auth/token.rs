//! Access-token capability: `sign(claims) -> token`, `verify(token) -> claims`.
//!
//! HS256 with a shared secret. Verification failures collapse into the
//! [`AuthError`] taxonomy; the underlying library error never crosses this
//! module boundary, so no internal detail can leak toward a client.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id, as a decimal string.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Signing and verification keys plus the token lifetime policy.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenKeys {
    /// Builds keys from the shared secret.
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: an expired token is expired, which keeps the 401
        // contract deterministic and testable.
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// Issues a token for the user, expiring after the configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails (effectively unreachable for HS256
    /// with an in-memory secret).
    pub fn issue(&self, user_id: u64) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.issue_at(user_id, now, now.saturating_add(ttl))
    }

    /// Issues a token with explicit issued-at/expiry timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue_at(&self, user_id: u64, issued_at: i64, expires_at: i64) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: expires_at,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| anyhow::anyhow!("token signing failed: {err}"))
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    ///
    /// Maps verification failures onto the [`AuthError`] taxonomy:
    /// expired signature to `ExpiredToken`, signature/algorithm problems to
    /// `InvalidSignature`, and every other decode failure to
    /// `MalformedToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthError::InvalidSignature
                }
                _ => AuthError::MalformedToken,
            })
    }

    /// Configured token lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
