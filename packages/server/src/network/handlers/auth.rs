//! Registration, login, and current-user handlers.
//!
//! These are the business handlers the pipeline wraps. `/auth/me` is the
//! only protected one; registration and login are reachable without a
//! credential by nature.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AuthenticatedPrincipal;
use crate::observability::metrics::series;
use crate::storage::{NewUser, UserRecord};

use super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

/// `POST /api/v1/auth/register`
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    if !body.email.contains('@') {
        return Err(ApiError::Invalid("email is not valid"));
    }
    if body.username.trim().is_empty() {
        return Err(ApiError::Invalid("username must not be empty"));
    }
    if body.password.len() < 8 {
        return Err(ApiError::Invalid("password must be at least 8 characters"));
    }

    info!(email = %body.email, username = %body.username, "user registration attempt");

    let password_hash = state.hasher.hash(&body.password);
    let created = state
        .storage
        .create_user(NewUser {
            email: body.email.clone(),
            username: body.username,
            password_hash,
            full_name: body.full_name,
        })
        .await?;

    let Some(user) = created else {
        warn!(email = %body.email, "registration rejected, user already exists");
        return Err(ApiError::Conflict("email or username already registered"));
    };

    state.metrics.increment(series::USER_REGISTRATIONS, &[]);
    info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// `POST /api/v1/auth/login`
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    info!(email = %body.email, "login attempt");

    let user = state.storage.find_user_by_email(&body.email).await?;
    let verified = user
        .as_ref()
        .is_some_and(|u| state.hasher.verify(&body.password, &u.password_hash));

    let Some(user) = user.filter(|_| verified) else {
        warn!(email = %body.email, "login rejected");
        state
            .metrics
            .increment(series::LOGIN_ATTEMPTS, &["failure"]);
        return Err(ApiError::Unauthorized("incorrect email or password"));
    };

    state.storage.record_login(user.id, Utc::now()).await?;
    state.cache.invalidate(user.id);
    let access_token = state.tokens.issue(user.id)?;
    state
        .metrics
        .increment(series::LOGIN_ATTEMPTS, &["success"]);
    info!(user_id = user.id, "login succeeded");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: state.tokens.ttl().as_secs(),
    }))
}

/// `GET /api/v1/auth/me` (protected)
pub async fn me_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<UserResponse>, ApiError> {
    if let Some(user) = state.cache.get(principal.user_id) {
        return Ok(Json(user.into()));
    }

    let Some(user) = state.storage.find_user_by_id(principal.user_id).await? else {
        // The token verified but the account is gone or deactivated.
        warn!(user_id = principal.user_id, "no active user behind a valid token");
        return Err(ApiError::Unauthorized("user not found"));
    };

    state.cache.insert(user.clone());
    Ok(Json(user.into()))
}
