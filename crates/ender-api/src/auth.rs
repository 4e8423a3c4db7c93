//! JWT authentication
//!
//! Token creation/verification and the request extractor protected routes
//! use. Credentials arrive as a bearer header or, for browser sessions and
//! WebSocket upgrades, the `token` cookie set at login.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ApiError;

/// Token lifetime.
pub const TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    #[serde(rename = "userId")]
    pub user_id: String,
    pub username: String,
    /// Expiration (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            user_id: user_id.into(),
            username: username.into(),
            exp: now + TOKEN_EXPIRY.as_secs(),
            iat: now,
        }
    }
}

/// Create a signed token for a user.
pub fn create_token(secret: &str, user_id: &str, username: &str) -> Result<String, ApiError> {
    let claims = Claims::new(user_id, username);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("failed to create token: {e}")))
}

/// Verify and decode a token.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "token verification failed");
        ApiError::Unauthorized("Invalid auth token".to_string())
    })
}

/// State the auth extractor needs; layered as an `Extension`.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_secret: String,
}

/// Authenticated operator extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.claims.user_id
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = parts
            .extensions
            .get::<AuthState>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("auth state not configured".to_string()))?;

        let token = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .ok_or_else(|| ApiError::Unauthorized("Missing auth token".to_string()))?;

        let claims = verify_token(&auth_state.jwt_secret, &token)?;
        Ok(AuthUser { claims })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    if header.len() > 7 && header[..7].eq_ignore_ascii_case("bearer ") {
        Some(header[7..].trim().to_string())
    } else {
        None
    }
}

fn cookie_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "token").then(|| value.to_string())
    })
}
