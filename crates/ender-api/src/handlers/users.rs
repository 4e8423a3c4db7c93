//! User account endpoints

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Path, State};
use axum::http::{header::SET_COOKIE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use ender_store::User;

use crate::auth::{create_token, AuthUser, TOKEN_EXPIRY};
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterPayload {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserPayload {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordPayload {
    pub current_password: String,
    pub new_password: String,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/v1/register",
    request_body = RegisterPayload,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username or email taken"),
    ),
    tag = "Users"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<User>)> {
    if payload.username.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username, email and password are required".to_string(),
        ));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: payload.username,
        email: payload.email,
        created_at: chrono::Utc::now(),
        password_hash: hash_password(&payload.password)?,
    };
    state.users.insert(&user).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Authenticate and receive a token (also set as a cookie)
#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = AuthPayload,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "Users"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<AuthPayload>,
) -> Result<Response> {
    let user = state
        .users
        .get_by_email(&payload.email)
        .await
        .map_err(|_| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &user.password_hash) {
        tracing::warn!(email = %payload.email, "failed authentication attempt");
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = create_token(&state.auth.jwt_secret, &user.id, &user.username)?;

    let cookie = format!(
        "token={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
        TOKEN_EXPIRY.as_secs(),
        if state.secure_cookies { "; Secure" } else { "" }
    );

    let mut response = Json(LoginResponse { token, user }).into_response();
    response.headers_mut().insert(
        SET_COOKIE,
        HeaderValue::from_str(&cookie)
            .map_err(|e| ApiError::Internal(format!("bad cookie value: {e}")))?,
    );
    Ok(response)
}

/// The authenticated user's own account
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthorized"),
    ),
    tag = "Users"
)]
pub async fn me(user: AuthUser, State(state): State<AppState>) -> Result<Json<User>> {
    Ok(Json(state.users.get(user.id()).await?))
}

/// Fetch a user by id
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "Not found"),
    ),
    tag = "Users"
)]
pub async fn get_user(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    Ok(Json(state.users.get(&id).await?))
}

/// Update a user's profile
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User id")),
    request_body = UpdateUserPayload,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 404, description = "Not found"),
    ),
    tag = "Users"
)]
pub async fn update_user(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<User>> {
    Ok(Json(
        state
            .users
            .update(&id, &payload.username, &payload.email)
            .await?,
    ))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    ),
    tag = "Users"
)]
pub async fn delete_user(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.users.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Change a user's password after verifying the current one
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/change-password",
    params(("id" = String, Path, description = "User id")),
    request_body = ChangePasswordPayload,
    responses(
        (status = 200, description = "Password changed"),
        (status = 401, description = "Current password incorrect"),
    ),
    tag = "Users"
)]
pub async fn change_password(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ChangePasswordPayload>,
) -> Result<StatusCode> {
    let user = state.users.get(&id).await?;
    if !verify_password(&payload.current_password, &user.password_hash) {
        return Err(ApiError::Unauthorized(
            "current password is incorrect".to_string(),
        ));
    }

    let hash = hash_password(&payload.new_password)?;
    state.users.set_password_hash(&id, &hash).await?;
    Ok(StatusCode::OK)
}
