use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::auth::AuthState;
use crate::users::{
    self,
    reset::{issue_reset_token, verify_reset_token},
    storage::SignupOutcome,
    UserStore,
};

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registration successful"),
        (status = 400, description = "Invalid username or password"),
        (status = 409, description = "Username already taken"),
    ),
    tag = "auth"
)]
// axum handler for register
pub async fn register(
    store: Extension<Arc<dyn UserStore>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    if !users::valid_username(&request.username) {
        return (StatusCode::BAD_REQUEST, "Invalid username").into_response();
    }

    if request.password.len() < MIN_PASSWORD_LENGTH {
        return (StatusCode::BAD_REQUEST, "Password too short").into_response();
    }

    let password_hash = match users::hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match store.create_user(&request.username, &password_hash).await {
        Ok(SignupOutcome::Created) => {
            info!(username = %request.username, "user registered");
            (StatusCode::CREATED, "Registration successful").into_response()
        }
        Ok(SignupOutcome::Conflict) => {
            (StatusCode::CONFLICT, "Username already taken").into_response()
        }
        Err(err) => {
            error!("Failed to create user: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ResetRequest {
    username: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset/request",
    request_body = ResetRequest,
    responses(
        (status = 204, description = "Accepted; a reset token is issued when the account exists"),
        (status = 400, description = "Missing payload"),
    ),
    tag = "auth"
)]
// axum handler for password reset requests
pub async fn reset_request(
    store: Extension<Arc<dyn UserStore>>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match store.user_by_username(&request.username).await {
        Ok(Some(user)) => match issue_reset_token(auth_state.app_key(), user.id) {
            // Token delivery is an operator concern; it is logged, not mailed.
            Ok(token) => info!(username = %user.username, token, "password reset token issued"),
            Err(err) => error!("Failed to issue reset token: {err}"),
        },
        Ok(None) => {}
        Err(err) => error!("Failed to lookup user for reset: {err}"),
    }

    // Uniform response so the endpoint cannot be used to probe accounts.
    StatusCode::NO_CONTENT.into_response()
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ResetConfirmRequest {
    token: String,
    password: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset/confirm",
    request_body = ResetConfirmRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Invalid or expired token, or weak password"),
    ),
    tag = "auth"
)]
// axum handler for confirming a password reset
pub async fn reset_confirm(
    store: Extension<Arc<dyn UserStore>>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetConfirmRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    if request.password.len() < MIN_PASSWORD_LENGTH {
        return (StatusCode::BAD_REQUEST, "Password too short").into_response();
    }

    let Some(user_id) = verify_reset_token(auth_state.app_key(), &request.token) else {
        return (StatusCode::BAD_REQUEST, "Invalid or expired token").into_response();
    };

    let password_hash = match users::hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match store.update_password(user_id, &password_hash).await {
        Ok(()) => {
            info!(%user_id, "password reset");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to update password: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
