use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::auth::{
    flow::{advance_login, LoginEvent, LoginState},
    session::{self, LOGIN_FLOW_COOKIE_NAME},
    AuthState,
};
use crate::users::{self, AuthOutcome, UserStore};

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
    #[serde(default)]
    remember: bool,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 204, description = "Authenticated, session cookie set"),
        (status = 202, description = "Credentials valid, push approval required"),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid username or password"),
    ),
    tag = "auth"
)]
// axum handler for login
pub async fn login(
    store: Extension<Arc<dyn UserStore>>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let outcome =
        match users::authenticate(store.as_ref(), &request.username, &request.password).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Failed to check credentials: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let user = match outcome {
        AuthOutcome::Valid(user) => user,
        AuthOutcome::Invalid => {
            // Same response for unknown user and wrong password.
            return (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response();
        }
    };

    let event = LoginEvent::ValidCredentials {
        second_factor: user.push_enrollment_id.is_some(),
    };

    match advance_login(LoginState::Anonymous, &event) {
        LoginState::Authenticated => {
            let ttl_seconds = auth_state.config().session_ttl_for(request.remember);
            let cookie = match grant_session(
                store.as_ref(),
                &auth_state,
                user.id,
                &user.username,
                ttl_seconds,
            )
            .await
            {
                Ok(cookie) => cookie,
                Err(response) => return response,
            };

            let mut headers = HeaderMap::new();
            headers.insert(SET_COOKIE, cookie);
            (StatusCode::NO_CONTENT, headers).into_response()
        }
        LoginState::AwaitingPush => {
            let Some(enrollment_id) = user.push_enrollment_id else {
                error!("Awaiting push without an enrollment id");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };

            let flow_id = auth_state
                .flows()
                .insert_login(user.id, user.username, enrollment_id, request.remember)
                .await;

            let cookie =
                match session::flow_cookie(auth_state.config(), LOGIN_FLOW_COOKIE_NAME, flow_id) {
                    Ok(cookie) => cookie,
                    Err(err) => {
                        error!("Failed to build flow cookie: {err}");
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                };

            let mut headers = HeaderMap::new();
            headers.insert(SET_COOKIE, cookie);
            (StatusCode::ACCEPTED, headers, Json("second_factor_required")).into_response()
        }
        state => {
            error!("Unexpected login state: {state:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Create a session row and build its cookie. Shared by the direct login
/// path and the post-approval poll; the error side is a ready response.
pub(crate) async fn grant_session(
    store: &dyn UserStore,
    auth_state: &AuthState,
    user_id: uuid::Uuid,
    username: &str,
    ttl_seconds: i64,
) -> Result<axum::http::HeaderValue, Response> {
    let token = match store.create_session(user_id, ttl_seconds).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    let cookie = match session::session_cookie(auth_state.config(), &token, ttl_seconds) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    info!(username, "session granted");

    Ok(cookie)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared"),
    ),
    tag = "auth"
)]
// axum handler for logout
pub async fn logout(
    headers: HeaderMap,
    store: Extension<Arc<dyn UserStore>>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Some(token) = session::session_token(&headers) {
        let token_hash = session::hash_session_token(&token);
        if let Err(err) = store.delete_session(&token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Clear the cookie even when no session was found; logout is idempotent.
    let mut response_headers = HeaderMap::new();
    match session::clear_session_cookie(auth_state.config()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build clearing cookie: {err}"),
    }

    (StatusCode::NO_CONTENT, response_headers).into_response()
}
