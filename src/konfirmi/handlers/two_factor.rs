//! Push approval and device enrollment endpoints.
//!
//! Every handler here maps one client interaction to one state machine
//! event. Protocol misuse (polling before a push was sent, replaying a
//! consumed flow, fetching the QR artifact twice) answers 400 without
//! touching the provider.

use axum::{
    extract::{Extension, Query},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::auth::{
    correlation::{AttachOutcome, BeginPush, PushState},
    flow::{advance_login, LoginEvent, LoginState},
    session::{self, ENROLL_FLOW_COOKIE_NAME, LOGIN_FLOW_COOKIE_NAME},
    AuthState,
};
use crate::provider::{qr, ApprovalStatus, PushContext, RegistrationStatus, SecondFactorProvider};
use crate::users::{storage::SessionRecord, UserStore};

const NO_PENDING_LOGIN: &str = "No login awaiting approval";

/// Resolve the caller's session or bail out with the right status.
async fn require_session(
    headers: &HeaderMap,
    store: &dyn UserStore,
) -> Result<SessionRecord, Response> {
    match session::authenticate_session(headers, store).await {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(StatusCode::UNAUTHORIZED.into_response()),
        Err(status) => Err(status.into_response()),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/challenge",
    responses(
        (status = 202, description = "Push prompt sent, or already outstanding"),
        (status = 400, description = "No login awaiting approval"),
        (status = 502, description = "Approval service unavailable"),
    ),
    tag = "2fa"
)]
// axum handler for sending the push approval prompt
pub async fn challenge(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    provider: Extension<Arc<dyn SecondFactorProvider>>,
) -> Response {
    let Some(flow_id) = session::extract_flow_id(&headers, LOGIN_FLOW_COOKIE_NAME) else {
        return (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response();
    };

    let Some(pending) = auth_state.flows().login_snapshot(flow_id).await else {
        return (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response();
    };

    // Reserve the send slot before calling the provider: racing requests
    // and page revisits share the one outstanding prompt instead of
    // pinging the device again.
    match auth_state.flows().begin_push(flow_id).await {
        BeginPush::AlreadySent(_) | BeginPush::InFlight => {
            debug!(%flow_id, "push already outstanding");
            return (StatusCode::ACCEPTED, Json("push_sent")).into_response();
        }
        BeginPush::Missing => {
            return (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response();
        }
        BeginPush::Begun => {}
    }

    let context = PushContext {
        username: pending.username.clone(),
        client_ip: session::extract_client_ip(&headers),
    };

    match provider.send_push(&pending.enrollment_id, &context).await {
        Ok(push_id) => match auth_state.flows().attach_push(flow_id, push_id).await {
            AttachOutcome::Attached | AttachOutcome::AlreadySet(_) => {
                info!(username = %pending.username, "push approval requested");
                (StatusCode::ACCEPTED, Json("push_sent")).into_response()
            }
            // The flow expired between snapshot and attach.
            AttachOutcome::Missing => (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response(),
        },
        Err(err) => {
            // Release the slot so a later challenge can retry.
            auth_state.flows().abort_push(flow_id).await;
            error!("Failed to send push approval request: {err}");
            (StatusCode::BAD_GATEWAY, "Approval service unavailable").into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ChallengePollQuery {
    remember: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/auth/2fa/challenge/poll",
    params(
        ("remember" = Option<String>, Query, description = "Remember flag echoed from the login form"),
    ),
    responses(
        (status = 200, description = "\"pending\", \"approved\" or \"error\""),
        (status = 400, description = "No login awaiting approval"),
    ),
    tag = "2fa"
)]
// axum handler for polling the push approval outcome
pub async fn challenge_poll(
    headers: HeaderMap,
    Query(query): Query<ChallengePollQuery>,
    store: Extension<Arc<dyn UserStore>>,
    auth_state: Extension<Arc<AuthState>>,
    provider: Extension<Arc<dyn SecondFactorProvider>>,
) -> Response {
    let Some(flow_id) = session::extract_flow_id(&headers, LOGIN_FLOW_COOKIE_NAME) else {
        return (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response();
    };

    let Some(pending) = auth_state.flows().login_snapshot(flow_id).await else {
        // Also covers replays after the flow was consumed or errored out.
        return (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response();
    };

    let PushState::Sent(push_id) = pending.push else {
        return (StatusCode::BAD_REQUEST, "Push approval not requested yet").into_response();
    };

    // The remember flag captured at login is authoritative; the echoed
    // query parameter is accepted for interface compatibility only.
    let echoed = query.remember.as_deref().unwrap_or("0") == "1";
    if echoed != pending.remember {
        debug!(%flow_id, "remember parameter does not match captured flag");
    }

    let event = match provider.approval_status(&push_id).await {
        ApprovalStatus::Pending => LoginEvent::PushPending,
        ApprovalStatus::Approved => LoginEvent::PushApproved,
        ApprovalStatus::Error => LoginEvent::PushRejected,
    };

    match advance_login(LoginState::AwaitingPush, &event) {
        LoginState::AwaitingPush => Json("pending").into_response(),
        LoginState::Authenticated => {
            // Consume before granting: concurrent approval observations
            // race on this take and only one of them wins.
            let Some(pending) = auth_state.flows().take_login(flow_id).await else {
                return (StatusCode::BAD_REQUEST, NO_PENDING_LOGIN).into_response();
            };

            let ttl_seconds = auth_state.config().session_ttl_for(pending.remember);
            let cookie = match super::user_login::grant_session(
                store.as_ref(),
                &auth_state,
                pending.user_id,
                &pending.username,
                ttl_seconds,
            )
            .await
            {
                Ok(cookie) => cookie,
                Err(response) => return response,
            };

            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            (StatusCode::OK, response_headers, Json("approved")).into_response()
        }
        LoginState::Anonymous | LoginState::Failed => {
            // Denied or expired prompts clear the pending login so the
            // outcome cannot be replayed; the client starts over.
            auth_state.flows().remove_login(flow_id).await;
            Json("error").into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enroll",
    responses(
        (status = 202, description = "Enrollment token issued, flow cookie set"),
        (status = 401, description = "Not signed in"),
    ),
    tag = "2fa"
)]
// axum handler for starting device enrollment
pub async fn enroll_start(
    headers: HeaderMap,
    store: Extension<Arc<dyn UserStore>>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match require_session(&headers, store.as_ref()).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let token = match auth_state.signer().issue(principal.user_id) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue enrollment token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let flow_id = auth_state.flows().insert_enrollment(token).await;

    let cookie = match session::flow_cookie(auth_state.config(), ENROLL_FLOW_COOKIE_NAME, flow_id) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build flow cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(username = %principal.username, "enrollment started");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    (
        StatusCode::ACCEPTED,
        response_headers,
        Json("enrollment_started"),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/2fa/enroll/qrcode",
    responses(
        (status = 200, description = "SVG QR code for the device app"),
        (status = 400, description = "No enrollment in progress"),
    ),
    tag = "2fa"
)]
// axum handler for rendering the enrollment QR code
pub async fn enroll_qrcode(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let Some(flow_id) = session::extract_flow_id(&headers, ENROLL_FLOW_COOKIE_NAME) else {
        return (StatusCode::BAD_REQUEST, "No enrollment in progress").into_response();
    };

    // Single use: the stored token reference is consumed on first render.
    let Some(token) = auth_state.flows().take_enrollment(flow_id).await else {
        return (StatusCode::BAD_REQUEST, "No enrollment in progress").into_response();
    };

    match qr::render_enrollment_artifact(&token) {
        Ok(svg) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/svg+xml"));
            // The artifact embeds a credential; keep it out of caches.
            response_headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            response_headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            response_headers.insert(EXPIRES, HeaderValue::from_static("0"));
            (StatusCode::OK, response_headers, svg).into_response()
        }
        Err(err) => {
            error!("Failed to render enrollment QR code: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/2fa/enroll/poll",
    responses(
        (status = 200, description = "\"pending\", \"completed\" or \"error\""),
        (status = 401, description = "Not signed in"),
    ),
    tag = "2fa"
)]
// axum handler for polling the device registration outcome
pub async fn enroll_poll(
    headers: HeaderMap,
    store: Extension<Arc<dyn UserStore>>,
    provider: Extension<Arc<dyn SecondFactorProvider>>,
) -> Response {
    let principal = match require_session(&headers, store.as_ref()).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    match provider.registration_status(principal.user_id).await {
        RegistrationStatus::Completed { enrollment_id } => {
            match store
                .set_push_enrollment(principal.user_id, &enrollment_id)
                .await
            {
                Ok(true) => {
                    info!(username = %principal.username, "second factor enrolled");
                    Json("completed").into_response()
                }
                // An earlier poll already persisted the id.
                Ok(false) => Json("completed").into_response(),
                Err(err) => {
                    error!("Failed to persist enrollment id: {err}");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        status => Json(status.as_str()).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/disable",
    responses(
        (status = 204, description = "Second factor disabled"),
        (status = 400, description = "Two-factor authentication is not enabled"),
        (status = 401, description = "Not signed in"),
        (status = 502, description = "Provider refused the deletion"),
    ),
    tag = "2fa"
)]
// axum handler for disabling the second factor
pub async fn disable(
    headers: HeaderMap,
    store: Extension<Arc<dyn UserStore>>,
    provider: Extension<Arc<dyn SecondFactorProvider>>,
) -> Response {
    let principal = match require_session(&headers, store.as_ref()).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let user = match store.user_by_id(principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to lookup user: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(enrollment_id) = user.push_enrollment_id else {
        return (
            StatusCode::BAD_REQUEST,
            "Two-factor authentication is not enabled",
        )
            .into_response();
    };

    if provider.delete_user(&enrollment_id).await {
        match store.clear_push_enrollment(principal.user_id).await {
            Ok(()) => {
                info!(username = %principal.username, "second factor disabled");
                StatusCode::NO_CONTENT.into_response()
            }
            Err(err) => {
                error!("Failed to clear enrollment id: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    } else {
        // The provider still has the device; local state stays enrolled.
        (
            StatusCode::BAD_GATEWAY,
            "An error has occurred. Please try again.",
        )
            .into_response()
    }
}
