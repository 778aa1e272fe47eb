use anyhow::{Context, Result};
use axum::{
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

use crate::auth::AuthState;
use crate::provider::SecondFactorProvider;
use crate::users::{PgUserStore, UserStore};

pub mod handlers;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::user_register::register,
        handlers::user_register::reset_request,
        handlers::user_register::reset_confirm,
        handlers::user_login::login,
        handlers::user_login::logout,
        handlers::two_factor::challenge,
        handlers::two_factor::challenge_poll,
        handlers::two_factor::enroll_start,
        handlers::two_factor::enroll_qrcode,
        handlers::two_factor::enroll_poll,
        handlers::two_factor::disable,
    ),
    components(schemas(
        handlers::user_register::RegisterRequest,
        handlers::user_register::ResetRequest,
        handlers::user_register::ResetConfirmRequest,
        handlers::user_login::LoginRequest,
    )),
    tags(
        (name = "auth", description = "Registration, login and password reset"),
        (name = "2fa", description = "Push approval and device enrollment"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[must_use]
pub fn router(
    store: Arc<dyn UserStore>,
    state: Arc<AuthState>,
    provider: Arc<dyn SecondFactorProvider>,
) -> Router {
    Router::new()
        .route("/v1/auth/register", post(handlers::register))
        .route("/v1/auth/login", post(handlers::login))
        .route("/v1/auth/logout", post(handlers::logout))
        .route("/v1/auth/reset/request", post(handlers::reset_request))
        .route("/v1/auth/reset/confirm", post(handlers::reset_confirm))
        .route("/v1/auth/2fa/challenge", post(handlers::challenge))
        .route("/v1/auth/2fa/challenge/poll", get(handlers::challenge_poll))
        .route("/v1/auth/2fa/enroll", post(handlers::enroll_start))
        .route("/v1/auth/2fa/enroll/qrcode", get(handlers::enroll_qrcode))
        .route("/v1/auth/2fa/enroll/poll", get(handlers::enroll_poll))
        .route("/v1/auth/2fa/disable", post(handlers::disable))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(store))
        .layer(Extension(state))
        .layer(Extension(provider))
}

pub async fn new(
    port: u16,
    dsn: &str,
    state: Arc<AuthState>,
    provider: Arc<dyn SecondFactorProvider>,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool));
    let app = router(store, state, provider);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
