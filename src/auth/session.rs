//! Session and flow cookie handling.

use anyhow::{Context, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::error;
use uuid::Uuid;

use super::AuthConfig;
use crate::users::{storage::SessionRecord, UserStore};

pub const SESSION_COOKIE_NAME: &str = "konfirmi_session";
pub const LOGIN_FLOW_COOKIE_NAME: &str = "konfirmi_login_flow";
pub const ENROLL_FLOW_COOKIE_NAME: &str = "konfirmi_enroll_flow";

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the database stores a hash.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the database.
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build a secure `HttpOnly` cookie for the session token.
pub fn session_cookie(
    config: &AuthConfig,
    token: &str,
    ttl_seconds: i64,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    build_cookie(SESSION_COOKIE_NAME, token, ttl_seconds, config.cookie_secure())
}

pub fn clear_session_cookie(
    config: &AuthConfig,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    build_cookie(SESSION_COOKIE_NAME, "", 0, config.cookie_secure())
}

/// Cookie carrying the flow id of an in-flight login or enrollment.
pub fn flow_cookie(
    config: &AuthConfig,
    name: &str,
    flow_id: Uuid,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    #[allow(clippy::cast_possible_wrap)]
    let ttl_seconds = config.flow_ttl_seconds() as i64;
    build_cookie(name, &flow_id.to_string(), ttl_seconds, config.cookie_secure())
}

fn build_cookie(
    name: &str,
    value: &str,
    ttl_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Extract a named cookie value from the request headers.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        // Flag-style pairs without `=` are skipped, not a parse failure.
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        if key.trim() == name {
            return Some(val.trim().to_string());
        }
    }
    None
}

/// Parse the flow id cookie for a pending login or enrollment.
pub fn extract_flow_id(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    extract_cookie(headers, name).and_then(|value| Uuid::parse_str(&value).ok())
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    extract_cookie(headers, SESSION_COOKIE_NAME)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the request's session into a session record.
///
/// Returns `Ok(None)` when the cookie is missing or does not match an
/// active session.
pub async fn authenticate_session(
    headers: &HeaderMap,
    store: &dyn UserStore,
) -> Result<Option<SessionRecord>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_session_token(&token);
    match store.session_by_hash(&token_hash).await {
        Ok(record) => Ok(record),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Raw session token from the request, used by logout to delete the record.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    extract_session_token(headers)
}

/// Extract a client IP from common proxy headers for push request context.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn generate_session_token_round_trip() {
        let decoded_len = generate_session_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_session_token_stable() {
        let first = hash_session_token("token");
        let second = hash_session_token("token");
        let different = hash_session_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn session_cookie_carries_ttl_and_secure() {
        let config = AuthConfig::new().with_cookie_secure(true);
        let cookie = session_cookie(&config, "token", 60).unwrap();
        let value = cookie.to_str().unwrap();
        assert!(value.starts_with("konfirmi_session=token;"));
        assert!(value.contains("Max-Age=60"));
        assert!(value.contains("HttpOnly"));
        assert!(value.ends_with("; Secure"));
    }

    #[test]
    fn extract_cookie_finds_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; konfirmi_session=abc; x=2"),
        );
        assert_eq!(
            extract_cookie(&headers, SESSION_COOKIE_NAME).as_deref(),
            Some("abc")
        );
        assert!(extract_cookie(&headers, "missing").is_none());
    }

    #[test]
    fn extract_cookie_skips_pairs_without_equals() {
        // document.cookie = "foo" yields a flag-style pair; it must not
        // hide the cookies that follow it.
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("foo; konfirmi_session=abc"),
        );
        assert_eq!(
            extract_cookie(&headers, SESSION_COOKIE_NAME).as_deref(),
            Some("abc")
        );

        headers.insert(COOKIE, HeaderValue::from_static("foo"));
        assert!(extract_cookie(&headers, SESSION_COOKIE_NAME).is_none());
    }

    #[test]
    fn extract_flow_id_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("konfirmi_login_flow=not-a-uuid"),
        );
        assert!(extract_flow_id(&headers, LOGIN_FLOW_COOKIE_NAME).is_none());

        let flow_id = Uuid::new_v4();
        let cookie = format!("konfirmi_login_flow={flow_id}");
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
        assert_eq!(
            extract_flow_id(&headers, LOGIN_FLOW_COOKIE_NAME),
            Some(flow_id)
        );
    }

    #[test]
    fn bearer_token_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("konfirmi_session=cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer bearer"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("bearer"));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }
}
