//! Signed password reset tokens.
//!
//! Delivery of the token is out of scope here; the request handler logs it
//! for the operator channel instead of sending email.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const RESET_TOKEN_TTL_SECONDS: u64 = 10 * 60;
const RESET_PURPOSE: &str = "password_reset";

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    sub: String,
    exp: u64,
    purpose: String,
}

pub fn issue_reset_token(key: &SecretString, user_id: Uuid) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();

    let claims = ResetClaims {
        sub: user_id.to_string(),
        exp: now + RESET_TOKEN_TTL_SECONDS,
        purpose: RESET_PURPOSE.to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(key.expose_secret().as_bytes()),
    )
    .context("failed to sign reset token")
}

/// Returns the user id the token was issued for, or `None` when the token
/// is invalid, expired, or was minted for another purpose.
pub fn verify_reset_token(key: &SecretString, token: &str) -> Option<Uuid> {
    let mut validation = Validation::default();
    validation.leeway = 0;
    let data = decode::<ResetClaims>(
        token,
        &DecodingKey::from_secret(key.expose_secret().as_bytes()),
        &validation,
    )
    .ok()?;
    if data.claims.purpose != RESET_PURPOSE {
        return None;
    }
    Uuid::parse_str(&data.claims.sub).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("signing-key".to_string())
    }

    #[test]
    fn reset_token_round_trips() {
        let user_id = Uuid::new_v4();
        let token = issue_reset_token(&key(), user_id).unwrap();
        assert_eq!(verify_reset_token(&key(), &token), Some(user_id));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = issue_reset_token(&key(), Uuid::new_v4()).unwrap();
        let other = SecretString::from("other-key".to_string());
        assert_eq!(verify_reset_token(&other, &token), None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(verify_reset_token(&key(), "not-a-token"), None);
    }
}
