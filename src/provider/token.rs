//! Signed enrollment tokens for device registration.
//!
//! The token is opaque to the browser: it is only ever embedded in the QR
//! artifact and verified by the provider holding the matching key. Expiry
//! is enforced provider-side; [`EnrollmentTokenSigner::verify`] mirrors
//! that check for tests.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Validity window of an enrollment token.
const ENROLLMENT_TOKEN_TTL_SECONDS: u64 = 5 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentClaims {
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    pub context: EnrollmentContext,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentContext {
    pub custom_user_id: String,
    pub authy_app_id: String,
}

pub struct EnrollmentTokenSigner {
    issuer: String,
    app_id: String,
    key: SecretString,
}

impl EnrollmentTokenSigner {
    #[must_use]
    pub fn new(issuer: String, app_id: String, key: SecretString) -> Self {
        Self {
            issuer,
            app_id,
            key,
        }
    }

    /// Issue a token authorizing `user_id` to register a device.
    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_secs();
        self.issue_at(user_id, now)
    }

    /// Deterministic issuance for a fixed timestamp.
    pub fn issue_at(&self, user_id: Uuid, now: u64) -> Result<String> {
        let claims = EnrollmentClaims {
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ENROLLMENT_TOKEN_TTL_SECONDS,
            context: EnrollmentContext {
                custom_user_id: user_id.to_string(),
                authy_app_id: self.app_id.clone(),
            },
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.key.expose_secret().as_bytes()),
        )
        .context("failed to sign enrollment token")
    }

    /// Provider-side acceptance check: signature valid and not expired.
    pub fn verify(&self, token: &str) -> Result<EnrollmentClaims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let data = decode::<EnrollmentClaims>(
            token,
            &DecodingKey::from_secret(self.key.expose_secret().as_bytes()),
            &validation,
        )
        .context("enrollment token rejected")?;
        Ok(data.claims)
    }
}
