//! User records and credential checks.

pub mod reset;
pub mod storage;

use anyhow::{anyhow, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use regex::Regex;
use sqlx::PgPool;
use uuid::Uuid;

use self::storage::{SessionRecord, SignupOutcome};

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    /// Provider-assigned id; its presence is the sole signal that the
    /// second factor is required at login.
    pub push_enrollment_id: Option<String>,
}

/// Result of a credential check. No-such-user and wrong-password collapse
/// into `Invalid` so callers cannot enumerate usernames.
#[derive(Debug)]
pub enum AuthOutcome {
    Valid(UserRecord),
    Invalid,
}

pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{2,63}$").is_ok_and(|re| re.is_match(username))
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Persistence seam for users and sessions. Handlers only ever talk to
/// this trait; the Postgres implementation lives in [`storage`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>>;

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<SignupOutcome>;

    /// Attach the provider enrollment id, only when none is set yet.
    /// False means another caller already did.
    async fn set_push_enrollment(&self, user_id: Uuid, enrollment_id: &str) -> Result<bool>;

    async fn clear_push_enrollment(&self, user_id: Uuid) -> Result<()>;

    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<()>;

    /// Create a session row and return the raw token for the cookie.
    async fn create_session(&self, user_id: Uuid, ttl_seconds: i64) -> Result<String>;

    async fn session_by_hash(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()>;
}

/// [`UserStore`] backed by Postgres.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        storage::lookup_user_by_username(&self.pool, username).await
    }

    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        storage::lookup_user_by_id(&self.pool, user_id).await
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<SignupOutcome> {
        storage::insert_user(&self.pool, username, password_hash).await
    }

    async fn set_push_enrollment(&self, user_id: Uuid, enrollment_id: &str) -> Result<bool> {
        storage::set_push_enrollment(&self.pool, user_id, enrollment_id).await
    }

    async fn clear_push_enrollment(&self, user_id: Uuid) -> Result<()> {
        storage::clear_push_enrollment(&self.pool, user_id).await
    }

    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        storage::update_password(&self.pool, user_id, password_hash).await
    }

    async fn create_session(&self, user_id: Uuid, ttl_seconds: i64) -> Result<String> {
        storage::insert_session(&self.pool, user_id, ttl_seconds).await
    }

    async fn session_by_hash(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        storage::lookup_session(&self.pool, token_hash).await
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        storage::delete_session(&self.pool, token_hash).await
    }
}

/// Check a username/password pair against the user store.
///
/// Lookup is a case-sensitive exact match.
pub async fn authenticate(
    store: &dyn UserStore,
    username: &str,
    password: &str,
) -> Result<AuthOutcome> {
    let Some(user) = store.user_by_username(username).await? else {
        return Ok(AuthOutcome::Invalid);
    };
    if verify_password(&user.password_hash, password) {
        Ok(AuthOutcome::Valid(user))
    } else {
        Ok(AuthOutcome::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_username_accepts_common_forms() {
        assert!(valid_username("alice"));
        assert!(valid_username("alice.b-c_1"));
    }

    #[test]
    fn valid_username_rejects_short_or_odd_input() {
        assert!(!valid_username("ab"));
        assert!(!valid_username(".leading-dot"));
        assert!(!valid_username("has space"));
        assert!(!valid_username(""));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "wrong horse"));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify_password("not-a-phc-string", "password"));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("password").unwrap();
        let second = hash_password("password").unwrap();
        assert_ne!(first, second);
    }
}
