//! Auth configuration and shared state for the login/enrollment flows.

pub mod correlation;
pub mod flow;
pub mod session;

use secrecy::SecretString;

use crate::provider::token::EnrollmentTokenSigner;
use correlation::FlowStore;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_REMEMBER_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_FLOW_TTL_SECONDS: u64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    session_ttl_seconds: i64,
    remember_session_ttl_seconds: i64,
    flow_ttl_seconds: u64,
    cookie_secure: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_session_ttl_seconds: DEFAULT_REMEMBER_SESSION_TTL_SECONDS,
            flow_ttl_seconds: DEFAULT_FLOW_TTL_SECONDS,
            cookie_secure: false,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_flow_ttl_seconds(mut self, seconds: u64) -> Self {
        self.flow_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Session TTL honoring the remember flag captured at login.
    #[must_use]
    pub fn session_ttl_for(&self, remember: bool) -> i64 {
        if remember {
            self.remember_session_ttl_seconds
        } else {
            self.session_ttl_seconds
        }
    }

    #[must_use]
    pub fn flow_ttl_seconds(&self) -> u64 {
        self.flow_ttl_seconds
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AuthState {
    config: AuthConfig,
    flows: FlowStore,
    signer: EnrollmentTokenSigner,
    app_key: SecretString,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        flows: FlowStore,
        signer: EnrollmentTokenSigner,
        app_key: SecretString,
    ) -> Self {
        Self {
            config,
            flows,
            signer,
            app_key,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn flows(&self) -> &FlowStore {
        &self.flows
    }

    #[must_use]
    pub fn signer(&self) -> &EnrollmentTokenSigner {
        &self.signer
    }

    /// Application key used for password reset tokens.
    pub(crate) fn app_key(&self) -> &SecretString {
        &self.app_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new();

        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(config.flow_ttl_seconds(), DEFAULT_FLOW_TTL_SECONDS);
        assert!(!config.cookie_secure());

        let config = config
            .with_session_ttl_seconds(60)
            .with_remember_session_ttl_seconds(120)
            .with_flow_ttl_seconds(30)
            .with_cookie_secure(true);

        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.session_ttl_for(false), 60);
        assert_eq!(config.session_ttl_for(true), 120);
        assert_eq!(config.flow_ttl_seconds(), 30);
        assert!(config.cookie_secure());
    }
}
