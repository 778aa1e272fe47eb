//! Adapter for the external push/enrollment provider.
//!
//! All transport failures are absorbed here and mapped to the flow-level
//! statuses the controller understands; nothing from the HTTP layer leaks
//! past this boundary. Registration-status failures deliberately read as
//! `Pending` so a transient provider hiccup does not flap the polling UI.

pub mod qr;
pub mod token;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;
use uuid::Uuid;

use crate::konfirmi::APP_USER_AGENT;

const PROVIDER_TIMEOUT_SECONDS: u64 = 10;
/// How long the user has to act on a push prompt.
const PUSH_EXPIRY_SECONDS: u64 = 120;

/// Device-registration progress as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegistrationStatus {
    Pending,
    Completed { enrollment_id: String },
    Error,
}

impl RegistrationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed { .. } => "completed",
            Self::Error => "error",
        }
    }
}

/// Outcome of a push approval request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Error,
}

impl ApprovalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Error => "error",
        }
    }
}

/// Human-readable context attached to a push prompt.
#[derive(Clone, Debug)]
pub struct PushContext {
    pub username: String,
    pub client_ip: Option<String>,
}

#[async_trait]
pub trait SecondFactorProvider: Send + Sync {
    /// Check whether the user has scanned the registration QR code.
    async fn registration_status(&self, user_id: Uuid) -> RegistrationStatus;

    /// Send a push approval prompt; returns the provider's correlation id.
    async fn send_push(&self, enrollment_id: &str, context: &PushContext) -> Result<String>;

    /// Check whether a push prompt has been handled.
    async fn approval_status(&self, correlation_id: &str) -> ApprovalStatus;

    /// Unregister a user from push notifications. True only on confirmed
    /// deletion; callers must leave local state untouched otherwise.
    async fn delete_user(&self, enrollment_id: &str) -> bool;
}

/// HTTP client for the provider API.
pub struct HttpProvider {
    client: Client,
    base_url: Url,
    api_key: SecretString,
    app_name: String,
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: SecretString, app_name: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECONDS))
            .build()?;

        let base_url = Url::parse(base_url)?;

        Ok(Self {
            client,
            base_url,
            api_key,
            app_name,
        })
    }

    fn endpoint_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| anyhow!("Error building provider URL for {path}: {err}"))
    }
}

#[async_trait]
impl SecondFactorProvider for HttpProvider {
    #[instrument(skip(self))]
    async fn registration_status(&self, user_id: Uuid) -> RegistrationStatus {
        let url = match self.endpoint_url(&format!("users/{user_id}/registration")) {
            Ok(url) => url,
            Err(err) => {
                error!("{err}");
                return RegistrationStatus::Error;
            }
        };

        let response = match self
            .client
            .get(url)
            .header("X-Api-Key", self.api_key.expose_secret())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // Transient provider failure reads as still pending.
                debug!("Registration status unavailable: {err}");
                return RegistrationStatus::Pending;
            }
        };

        if !response.status().is_success() {
            debug!("Registration status returned {}", response.status());
            return RegistrationStatus::Pending;
        }

        let json_response: Value = match response.json().await {
            Ok(json) => json,
            Err(err) => {
                debug!("Error parsing registration status: {err}");
                return RegistrationStatus::Pending;
            }
        };

        let registration = &json_response["registration"];
        match registration["status"].as_str() {
            Some("pending") => RegistrationStatus::Pending,
            Some("completed") => match enrollment_id_field(&registration["authy_id"]) {
                Some(enrollment_id) => RegistrationStatus::Completed { enrollment_id },
                None => {
                    error!("Registration completed without an enrollment id");
                    RegistrationStatus::Error
                }
            },
            _ => RegistrationStatus::Error,
        }
    }

    #[instrument(skip(self, context))]
    async fn send_push(&self, enrollment_id: &str, context: &PushContext) -> Result<String> {
        let url = self.endpoint_url(&format!(
            "onetouch/users/{enrollment_id}/approval_requests"
        ))?;

        let payload = json!({
            "message": format!("Login requested for {}.", self.app_name),
            "details": {
                "Username": context.username,
                "IP Address": context.client_ip,
            },
            "seconds_to_expire": PUSH_EXPIRY_SECONDS,
        });

        let response = self
            .client
            .post(url.clone())
            .header("X-Api-Key", self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("{} - {}", url, response.status()));
        }

        let json_response: Value = response.json().await?;
        json_response["approval_request"]["uuid"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Error parsing JSON response: no approval request uuid found"))
    }

    #[instrument(skip(self))]
    async fn approval_status(&self, correlation_id: &str) -> ApprovalStatus {
        let url = match self.endpoint_url(&format!("onetouch/approval_requests/{correlation_id}"))
        {
            Ok(url) => url,
            Err(err) => {
                error!("{err}");
                return ApprovalStatus::Error;
            }
        };

        let response = match self
            .client
            .get(url)
            .header("X-Api-Key", self.api_key.expose_secret())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!("Approval status unavailable: {err}");
                return ApprovalStatus::Error;
            }
        };

        if !response.status().is_success() {
            error!("Approval status returned {}", response.status());
            return ApprovalStatus::Error;
        }

        let json_response: Value = match response.json().await {
            Ok(json) => json,
            Err(err) => {
                error!("Error parsing approval status: {err}");
                return ApprovalStatus::Error;
            }
        };

        match json_response["approval_request"]["status"].as_str() {
            Some("pending") => ApprovalStatus::Pending,
            Some("approved") => ApprovalStatus::Approved,
            // denied, expired, or anything unrecognized is terminal
            _ => ApprovalStatus::Error,
        }
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, enrollment_id: &str) -> bool {
        let url = match self.endpoint_url(&format!("users/{enrollment_id}")) {
            Ok(url) => url,
            Err(err) => {
                error!("{err}");
                return false;
            }
        };

        match self
            .client
            .delete(url)
            .header("X-Api-Key", self.api_key.expose_secret())
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                error!("Error deleting provider user: {err}");
                false
            }
        }
    }
}

/// The provider reports enrollment ids as either strings or numbers.
fn enrollment_id_field(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::to_string)
        .or_else(|| value.as_u64().map(|id| id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(
            &server.uri(),
            SecretString::from("api-key".to_string()),
            "konfirmi".to_string(),
        )
        .unwrap()
    }

    fn push_context() -> PushContext {
        PushContext {
            username: "alice".to_string(),
            client_ip: Some("192.0.2.1".to_string()),
        }
    }

    #[tokio::test]
    async fn registration_failure_reads_as_pending() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/users/{user_id}/registration")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert_eq!(
            provider.registration_status(user_id).await,
            RegistrationStatus::Pending
        );
    }

    #[tokio::test]
    async fn registration_completed_yields_enrollment_id() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/users/{user_id}/registration")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "registration": { "status": "completed", "authy_id": 217_241 }
            })))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert_eq!(
            provider.registration_status(user_id).await,
            RegistrationStatus::Completed {
                enrollment_id: "217241".to_string()
            }
        );
    }

    #[tokio::test]
    async fn registration_unknown_status_is_error() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/users/{user_id}/registration")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "registration": { "status": "rejected" }
            })))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert_eq!(
            provider.registration_status(user_id).await,
            RegistrationStatus::Error
        );
    }

    #[tokio::test]
    async fn send_push_returns_correlation_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/onetouch/users/217241/approval_requests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "approval_request": { "uuid": "a0a0a0a0-uuid" }
            })))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        let uuid = provider.send_push("217241", &push_context()).await.unwrap();
        assert_eq!(uuid, "a0a0a0a0-uuid");
    }

    #[tokio::test]
    async fn send_push_failure_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/onetouch/users/217241/approval_requests"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert!(provider.send_push("217241", &push_context()).await.is_err());
    }

    #[tokio::test]
    async fn approval_statuses_map_to_flow_statuses() {
        let server = MockServer::start().await;

        for (wire, expected) in [
            ("pending", ApprovalStatus::Pending),
            ("approved", ApprovalStatus::Approved),
            ("denied", ApprovalStatus::Error),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/onetouch/approval_requests/{wire}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "approval_request": { "status": wire }
                })))
                .mount(&server)
                .await;

            let provider = provider(&server).await;
            assert_eq!(provider.approval_status(wire).await, expected);
        }
    }

    #[tokio::test]
    async fn approval_transport_failure_is_terminal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/onetouch/approval_requests/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert_eq!(provider.approval_status("gone").await, ApprovalStatus::Error);
    }

    #[tokio::test]
    async fn delete_user_confirms_only_on_success() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/users/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/users/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert!(provider.delete_user("ok").await);
        assert!(!provider.delete_user("broken").await);
    }
}
